//! HTTP access log.

use async_trait::async_trait;
use axum::http::StatusCode;

use crate::error::GatewayError;
use crate::filter::{Filter, FilterContext, FilterResult};

/// Emits one `access` log line per finished request.
#[derive(Debug, Default)]
pub struct AccessFilter;

impl AccessFilter {
    fn log(&self, ctx: &FilterContext, status: StatusCode, error: Option<&GatewayError>) {
        let origin = ctx.origin();
        let elapsed = ctx.start_at().elapsed();
        tracing::info!(
            target: "access",
            client = %origin.client_ip(),
            method = %origin.method,
            path = origin.path(),
            api = ctx.api().id(),
            server = %ctx.server().addr,
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            error = error.map(|e| e.to_string()),
        );
    }
}

#[async_trait]
impl Filter for AccessFilter {
    fn name(&self) -> &str {
        "http-access"
    }

    async fn post(&self, ctx: &mut FilterContext) -> FilterResult {
        let status = ctx.response.as_ref().map(|r| r.status()).unwrap_or(StatusCode::OK);
        self.log(ctx, status, None);
        Ok(StatusCode::OK)
    }

    async fn post_err(&self, ctx: &mut FilterContext, status: StatusCode, err: &GatewayError) {
        self.log(ctx, status, Some(err));
    }
}
