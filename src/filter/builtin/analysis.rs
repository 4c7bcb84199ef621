//! Feeds per-server counters in [`Analysis`](crate::observability::analysis::Analysis).

use async_trait::async_trait;
use axum::http::StatusCode;

use crate::error::GatewayError;
use crate::filter::{Filter, FilterContext, FilterResult};

#[derive(Debug, Default)]
pub struct AnalysisFilter;

#[async_trait]
impl Filter for AnalysisFilter {
    fn name(&self) -> &str {
        "analysis"
    }

    async fn pre(&self, ctx: &mut FilterContext) -> FilterResult {
        ctx.analysis().request(ctx.server().id);
        Ok(StatusCode::OK)
    }

    async fn post(&self, ctx: &mut FilterContext) -> FilterResult {
        let server_id = ctx.server().id;
        let latency = ctx.start_at().elapsed();
        match ctx.response.as_ref() {
            Some(response) if response.status().is_server_error() => ctx.analysis().failure(server_id, latency),
            _ => ctx.analysis().success(server_id, latency),
        }
        Ok(StatusCode::OK)
    }

    async fn post_err(&self, ctx: &mut FilterContext, _status: StatusCode, err: &GatewayError) {
        let server_id = ctx.server().id;
        match err {
            GatewayError::Upstream(_) | GatewayError::UpstreamTimeout(_) => {
                ctx.analysis().failure(server_id, ctx.start_at().elapsed())
            }
            _ => ctx.analysis().rejection(server_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::context::test_support::context;
    use axum::body::Bytes;
    use axum::http::Response;

    #[tokio::test]
    async fn test_counts_outcomes() {
        let filter = AnalysisFilter;

        let mut ctx = context("/items/1");
        filter.pre(&mut ctx).await.unwrap();
        ctx.response = Some(Response::new(Bytes::new()));
        filter.post(&mut ctx).await.unwrap();

        let err = GatewayError::Upstream("refused".into());
        filter.post_err(&mut ctx, err.status_code(), &err).await;
        let err = GatewayError::filter("jwt", StatusCode::UNAUTHORIZED, "no token");
        filter.post_err(&mut ctx, err.status_code(), &err).await;

        let stats = ctx.analysis().stats(1);
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.rejections, 1);
    }
}
