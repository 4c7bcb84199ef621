//! Cross-origin resource sharing.
//!
//! Optional TOML config (`options.cross_config_file`); without one every
//! origin is allowed.
//!
//! ```toml
//! allowed_origins = ["https://app.example.com"]
//! allowed_methods = ["GET", "POST"]
//! allowed_headers = ["content-type", "authorization"]
//! max_age_secs = 600
//! ```

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_METHOD, ORIGIN, VARY,
};
use axum::http::{HeaderValue, Method, Response, StatusCode};
use serde::Deserialize;

use crate::error::{GatewayError, GatewayResult};
use crate::filter::{Filter, FilterContext, FilterResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct CrossConfig {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
    max_age_secs: u64,
}

impl Default for CrossConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_headers: vec!["*".to_string()],
            max_age_secs: 600,
        }
    }
}

#[derive(Debug, Default)]
pub struct CrossFilter {
    config: CrossConfig,
}

impl CrossFilter {
    fn allows(&self, origin: &str) -> bool {
        self.config
            .allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin))
    }

    fn preflight(&self, origin: &HeaderValue) -> GatewayResult<Response<Bytes>> {
        let header = |value: String| {
            HeaderValue::from_str(&value).map_err(|e| GatewayError::Config(format!("cross header: {}", e)))
        };
        let mut response = Response::new(Bytes::new());
        *response.status_mut() = StatusCode::NO_CONTENT;
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, header(self.config.allowed_methods.join(", "))?);
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, header(self.config.allowed_headers.join(", "))?);
        headers.insert(ACCESS_CONTROL_MAX_AGE, header(self.config.max_age_secs.to_string())?);
        headers.insert(VARY, HeaderValue::from_static("origin"));
        Ok(response)
    }
}

#[async_trait]
impl Filter for CrossFilter {
    fn name(&self) -> &str {
        "cross"
    }

    fn init(&mut self, cfg: &str) -> GatewayResult<()> {
        let content = std::fs::read_to_string(cfg)
            .map_err(|e| GatewayError::Config(format!("cross config {}: {}", cfg, e)))?;
        self.config = toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("cross config {}: {}", cfg, e)))?;
        Ok(())
    }

    async fn pre(&self, ctx: &mut FilterContext) -> FilterResult {
        let origin = ctx.origin();
        let Some(request_origin) = origin.headers.get(ORIGIN).cloned() else {
            return Ok(StatusCode::OK);
        };
        let allowed = request_origin.to_str().map(|o| self.allows(o)).unwrap_or(false);
        let is_preflight = origin.method == Method::OPTIONS && origin.headers.contains_key(ACCESS_CONTROL_REQUEST_METHOD);

        if !allowed {
            return Err(GatewayError::filter(
                self.name(),
                StatusCode::FORBIDDEN,
                "origin not allowed",
            ));
        }
        if is_preflight {
            ctx.response = Some(self.preflight(&request_origin)?);
        }
        Ok(StatusCode::OK)
    }

    async fn post(&self, ctx: &mut FilterContext) -> FilterResult {
        let Some(request_origin) = ctx.origin().headers.get(ORIGIN).cloned() else {
            return Ok(StatusCode::OK);
        };
        if let Some(response) = ctx.response.as_mut() {
            let headers = response.headers_mut();
            headers.entry(ACCESS_CONTROL_ALLOW_ORIGIN).or_insert(request_origin);
            headers.append(VARY, HeaderValue::from_static("origin"));
        }
        Ok(StatusCode::OK)
    }
}
