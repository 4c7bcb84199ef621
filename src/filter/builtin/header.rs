//! Request shaping filters: Prepare, Header and X-Forward.

use async_trait::async_trait;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;

use crate::error::GatewayError;
use crate::filter::{Filter, FilterContext, FilterResult};

/// Headers that describe one connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}

/// Points the forwarded request at the chosen server.
#[derive(Debug, Default)]
pub struct PrepareFilter;

#[async_trait]
impl Filter for PrepareFilter {
    fn name(&self) -> &str {
        "prepare"
    }

    async fn pre(&self, ctx: &mut FilterContext) -> FilterResult {
        let host = HeaderValue::from_str(&ctx.server().addr).map_err(|e| {
            GatewayError::filter(self.name(), StatusCode::BAD_GATEWAY, format!("invalid server address: {}", e))
        })?;
        let headers = ctx.forward_mut().headers_mut();
        headers.insert(header::HOST, host);
        // recomputed from the buffered body
        headers.remove(header::CONTENT_LENGTH);
        Ok(StatusCode::OK)
    }
}

/// Removes hop-by-hop headers in both directions.
#[derive(Debug, Default)]
pub struct HeaderFilter;

#[async_trait]
impl Filter for HeaderFilter {
    fn name(&self) -> &str {
        "header"
    }

    async fn pre(&self, ctx: &mut FilterContext) -> FilterResult {
        strip_hop_by_hop(ctx.forward_mut().headers_mut());
        Ok(StatusCode::OK)
    }

    async fn post(&self, ctx: &mut FilterContext) -> FilterResult {
        if let Some(response) = ctx.response.as_mut() {
            strip_hop_by_hop(response.headers_mut());
        }
        Ok(StatusCode::OK)
    }
}

/// Adds the `X-Forwarded-*` headers.
#[derive(Debug, Default)]
pub struct XForwardFilter;

#[async_trait]
impl Filter for XForwardFilter {
    fn name(&self) -> &str {
        "x-forward"
    }

    async fn pre(&self, ctx: &mut FilterContext) -> FilterResult {
        let client_ip = ctx.origin().client_ip().to_string();
        let forwarded_for = match ctx.origin().headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(previous) => format!("{}, {}", previous, client_ip),
            None => client_ip,
        };
        let original_host = ctx.origin().headers.get(header::HOST).cloned();

        let forwarded_for = HeaderValue::from_str(&forwarded_for)
            .map_err(|e| GatewayError::filter(self.name(), StatusCode::BAD_REQUEST, e.to_string()))?;
        let headers = ctx.forward_mut().headers_mut();
        headers.insert(X_FORWARDED_FOR, forwarded_for);
        if let Some(host) = original_host {
            headers.insert(X_FORWARDED_HOST, host);
        }
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
        Ok(StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::context::test_support::{api, context, context_for};
    use axum::http::Method;

    #[tokio::test]
    async fn test_prepare_sets_host() {
        let mut ctx = context("/items/1");
        ctx.forward_mut().headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from_static("10"));
        PrepareFilter.pre(&mut ctx).await.unwrap();
        let headers = ctx.forward().headers();
        assert_eq!(headers.get(header::HOST).unwrap(), "127.0.0.1:9001");
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
    }

    #[tokio::test]
    async fn test_header_strips_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        let mut ctx = context_for(api(1), Method::GET, "/items/1", headers);

        HeaderFilter.pre(&mut ctx).await.unwrap();
        assert!(ctx.forward().headers().get(header::CONNECTION).is_none());
        assert!(ctx.forward().headers().get(header::ACCEPT).is_some());
    }

    #[tokio::test]
    async fn test_x_forward_appends() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("192.168.0.9"));
        headers.insert(header::HOST, HeaderValue::from_static("api.example.com"));
        let mut ctx = context_for(api(1), Method::GET, "/items/1", headers);

        XForwardFilter.pre(&mut ctx).await.unwrap();
        let forwarded = ctx.forward().headers();
        assert_eq!(forwarded.get(X_FORWARDED_FOR).unwrap(), "192.168.0.9, 10.1.2.3");
        assert_eq!(forwarded.get(X_FORWARDED_HOST).unwrap(), "api.example.com");
        assert_eq!(forwarded.get(X_FORWARDED_PROTO).unwrap(), "http");
    }
}
