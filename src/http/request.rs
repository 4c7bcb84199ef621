//! Inbound request handling.
//!
//! # Responsibilities
//! - Read the client request into an `OriginRequest`
//! - Expose the request ID assigned by the request-id layer
//!
//! # Design Decisions
//! - The body is buffered once; filters and the upstream share the bytes
//! - Body size is enforced by the limit layer before the read starts

use std::net::SocketAddr;

use axum::body::{to_bytes, Body};
use axum::http::{request::Parts, HeaderMap, HeaderName};

use crate::error::{GatewayError, GatewayResult};
use crate::filter::OriginRequest;
use crate::routing::DispatchRequest;

/// Header carrying the request correlation ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Correlation ID of a request, or "unknown" before the layer ran.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// The parts of `parts` the dispatcher needs.
pub fn dispatch_request(parts: &Parts) -> DispatchRequest<'_> {
    DispatchRequest {
        method: parts.method.as_str(),
        path: parts.uri.path(),
        query: parts.uri.query(),
        headers: &parts.headers,
    }
}

/// Buffer the body and assemble the request filters see.
pub async fn read_origin(
    parts: Parts,
    body: Body,
    client_addr: SocketAddr,
    max_body_bytes: usize,
) -> GatewayResult<OriginRequest> {
    let body = to_bytes(body, max_body_bytes)
        .await
        .map_err(|e| GatewayError::BadRequest(format!("failed to read request body: {}", e)))?;

    Ok(OriginRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        client_addr,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(uri: &str) -> Parts {
        let (parts, _) = Request::builder()
            .method("POST")
            .uri(uri)
            .header("x-request-id", "abc")
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn test_dispatch_request() {
        let parts = parts("/users/7?verbose=1");
        let req = dispatch_request(&parts);
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/users/7");
        assert_eq!(req.query, Some("verbose=1"));
        assert_eq!(request_id(&parts.headers), "abc");
    }

    #[test]
    fn test_missing_request_id() {
        assert_eq!(request_id(&HeaderMap::new()), "unknown");
    }

    #[tokio::test]
    async fn test_read_origin() {
        let addr: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        let origin = read_origin(parts("/a"), Body::from("hello"), addr, 1024).await.unwrap();
        assert_eq!(origin.body.as_ref(), b"hello");
        assert_eq!(origin.client_ip().to_string(), "10.0.0.9");
    }

    #[tokio::test]
    async fn test_read_origin_over_limit() {
        let addr: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        let err = read_origin(parts("/a"), Body::from("hello world"), addr, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }
}
