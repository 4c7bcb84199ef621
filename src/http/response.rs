//! Response handling.
//!
//! # Responsibilities
//! - Turn the chain's buffered response into an axum response
//! - Map gateway errors to a status and a small JSON body
//!
//! # Design Decisions
//! - Error bodies never leak upstream addresses, only the error message

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, Response as HttpResponse};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::GatewayError;

/// Convert the response produced by the filter chain.
pub fn client_response(response: HttpResponse<Bytes>) -> Response {
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::from(body))
}

/// Response for a request that failed before or inside the chain.
pub fn error_response(err: &GatewayError) -> Response {
    let status = err.status_code();
    let body = json!({
        "status": status.as_u16(),
        "error": err.to_string(),
    });

    let mut response = (status, body.to_string()).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
