//! Gateway error types.
//!
//! # Design Decisions
//! - One error enum for request handling, filter building and event application
//! - Every variant maps to the status the client sees (`status_code`)
//! - Validation failures keep their own type so the offending field survives

use axum::http::StatusCode;
use thiserror::Error;

use crate::meta::validation::ValidationError;

/// Errors raised by the dispatch core.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No API matched the inbound request.
    #[error("no api matched {method} {path}")]
    NotFound { method: String, path: String },

    /// The resolved cluster has an empty active-server list.
    #[error("no available server in cluster {cluster}")]
    NoAvailableServer { cluster: u64 },

    /// The matched API has no dispatch node and no routing diverted the request.
    #[error("api {0} has no dispatch node")]
    NoDispatchNode(u64),

    /// A dispatch node or routing referenced a cluster that is not in the table.
    #[error("cluster {0} not found")]
    ClusterNotFound(u64),

    /// The filter name is neither built in nor external.
    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    /// An external filter artifact could not be loaded or resolved.
    #[error("failed to load filter from {path}: {reason}")]
    PluginLoad { path: String, reason: String },

    /// A filter rejected or failed the request.
    #[error("filter {filter} failed with {status}: {message}")]
    Filter {
        filter: String,
        status: StatusCode,
        message: String,
    },

    /// The inbound request could not be read.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Upstream I/O failure.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Upstream did not answer in time.
    #[error("upstream timeout after {0}ms")]
    UpstreamTimeout(u64),

    /// Object rejected before entering the routing table.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Gateway configuration problem.
    #[error("configuration error: {0}")]
    Config(String),

    /// Script runtime failure.
    #[error("script error: {0}")]
    Script(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Build a filter failure carrying the status the client should see.
    pub fn filter(filter: impl Into<String>, status: StatusCode, message: impl Into<String>) -> Self {
        Self::Filter {
            filter: filter.into(),
            status,
            message: message.into(),
        }
    }

    /// Status code surfaced to the client for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::NoAvailableServer { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::NoDispatchNode(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ClusterNotFound(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Filter { status, .. } => *status,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Validation(_) | GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type for dispatch-core operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
