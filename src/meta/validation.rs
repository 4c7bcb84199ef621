//! Metadata validation.
//!
//! # Responsibilities
//! - Reject malformed objects before they reach the event stream
//! - Name the offending field in every failure
//!
//! # Design Decisions
//! - Pure functions: object → Result<(), ValidationError>
//! - Runs at ingestion time only, never on the request path
//! - Plugins are validated by actually compiling them with the script engine

use thiserror::Error;

use crate::meta::types::{Api, Cluster, Plugin, Routing, Server};
use crate::routing::runtime::ApiRuntime;
use crate::script::ScriptEngine;

/// Reason an object was refused.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// A required field is empty or zero.
    #[error("missing {0}")]
    Missing(&'static str),

    #[error("invalid traffic_rate {0}: must be in (0, 100]")]
    TrafficRate(u32),

    #[error("invalid url_pattern {pattern:?}: {reason}")]
    UrlPattern { pattern: String, reason: String },

    #[error("invalid url_rewrite {expr:?} on node {node}: {reason}")]
    UrlRewrite {
        node: usize,
        expr: String,
        reason: String,
    },

    #[error("invalid validation expression {expr:?} for parameter {parameter}: {reason}")]
    Expression {
        parameter: String,
        expr: String,
        reason: String,
    },

    #[error("plugin content rejected by runtime: {0}")]
    PluginRuntime(String),
}

pub fn validate_routing(value: &Routing) -> Result<(), ValidationError> {
    if value.api_id == 0 {
        return Err(ValidationError::Missing("api_id"));
    }
    if value.cluster_id == 0 {
        return Err(ValidationError::Missing("cluster_id"));
    }
    if value.name.is_empty() {
        return Err(ValidationError::Missing("name"));
    }
    if value.traffic_rate == 0 || value.traffic_rate > 100 {
        return Err(ValidationError::TrafficRate(value.traffic_rate));
    }
    Ok(())
}

pub fn validate_cluster(value: &Cluster) -> Result<(), ValidationError> {
    if value.name.is_empty() {
        return Err(ValidationError::Missing("name"));
    }
    Ok(())
}

pub fn validate_server(value: &Server) -> Result<(), ValidationError> {
    if value.addr.is_empty() {
        return Err(ValidationError::Missing("addr"));
    }
    if value.max_qps == 0 {
        return Err(ValidationError::Missing("max_qps"));
    }
    Ok(())
}

/// Validate an API, including every node's rewrite and rule expressions.
pub fn validate_api(value: &Api) -> Result<(), ValidationError> {
    if value.name.is_empty() {
        return Err(ValidationError::Missing("name"));
    }
    if value.url_pattern.is_empty() {
        return Err(ValidationError::Missing("url_pattern"));
    }
    ApiRuntime::compile(value)?;
    Ok(())
}

pub fn validate_plugin(value: &Plugin, engine: &dyn ScriptEngine) -> Result<(), ValidationError> {
    if value.name.is_empty() {
        return Err(ValidationError::Missing("name"));
    }
    if value.version == 0 {
        return Err(ValidationError::Missing("version"));
    }
    if value.content.is_empty() {
        return Err(ValidationError::Missing("content"));
    }
    engine
        .compile(value)
        .map_err(|e| ValidationError::PluginRuntime(e.to_string()))?;
    Ok(())
}
