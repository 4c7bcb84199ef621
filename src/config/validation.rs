//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the filter list can be built (names, artifact paths, duplicates)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::filter::FilterFactory;

/// One problem found in the gateway configuration.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("invalid socket address {:?}", config.listener.bind_address),
        ));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be greater than 0"));
    }

    let mut seen = HashSet::new();
    for (index, spec) in config.filters.iter().enumerate() {
        let field = format!("filters[{}]", index);
        if spec.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.name", field), "must not be empty"));
            continue;
        }
        if !seen.insert(FilterFactory::canonical_name(&spec.name)) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate filter {:?}", spec.name),
            ));
        }
        if spec.external {
            if spec.external_path.as_deref().map_or(true, str::is_empty) {
                errors.push(ValidationError::new(
                    format!("{}.external_path", field),
                    "external filters need an artifact path",
                ));
            }
        } else if !FilterFactory::is_builtin(&spec.name) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("unknown filter {:?}", spec.name),
            ));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.timeouts.upstream_secs == 0 {
        errors.push(ValidationError::new("timeouts.upstream_secs", "must be greater than 0"));
    }

    if config.store.meta_file.is_empty() {
        errors.push(ValidationError::new("store.meta_file", "must not be empty"));
    }

    let health = &config.health_check;
    if health.enabled {
        if health.interval_secs == 0 {
            errors.push(ValidationError::new("health_check.interval_secs", "must be greater than 0"));
        }
        if health.timeout_secs == 0 {
            errors.push(ValidationError::new("health_check.timeout_secs", "must be greater than 0"));
        }
        if health.unhealthy_threshold == 0 || health.healthy_threshold == 0 {
            errors.push(ValidationError::new("health_check", "thresholds must be greater than 0"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address {:?}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
