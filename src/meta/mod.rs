//! Routing metadata subsystem.
//!
//! # Data Flow
//! ```text
//! config store object (Cluster, Server, Bind, Api, Routing, Plugin, ...)
//!     → validation.rs (pure contract checks)
//!     → store event (only if valid)
//!     → routing table (via the event consumer)
//! ```
//!
//! # Design Decisions
//! - Metadata types are plain data; runtime forms live in `routing`
//! - Numeric identities, `0` means "unset"
//! - Invalid configuration never enters live state

pub mod types;
pub mod validation;

pub use types::{
    Api, AppliedPlugins, Bind, CacheConf, CircuitBreakerConf, Cluster, HealthCheck,
    IpAccessControl, LoadBalance, NodeConf, Parameter, ParameterSource, Plugin, Proxy, Routing,
    RuleType, Server, Status, Validation, ValidationRule,
};
pub use validation::ValidationError;
