//! API gateway dispatch core.
//!
//! Routing metadata (clusters, servers, APIs, routings, plugins) arrives as
//! events and is folded into an immutable snapshot; each request is matched,
//! balanced and run through an ordered filter chain around the upstream call.

// Metadata and routing
pub mod meta;
pub mod routing;
pub mod store;

// Request path
pub mod filter;
pub mod http;
pub mod load_balancer;
pub mod script;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use http::HttpServer;
pub use lifecycle::{Gateway, Shutdown};
