//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Store events:
//!     Event stream
//!     → consumer.rs (single writer, copy-on-write apply)
//!     → table.rs (atomic snapshot swap)
//!
//! Inbound request:
//!     RoutingTable::load() → RoutingSnapshot (held for the whole request)
//!     → dispatcher.rs
//!         → matcher.rs (API by method and URL pattern)
//!         → traffic split (Routing rules)
//!         → load_balancer (server from the cluster's active list)
//!         → rewrite.rs (forwarded path)
//!     → DispatchNode
//! ```
//!
//! # Design Decisions
//! - Readers never block on the writer and never see a half-applied event
//! - APIs are compiled when their event is applied, not per request
//! - Deterministic precedence: more literal segments, more segments,
//!   no trailing wildcard, then lower API id

pub mod consumer;
pub mod dispatcher;
pub mod matcher;
pub mod rewrite;
pub mod runtime;
pub mod table;

pub use consumer::EventConsumer;
pub use dispatcher::{DispatchNode, DispatchRequest, Dispatcher};
pub use matcher::{PathParams, UrlPattern};
pub use runtime::{ApiRuntime, CompiledPlugin, NodeRuntime};
pub use table::{RoutingSnapshot, RoutingTable};
