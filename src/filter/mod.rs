//! Filter chain subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway config [[filters]]
//!     → factory.rs (built-in table, or external.rs for loaded artifacts)
//!     → chain.rs (ordered, fixed for the gateway's lifetime)
//!
//! Per request:
//!     FilterContext (context.rs)
//!     → Pre on F1..Fn
//!     → upstream.rs (skipped when a filter already set a response)
//!     → Post on Fn..F1
//!     → failure anywhere: PostErr unwind in reverse order
//! ```
//!
//! # Design Decisions
//! - Every hook has a pass-through default; filters override what they need
//! - A status of 400 or above from `pre`/`post` is a rejection, like an error
//! - Retries belong inside filters; the chain itself never retries

pub mod builtin;
pub mod chain;
pub mod context;
pub mod external;
pub mod factory;
pub mod upstream;

use std::fmt::Debug;

use async_trait::async_trait;
use axum::http::StatusCode;

use crate::error::{GatewayError, GatewayResult};

pub use chain::FilterChain;
pub use context::{FilterContext, OriginRequest};
pub use external::{DylibFilterProvider, FilterProvider};
pub use factory::{FilterFactory, FilterOptions, FilterSpec};
pub use upstream::{HttpUpstream, Upstream};

/// Outcome of `pre` and `post`: a status, or an error carrying one.
pub type FilterResult = Result<StatusCode, GatewayError>;

/// A request/response processing unit in the chain.
#[async_trait]
pub trait Filter: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Configure the filter once, before it joins a chain.
    fn init(&mut self, _cfg: &str) -> GatewayResult<()> {
        Ok(())
    }

    /// Runs before the upstream call, in chain order.
    async fn pre(&self, _ctx: &mut FilterContext) -> FilterResult {
        Ok(StatusCode::OK)
    }

    /// Runs after a successful upstream call, in reverse chain order.
    async fn post(&self, _ctx: &mut FilterContext) -> FilterResult {
        Ok(StatusCode::OK)
    }

    /// Runs during the unwind after a failure.
    async fn post_err(&self, _ctx: &mut FilterContext, _status: StatusCode, _err: &GatewayError) {}
}

/// Statuses a hook may return without stopping the chain.
pub(crate) fn is_pass(status: StatusCode) -> bool {
    status.as_u16() < 400
}
