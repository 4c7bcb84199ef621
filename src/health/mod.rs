//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each server with a health_check
//!     → Update counters in state.rs
//!     → On transition: StatusNotifier → StatusChanged event → consumer
//!
//! State machine (state.rs):
//!     Up ←→ Down
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - The monitor never writes the routing table; status flows through the
//!   same event stream as store changes
//! - State transitions require consecutive successes/failures
//! - Health state is per-server, not per-cluster

pub mod active;
pub mod state;

pub use active::HealthMonitor;
pub use state::HealthTracker;
