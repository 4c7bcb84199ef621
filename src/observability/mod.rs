//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Filters produce:
//!     → analysis.rs (per-server request/success/failure counters)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape)
//!     → Filters reading server statistics
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all log lines of a request
//! - Metrics are cheap (atomic increments)

pub mod analysis;
pub mod logging;
pub mod metrics;

pub use analysis::{Analysis, ServerStats};
pub use logging::init_logging;
