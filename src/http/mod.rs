//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, limits)
//!     → routing::Dispatcher (API, cluster, server, forwarded path)
//!     → request.rs (buffer body into OriginRequest)
//!     → filter::FilterChain (Pre → upstream → Post)
//!     → response.rs (client response or mapped error)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
