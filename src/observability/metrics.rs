//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, events, server status)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-API and per-filter counters
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by API and status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_events_total` (counter): applied store events by source and kind
//! - `gateway_server_status` (gauge): 1=up, 0=down
//! - `gateway_filter_rejections_total` (counter): requests refused by a filter
//! - `gateway_cache_hits_total` / `gateway_cache_misses_total` (counters)
//!
//! # Design Decisions
//! - Low-overhead metric updates through the `metrics` facade
//! - Without an installed recorder every call is a no-op (tests, `--check`)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::meta::Status;
use crate::store::{EventSource, EventType};

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(api: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "api" => api.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "api" => api.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_event(source: EventSource, kind: EventType, applied: bool) {
    metrics::counter!(
        "gateway_events_total",
        "source" => source.to_string(),
        "kind" => kind.to_string(),
        "applied" => if applied { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_server_status(server_id: u64, status: Status) {
    let value = match status {
        Status::Up => 1.0,
        Status::Down => 0.0,
    };
    metrics::gauge!("gateway_server_status", "server" => server_id.to_string()).set(value);
}

pub fn record_filter_rejection(filter: &str) {
    metrics::counter!("gateway_filter_rejections_total", "filter" => filter.to_string()).increment(1);
}

pub fn record_cache(hit: bool) {
    if hit {
        metrics::counter!("gateway_cache_hits_total").increment(1);
    } else {
        metrics::counter!("gateway_cache_misses_total").increment(1);
    }
}
