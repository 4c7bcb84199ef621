//! Per-server request analysis.
//!
//! # Responsibilities
//! - Count requests, successes, failures and rejections per server
//! - Accumulate upstream latency
//!
//! # Design Decisions
//! - Lock-free counters (atomics) inside a `DashMap` entry per server
//! - Shared by every request context through an `Arc`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

#[derive(Debug, Default)]
struct ServerCounters {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
    latency_micros: AtomicU64,
}

/// Point-in-time copy of one server's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
    pub latency_micros: u64,
}

impl ServerStats {
    /// Mean latency of completed requests.
    pub fn average_latency(&self) -> Duration {
        let completed = self.successes + self.failures;
        if completed == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.latency_micros / completed)
    }
}

#[derive(Debug, Default)]
pub struct Analysis {
    servers: DashMap<u64, ServerCounters>,
}

impl Analysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, server_id: u64) {
        self.servers.entry(server_id).or_default().requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn success(&self, server_id: u64, latency: Duration) {
        let entry = self.servers.entry(server_id).or_default();
        entry.successes.fetch_add(1, Ordering::Relaxed);
        entry.latency_micros.fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn failure(&self, server_id: u64, latency: Duration) {
        let entry = self.servers.entry(server_id).or_default();
        entry.failures.fetch_add(1, Ordering::Relaxed);
        entry.latency_micros.fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// A request refused by a filter before reaching the server.
    pub fn rejection(&self, server_id: u64) {
        self.servers.entry(server_id).or_default().rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self, server_id: u64) -> ServerStats {
        self.servers
            .get(&server_id)
            .map(|c| ServerStats {
                requests: c.requests.load(Ordering::Relaxed),
                successes: c.successes.load(Ordering::Relaxed),
                failures: c.failures.load(Ordering::Relaxed),
                rejections: c.rejections.load(Ordering::Relaxed),
                latency_micros: c.latency_micros.load(Ordering::Relaxed),
            })
            .unwrap_or_default()
    }
}
