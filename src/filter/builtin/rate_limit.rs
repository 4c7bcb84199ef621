//! Per-server rate limiting.
//!
//! One token bucket per server, sized by `Server::max_qps`: capacity and
//! refill rate are both `max_qps`. A server update that changes `max_qps`
//! starts a fresh bucket.

use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use axum::http::StatusCode;
use dashmap::DashMap;

use crate::error::GatewayError;
use crate::filter::{Filter, FilterContext, FilterResult};

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct ServerBucket {
    max_qps: u32,
    bucket: Mutex<TokenBucket>,
}

#[derive(Debug, Default)]
pub struct RateLimitingFilter {
    buckets: DashMap<u64, ServerBucket>,
}

impl RateLimitingFilter {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, server_id: u64, max_qps: u32) -> bool {
        let capacity = f64::from(max_qps);
        let mut entry = self.buckets.entry(server_id).or_insert_with(|| ServerBucket {
            max_qps,
            bucket: Mutex::new(TokenBucket::new(capacity)),
        });
        if entry.max_qps != max_qps {
            *entry = ServerBucket {
                max_qps,
                bucket: Mutex::new(TokenBucket::new(capacity)),
            };
        }
        let mut bucket = entry.bucket.lock().unwrap_or_else(|e| e.into_inner());
        bucket.try_acquire(capacity, capacity)
    }
}

#[async_trait]
impl Filter for RateLimitingFilter {
    fn name(&self) -> &str {
        "rate-limiting"
    }

    async fn pre(&self, ctx: &mut FilterContext) -> FilterResult {
        let server = ctx.server();
        if server.max_qps == 0 {
            return Ok(StatusCode::OK);
        }
        if self.check(server.id, server.max_qps) {
            Ok(StatusCode::OK)
        } else {
            tracing::warn!(server = server.id, max_qps = server.max_qps, "Rate limit exceeded");
            Err(GatewayError::filter(
                self.name(),
                StatusCode::TOO_MANY_REQUESTS,
                format!("server {} is over {} qps", server.id, server.max_qps),
            ))
        }
    }
}
