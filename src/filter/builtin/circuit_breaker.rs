//! Per-server circuit breaker.
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: open_timeout_secs elapsed, one trial request let through
//! Half-Open → Closed: trial request succeeds
//! Half-Open → Open: trial request fails
//! ```
//!
//! Servers without `circuit_breaker` settings are never tripped. A 5xx
//! upstream response or an upstream error counts as a failure.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::StatusCode;
use dashmap::DashMap;

use crate::error::GatewayError;
use crate::filter::{Filter, FilterContext, FilterResult};
use crate::meta::CircuitBreakerConf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Circuit {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { probing: bool },
}

/// Set on the request that holds a half-open trial slot.
const TRIAL_ATTR: &str = "circuit_breaker.trial";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Pass,
    Trial,
    Reject,
}

#[derive(Debug, Default)]
pub struct CircuitBreakerFilter {
    circuits: DashMap<u64, Circuit>,
}

impl CircuitBreakerFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a request may go to the server now, and whether it is the trial request.
    fn admit(&self, server_id: u64, conf: &CircuitBreakerConf) -> Admission {
        let mut circuit = self
            .circuits
            .entry(server_id)
            .or_insert(Circuit::Closed { failures: 0 });
        match *circuit {
            Circuit::Closed { .. } => Admission::Pass,
            Circuit::Open { since } => {
                if since.elapsed() >= Duration::from_secs(conf.open_timeout_secs) {
                    tracing::info!(server = server_id, "Circuit half-open, probing");
                    *circuit = Circuit::HalfOpen { probing: true };
                    Admission::Trial
                } else {
                    Admission::Reject
                }
            }
            Circuit::HalfOpen { probing: true } => Admission::Reject,
            Circuit::HalfOpen { probing: false } => {
                *circuit = Circuit::HalfOpen { probing: true };
                Admission::Trial
            }
        }
    }

    fn on_success(&self, server_id: u64) {
        if let Some(mut circuit) = self.circuits.get_mut(&server_id) {
            if matches!(*circuit, Circuit::HalfOpen { .. }) {
                tracing::info!(server = server_id, "Circuit closed");
            }
            *circuit = Circuit::Closed { failures: 0 };
        }
    }

    fn on_failure(&self, server_id: u64, conf: &CircuitBreakerConf) {
        let mut circuit = self
            .circuits
            .entry(server_id)
            .or_insert(Circuit::Closed { failures: 0 });
        let next = match *circuit {
            Circuit::Closed { failures } if failures + 1 >= conf.failure_threshold => Circuit::Open {
                since: Instant::now(),
            },
            Circuit::Closed { failures } => Circuit::Closed { failures: failures + 1 },
            Circuit::HalfOpen { .. } => Circuit::Open { since: Instant::now() },
            open @ Circuit::Open { .. } => open,
        };
        if matches!(next, Circuit::Open { .. }) && !matches!(*circuit, Circuit::Open { .. }) {
            tracing::warn!(server = server_id, "Circuit opened");
        }
        *circuit = next;
    }

    /// Give back a half-open trial request that never reached the server.
    fn release(&self, server_id: u64) {
        if let Some(mut circuit) = self.circuits.get_mut(&server_id) {
            if *circuit == (Circuit::HalfOpen { probing: true }) {
                *circuit = Circuit::HalfOpen { probing: false };
            }
        }
    }
}

#[async_trait]
impl Filter for CircuitBreakerFilter {
    fn name(&self) -> &str {
        "circuit-breaker"
    }

    async fn pre(&self, ctx: &mut FilterContext) -> FilterResult {
        let server_id = ctx.server().id;
        let Some(conf) = ctx.server().circuit_breaker.clone() else {
            return Ok(StatusCode::OK);
        };
        match self.admit(server_id, &conf) {
            Admission::Pass => Ok(StatusCode::OK),
            Admission::Trial => {
                ctx.set_attr(TRIAL_ATTR, true);
                Ok(StatusCode::OK)
            }
            Admission::Reject => Err(GatewayError::filter(
                self.name(),
                StatusCode::SERVICE_UNAVAILABLE,
                format!("circuit open for server {}", server_id),
            )),
        }
    }

    async fn post(&self, ctx: &mut FilterContext) -> FilterResult {
        let server = ctx.server();
        let Some(conf) = &server.circuit_breaker else {
            return Ok(StatusCode::OK);
        };
        match ctx.response.as_ref() {
            Some(response) if response.status().is_server_error() => self.on_failure(server.id, conf),
            _ => self.on_success(server.id),
        }
        Ok(StatusCode::OK)
    }

    async fn post_err(&self, ctx: &mut FilterContext, _status: StatusCode, err: &GatewayError) {
        let server = ctx.server();
        let Some(conf) = &server.circuit_breaker else {
            return;
        };
        match err {
            GatewayError::Upstream(_) | GatewayError::UpstreamTimeout(_) => self.on_failure(server.id, conf),
            _ if ctx.has_attr(TRIAL_ATTR) => self.release(server.id),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::context::test_support::context_on;
    use crate::load_balancer::test_server;

    fn conf(threshold: u32, open_secs: u64) -> CircuitBreakerConf {
        CircuitBreakerConf {
            failure_threshold: threshold,
            open_timeout_secs: open_secs,
        }
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = CircuitBreakerFilter::new();
        let conf = conf(3, 60);
        for _ in 0..2 {
            assert_ne!(breaker.admit(1, &conf), Admission::Reject);
            breaker.on_failure(1, &conf);
        }
        assert_ne!(breaker.admit(1, &conf), Admission::Reject);
        breaker.on_failure(1, &conf);
        assert_eq!(breaker.admit(1, &conf), Admission::Reject);
        // other servers unaffected
        assert_ne!(breaker.admit(2, &conf), Admission::Reject);
    }

    #[test]
    fn test_success_resets_failures() {
        let breaker = CircuitBreakerFilter::new();
        let conf = conf(2, 60);
        breaker.on_failure(1, &conf);
        breaker.on_success(1);
        breaker.on_failure(1, &conf);
        assert_ne!(breaker.admit(1, &conf), Admission::Reject);
    }

    #[test]
    fn test_half_open_single_trial() {
        let breaker = CircuitBreakerFilter::new();
        let conf = conf(1, 0);
        breaker.on_failure(1, &conf);

        // timeout of zero: first request becomes the trial request
        assert_ne!(breaker.admit(1, &conf), Admission::Reject);
        assert_eq!(breaker.admit(1, &conf), Admission::Reject);

        breaker.release(1);
        assert_ne!(breaker.admit(1, &conf), Admission::Reject);
        breaker.on_success(1);
        assert_ne!(breaker.admit(1, &conf), Admission::Reject);
        assert_ne!(breaker.admit(1, &conf), Admission::Reject);
    }

    #[test]
    fn test_failed_trial_reopens() {
        let breaker = CircuitBreakerFilter::new();
        let conf = conf(1, 0);
        breaker.on_failure(1, &conf);
        assert_ne!(breaker.admit(1, &conf), Admission::Reject);
        breaker.on_failure(1, &conf);
        assert!(matches!(*breaker.circuits.get(&1).unwrap(), Circuit::Open { .. }));
    }

    #[tokio::test]
    async fn test_server_without_settings_never_trips() {
        let filter = CircuitBreakerFilter::new();
        filter.on_failure(1, &conf(1, 60));
        assert_eq!(filter.admit(1, &conf(1, 60)), Admission::Reject);

        // test_server carries no breaker settings
        let mut ctx = crate::filter::context::test_support::context("/items/1");
        assert_eq!(filter.pre(&mut ctx).await.unwrap(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rejected_request_keeps_trial_slot() {
        let filter = CircuitBreakerFilter::new();
        let conf = conf(1, 0);
        filter.on_failure(1, &conf);

        let mut server = test_server(1, 1);
        server.circuit_breaker = Some(conf.clone());
        let mut trial = context_on(server.clone(), "/items/1");
        let mut second = context_on(server.clone(), "/items/1");
        let mut third = context_on(server.clone(), "/items/1");

        assert!(filter.pre(&mut trial).await.is_ok());
        let err = filter.pre(&mut second).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        filter.post_err(&mut second, err.status_code(), &err).await;

        // the trial request is still in flight
        assert!(filter.pre(&mut third).await.is_err());

        // a later filter cancels the trial request: the slot is handed back
        let cancelled = GatewayError::filter("validation", StatusCode::BAD_REQUEST, "bad id");
        filter.post_err(&mut trial, cancelled.status_code(), &cancelled).await;
        let mut next = context_on(server, "/items/1");
        assert!(filter.pre(&mut next).await.is_ok());
    }
}
