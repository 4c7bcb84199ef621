//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe servers that carry a `health_check`
//! - Report Up/Down transitions as StatusChanged events

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::Request;
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::state::HealthTracker;
use crate::meta::Server;
use crate::routing::RoutingTable;
use crate::store::StatusNotifier;

pub struct HealthMonitor {
    table: Arc<RoutingTable>,
    notifier: StatusNotifier,
    config: HealthCheckConfig,
    tracker: HealthTracker,
    client: Client<HttpConnector, Body>,
    last_probe: HashMap<u64, Instant>,
}

impl HealthMonitor {
    pub fn new(table: Arc<RoutingTable>, notifier: StatusNotifier, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let tracker = HealthTracker::new(config.healthy_threshold, config.unhealthy_threshold);

        Self {
            table,
            notifier,
            config,
            tracker,
            client,
            last_probe: HashMap::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(interval = self.config.interval_secs, "Health monitor starting");

        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every server that is due and report transitions.
    pub async fn check_all(&mut self) {
        let snapshot = self.table.load();
        let now = Instant::now();

        let due: Vec<Server> = snapshot
            .servers()
            .filter(|server| match (&server.health_check, self.last_probe.get(&server.id)) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(check), Some(last)) => now.duration_since(*last) >= Duration::from_secs(check.interval_secs),
            })
            .cloned()
            .collect();

        self.tracker.retain(|id| snapshot.server(id).is_some_and(|s| s.health_check.is_some()));
        self.last_probe.retain(|id, _| snapshot.server(*id).is_some());

        let results = join_all(due.iter().map(|server| self.probe(server))).await;
        for (server, healthy) in due.iter().zip(results) {
            self.last_probe.insert(server.id, now);
            if let Some(status) = self.tracker.record(server.id, server.status, healthy) {
                tracing::info!(server = server.id, addr = %server.addr, status = %status, "Health transition");
                if !self.notifier.notify(server.id, status) {
                    tracing::warn!(server = server.id, "Event consumer gone, dropping status change");
                }
            }
        }
    }

    async fn probe(&self, server: &Server) -> bool {
        let Some(check) = &server.health_check else {
            return true;
        };
        let addr = &server.addr;
        let uri_string = format!("http://{}{}", addr, check.path);

        let request = match Request::builder()
            .method("GET")
            .uri(uri_string)
            .header("user-agent", "gateway-dispatch-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(server = server.id, error = %e, "Failed to build health check request");
                return false;
            }
        };

        let timeout = Duration::from_secs(check.timeout_secs.min(self.config.timeout_secs).max(1));
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(addr = %addr, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(addr = %addr, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(addr = %addr, "Health check failed: timeout");
                false
            }
        }
    }
}
