//! Request dispatcher.
//!
//! # Responsibilities
//! - Match a request to an API
//! - Resolve traffic-split rules to a target cluster
//! - Pick an active server with the cluster's balancer
//! - Render the forwarded path
//!
//! # Design Decisions
//! - Works on one snapshot handed in by the caller; never touches the table
//! - Balancers are created lazily per (cluster, policy) and keep only counters
//! - Routing rules of an API are tried in id order, one draw per rule

use std::sync::Arc;

use axum::http::HeaderMap;
use dashmap::DashMap;
use rand::Rng;

use crate::error::{GatewayError, GatewayResult};
use crate::load_balancer::{balancer_for, LoadBalancer};
use crate::meta::{LoadBalance, Routing, Server};
use crate::routing::matcher::PathParams;
use crate::routing::rewrite::RewriteInput;
use crate::routing::runtime::{ApiRuntime, NodeRuntime};
use crate::routing::table::RoutingSnapshot;

/// The parts of an inbound request the dispatcher looks at.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
}

/// Where one request goes. Lives for that request only.
#[derive(Debug, Clone)]
pub struct DispatchNode {
    pub api: Arc<ApiRuntime>,
    pub cluster_id: u64,
    /// Routing rule that diverted the request, if any.
    pub routing_id: Option<u64>,
    pub server: Server,
    /// Forwarded path including the query string.
    pub path: String,
    pub params: PathParams,
}

impl DispatchNode {
    /// Node whose rewrite and validation rules apply to this request.
    pub fn node(&self) -> Option<&NodeRuntime> {
        self.api.default_node()
    }
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    balancers: DashMap<(u64, LoadBalance), Arc<dyn LoadBalancer>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&self, snapshot: &RoutingSnapshot, req: &DispatchRequest<'_>) -> GatewayResult<DispatchNode> {
        let (api, params) = snapshot
            .match_api(req.method, req.path)
            .ok_or_else(|| GatewayError::NotFound {
                method: req.method.to_string(),
                path: req.path.to_string(),
            })?;

        let diverted = divert(&snapshot.routings_for(api.id()));
        let cluster_id = match diverted {
            Some(routing) => routing.cluster_id,
            None => api
                .default_node()
                .map(|n| n.cluster_id)
                .ok_or(GatewayError::NoDispatchNode(api.id()))?,
        };

        let cluster = snapshot
            .cluster(cluster_id)
            .ok_or(GatewayError::ClusterNotFound(cluster_id))?;
        let server = snapshot
            .actives(cluster_id)
            .and_then(|actives| self.balancer(cluster_id, cluster.load_balance).next_server(actives))
            .cloned()
            .ok_or(GatewayError::NoAvailableServer { cluster: cluster_id })?;

        let path = match api.default_node().and_then(|n| n.rewrite.as_ref()) {
            Some(template) => template.render(&RewriteInput {
                path: req.path,
                query: req.query,
                params: &params,
                headers: req.headers,
            }),
            None => match req.query.filter(|q| !q.is_empty()) {
                Some(query) => format!("{}?{}", req.path, query),
                None => req.path.to_string(),
            },
        };

        tracing::debug!(
            api = api.id(),
            cluster = cluster_id,
            server = server.id,
            path = %path,
            "Request dispatched"
        );

        Ok(DispatchNode {
            api,
            cluster_id,
            routing_id: diverted.map(|r| r.id),
            server,
            path,
            params,
        })
    }

    fn balancer(&self, cluster_id: u64, policy: LoadBalance) -> Arc<dyn LoadBalancer> {
        self.balancers
            .entry((cluster_id, policy))
            .or_insert_with(|| Arc::from(balancer_for(policy)))
            .clone()
    }
}

/// First rule whose draw in `[0, 100)` falls under its traffic rate.
fn divert<'a>(routings: &[&'a Routing]) -> Option<&'a Routing> {
    let mut rng = rand::thread_rng();
    routings
        .iter()
        .copied()
        .find(|routing| rng.gen_range(0..100) < routing.traffic_rate)
}
