//! Routing snapshot and the atomically swapped table holding it.
//!
//! # Design Decisions
//! - A snapshot is immutable once published; the event consumer clones,
//!   mutates and publishes a replacement
//! - Readers call `load()` once per request and keep that `Arc` to the end
//! - The bind table and every cluster's active list live in the same value,
//!   so they are always swapped together

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::load_balancer::ActiveServers;
use crate::meta::{AppliedPlugins, Cluster, Proxy, Routing, Server, Status};
use crate::routing::matcher::PathParams;
use crate::routing::runtime::{ApiRuntime, CompiledPlugin};

/// One bound server and the status the bind carries.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundServer {
    pub server_id: u64,
    pub status: Status,
}

/// Binds of one cluster plus its derived active list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterBinds {
    pub servers: Vec<BoundServer>,
    pub actives: ActiveServers,
}

impl ClusterBinds {
    pub fn is_bound(&self, server_id: u64) -> bool {
        self.servers.iter().any(|b| b.server_id == server_id)
    }
}

/// A complete, self-consistent view of routing state.
#[derive(Debug, Clone, Default)]
pub struct RoutingSnapshot {
    pub(crate) clusters: HashMap<u64, Cluster>,
    pub(crate) servers: HashMap<u64, Server>,
    pub(crate) binds: HashMap<u64, ClusterBinds>,
    pub(crate) apis: HashMap<u64, Arc<ApiRuntime>>,
    /// APIs in match precedence order.
    pub(crate) api_order: Vec<Arc<ApiRuntime>>,
    pub(crate) routings: HashMap<u64, Routing>,
    pub(crate) plugins: HashMap<u64, CompiledPlugin>,
    pub(crate) applied: AppliedPlugins,
    pub(crate) proxies: HashMap<String, Proxy>,
    pub(crate) version: u64,
}

impl RoutingSnapshot {
    /// Number of snapshots published before this one.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn cluster(&self, id: u64) -> Option<&Cluster> {
        self.clusters.get(&id)
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.values()
    }

    pub fn server(&self, id: u64) -> Option<&Server> {
        self.servers.get(&id)
    }

    pub fn servers(&self) -> impl Iterator<Item = &Server> {
        self.servers.values()
    }

    pub fn binds(&self, cluster_id: u64) -> Option<&ClusterBinds> {
        self.binds.get(&cluster_id)
    }

    /// Active servers of a cluster; empty for unknown or unbound clusters.
    pub fn actives(&self, cluster_id: u64) -> Option<&ActiveServers> {
        self.binds.get(&cluster_id).map(|b| &b.actives)
    }

    pub fn api(&self, id: u64) -> Option<&Arc<ApiRuntime>> {
        self.apis.get(&id)
    }

    pub fn api_count(&self) -> usize {
        self.apis.len()
    }

    /// First API in precedence order matching method and path.
    pub fn match_api(&self, method: &str, path: &str) -> Option<(Arc<ApiRuntime>, PathParams)> {
        self.api_order
            .iter()
            .find_map(|api| api.matches(method, path).map(|params| (api.clone(), params)))
    }

    pub fn routing(&self, id: u64) -> Option<&Routing> {
        self.routings.get(&id)
    }

    /// Traffic-split rules of an API, lowest id first.
    pub fn routings_for(&self, api_id: u64) -> Vec<&Routing> {
        let mut found: Vec<&Routing> = self.routings.values().filter(|r| r.api_id == api_id).collect();
        found.sort_by_key(|r| r.id);
        found
    }

    pub fn plugin(&self, id: u64) -> Option<&CompiledPlugin> {
        self.plugins.get(&id)
    }

    pub fn applied(&self) -> &AppliedPlugins {
        &self.applied
    }

    /// Applied plugins in order; ids with no loaded plugin are skipped.
    pub fn applied_plugins(&self) -> impl Iterator<Item = &CompiledPlugin> {
        self.applied.applied.iter().filter_map(|id| self.plugins.get(id))
    }

    pub fn proxies(&self) -> impl Iterator<Item = &Proxy> {
        self.proxies.values()
    }

    /// Check that every active list equals the Up binds of its cluster.
    pub fn is_consistent(&self) -> bool {
        self.binds.values().all(|cluster| {
            let expected = cluster.servers.iter().filter(|b| b.status == Status::Up);
            let mut expected: Vec<u64> = expected.map(|b| b.server_id).collect();
            let mut actual: Vec<u64> = cluster.actives.ids().collect();
            expected.sort_unstable();
            actual.sort_unstable();
            expected == actual
        })
    }

    /// Recompute `api_order` from `apis`.
    pub(crate) fn reorder_apis(&mut self) {
        let mut order: Vec<Arc<ApiRuntime>> = self.apis.values().cloned().collect();
        order.sort_by(|a, b| {
            b.pattern
                .specificity()
                .cmp(&a.pattern.specificity())
                .then_with(|| a.id().cmp(&b.id()))
        });
        self.api_order = order;
    }
}

/// Shared handle to the current snapshot.
///
/// Only the event consumer publishes; everything else reads.
#[derive(Debug)]
pub struct RoutingTable {
    current: ArcSwap<RoutingSnapshot>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::from_snapshot(RoutingSnapshot::default())
    }

    pub fn from_snapshot(snapshot: RoutingSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    /// Current snapshot; never blocks on the writer.
    pub fn load(&self) -> Arc<RoutingSnapshot> {
        self.current.load_full()
    }

    pub(crate) fn publish(&self, mut snapshot: RoutingSnapshot) {
        snapshot.version = self.current.load().version + 1;
        self.current.store(Arc::new(snapshot));
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}
