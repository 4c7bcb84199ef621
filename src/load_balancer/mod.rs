//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! API resolved → target cluster identified
//!     → ActiveServers (cluster's active list from the routing snapshot)
//!     → Apply the cluster's policy:
//!         - round_robin.rs (rotate through servers)
//!         - random.rs (uniform pick)
//!         - weighted.rs (weight-proportional pick)
//!     → Return server or None (empty active list)
//! ```
//!
//! # Design Decisions
//! - Balancers only keep selection state (counters); server lists live in the snapshot
//! - Down servers never appear in an active list, so balancers do no health filtering
//! - Weight tables are rebuilt by the event consumer, not per request
//! - Selection is O(1) (round robin, random) or O(log n) (weighted)

pub mod random;
pub mod round_robin;
pub mod weighted;

use std::fmt::Debug;

use crate::meta::{LoadBalance, Server};

pub use random::Random;
pub use round_robin::RoundRobin;
pub use weighted::WeightedRandom;

/// Trait for server selection strategies.
pub trait LoadBalancer: Send + Sync + Debug {
    /// Pick one server, or `None` if the list is empty.
    fn next_server<'a>(&self, actives: &'a ActiveServers) -> Option<&'a Server>;
}

/// Create the balancer for a cluster policy.
pub fn balancer_for(policy: LoadBalance) -> Box<dyn LoadBalancer> {
    match policy {
        LoadBalance::RoundRobin => Box::new(RoundRobin::new()),
        LoadBalance::Random => Box::new(Random),
        LoadBalance::WeightedRandom => Box::new(WeightedRandom),
    }
}

/// A cluster's active (Up) servers with a cumulative weight table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveServers {
    servers: Vec<Server>,
    cumulative: Vec<u64>,
}

impl ActiveServers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn as_slice(&self) -> &[Server] {
        &self.servers
    }

    pub fn contains(&self, server_id: u64) -> bool {
        self.servers.iter().any(|s| s.id == server_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.servers.iter().map(|s| s.id)
    }

    /// Add a server if absent. Returns true if the list changed.
    pub fn insert(&mut self, server: Server) -> bool {
        if self.contains(server.id) {
            return false;
        }
        self.servers.push(server);
        self.rebuild_weights();
        true
    }

    /// Remove a server if present. Returns true if the list changed.
    pub fn remove(&mut self, server_id: u64) -> bool {
        let before = self.servers.len();
        self.servers.retain(|s| s.id != server_id);
        if self.servers.len() == before {
            return false;
        }
        self.rebuild_weights();
        true
    }

    /// Replace the stored copy of a server that is already active.
    pub fn refresh(&mut self, server: &Server) {
        if let Some(slot) = self.servers.iter_mut().find(|s| s.id == server.id) {
            *slot = server.clone();
            self.rebuild_weights();
        }
    }

    pub(crate) fn total_weight(&self) -> u64 {
        self.cumulative.last().copied().unwrap_or(0)
    }

    /// Index of the server owning `point` in `[0, total_weight)`.
    pub(crate) fn index_for_weight(&self, point: u64) -> usize {
        self.cumulative.partition_point(|&upper| upper <= point)
    }

    fn rebuild_weights(&mut self) {
        let mut total = 0u64;
        self.cumulative = self
            .servers
            .iter()
            .map(|s| {
                // zero weight still gets a minimal share
                total += u64::from(s.weight.max(1));
                total
            })
            .collect();
    }
}

#[cfg(test)]
pub(crate) fn test_server(id: u64, weight: u32) -> Server {
    Server {
        id,
        addr: format!("127.0.0.1:{}", 9000 + id),
        max_qps: 100,
        weight,
        status: crate::meta::Status::Up,
        health_check: None,
        circuit_breaker: None,
    }
}
