//! Weighted random load balancing strategy.
//!
//! Uses the cumulative weight table kept in `ActiveServers`; a pick is one
//! random draw plus a binary search.

use crate::load_balancer::{ActiveServers, LoadBalancer};
use crate::meta::Server;

#[derive(Debug, Default)]
pub struct WeightedRandom;

impl LoadBalancer for WeightedRandom {
    fn next_server<'a>(&self, actives: &'a ActiveServers) -> Option<&'a Server> {
        let total = actives.total_weight();
        if total == 0 {
            return None;
        }
        let point = fastrand::u64(..total);
        actives.as_slice().get(actives.index_for_weight(point))
    }
}
