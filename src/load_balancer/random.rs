//! Uniform random load balancing strategy.

use crate::load_balancer::{ActiveServers, LoadBalancer};
use crate::meta::Server;

#[derive(Debug, Default)]
pub struct Random;

impl LoadBalancer for Random {
    fn next_server<'a>(&self, actives: &'a ActiveServers) -> Option<&'a Server> {
        let servers = actives.as_slice();
        if servers.is_empty() {
            return None;
        }
        servers.get(fastrand::usize(..servers.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_server;

    #[test]
    fn test_random_covers_all() {
        let mut actives = ActiveServers::new();
        actives.insert(test_server(1, 1));
        actives.insert(test_server(2, 1));

        let mut seen = [false; 2];
        for _ in 0..200 {
            let id = Random.next_server(&actives).unwrap().id;
            seen[(id - 1) as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
