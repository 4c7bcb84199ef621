//! Server health state machine.
//!
//! # State Transitions
//! ```text
//! Up → Down: consecutive failures >= unhealthy_threshold
//! Down → Up: consecutive successes >= healthy_threshold
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - The current status is the server's live status in the routing
//!   snapshot; only the counters live here
//! - Counters reset on state transition

use dashmap::DashMap;

use crate::meta::Status;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    successes: u32,
    failures: u32,
}

#[derive(Debug)]
pub struct HealthTracker {
    healthy_threshold: u32,
    unhealthy_threshold: u32,
    servers: DashMap<u64, Counters>,
}

impl HealthTracker {
    pub fn new(healthy_threshold: u32, unhealthy_threshold: u32) -> Self {
        Self {
            healthy_threshold: healthy_threshold.max(1),
            unhealthy_threshold: unhealthy_threshold.max(1),
            servers: DashMap::new(),
        }
    }

    /// Record one probe result. Returns the new status when the server
    /// crosses a threshold.
    pub fn record(&self, server_id: u64, current: Status, success: bool) -> Option<Status> {
        let mut counters = self.servers.entry(server_id).or_default();
        if success {
            counters.failures = 0;
            counters.successes += 1;
            if current == Status::Down && counters.successes >= self.healthy_threshold {
                *counters = Counters::default();
                return Some(Status::Up);
            }
        } else {
            counters.successes = 0;
            counters.failures += 1;
            if current == Status::Up && counters.failures >= self.unhealthy_threshold {
                *counters = Counters::default();
                return Some(Status::Down);
            }
        }
        None
    }

    /// Drop counters of servers no longer probed.
    pub fn retain(&self, keep: impl Fn(u64) -> bool) {
        self.servers.retain(|id, _| keep(*id));
    }

    pub fn tracked(&self) -> usize {
        self.servers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hysteresis() {
        let tracker = HealthTracker::new(2, 3);
        assert_eq!(tracker.record(1, Status::Up, false), None);
        assert_eq!(tracker.record(1, Status::Up, false), None);
        // a success in between resets the streak
        assert_eq!(tracker.record(1, Status::Up, true), None);
        assert_eq!(tracker.record(1, Status::Up, false), None);
        assert_eq!(tracker.record(1, Status::Up, false), None);
        assert_eq!(tracker.record(1, Status::Up, false), Some(Status::Down));

        assert_eq!(tracker.record(1, Status::Down, true), None);
        assert_eq!(tracker.record(1, Status::Down, true), Some(Status::Up));
    }

    #[test]
    fn test_no_transition_without_status_change() {
        let tracker = HealthTracker::new(1, 1);
        assert_eq!(tracker.record(1, Status::Up, true), None);
        assert_eq!(tracker.record(1, Status::Down, false), None);
    }

    #[test]
    fn test_retain() {
        let tracker = HealthTracker::new(1, 1);
        tracker.record(1, Status::Up, true);
        tracker.record(2, Status::Up, true);
        tracker.retain(|id| id == 2);
        assert_eq!(tracker.tracked(), 1);
    }
}
