//! Config store client subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Store::load() → StoreSnapshot → EventConsumer::load (one publish)
//!
//! Runtime:
//!     memory.rs (validated put/remove) ─┐
//!     file.rs (watched TOML document)  ─┼→ Event channel → EventConsumer
//!     StatusNotifier (health monitor)  ─┘
//! ```
//!
//! # Design Decisions
//! - All producers share one unbounded channel, so events apply in arrival order
//! - Objects are validated before an event is emitted; the consumer never
//!   sees invalid configuration
//! - Status changes are synthesized locally and use the same channel

pub mod event;
pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::error::GatewayResult;
use crate::meta::{Api, AppliedPlugins, Bind, Cluster, Plugin, Proxy, Routing, Server, Status};

pub use event::{Event, EventSource, EventType, EventValue};
pub use file::FileStore;
pub use memory::MemoryStore;

/// Full store contents, as read at startup.
///
/// Also the on-disk layout of the file store document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub clusters: Vec<Cluster>,
    pub servers: Vec<Server>,
    pub binds: Vec<Bind>,
    pub apis: Vec<Api>,
    pub routings: Vec<Routing>,
    pub plugins: Vec<Plugin>,
    pub applied: Option<AppliedPlugins>,
    pub proxies: Vec<Proxy>,
}

impl StoreSnapshot {
    /// New events for every object, in dependency order.
    pub fn into_events(self) -> Vec<Event> {
        let mut events = Vec::new();
        for v in self.clusters {
            events.push(Event::new(EventSource::Cluster, EventType::New, v.id.to_string(), EventValue::Cluster(v)));
        }
        for v in self.servers {
            events.push(Event::new(EventSource::Server, EventType::New, v.id.to_string(), EventValue::Server(v)));
        }
        for v in self.binds {
            events.push(Event::new(EventSource::Bind, EventType::New, v.key(), EventValue::Bind(v)));
        }
        for v in self.apis {
            events.push(Event::new(EventSource::Api, EventType::New, v.id.to_string(), EventValue::Api(v)));
        }
        for v in self.routings {
            events.push(Event::new(EventSource::Routing, EventType::New, v.id.to_string(), EventValue::Routing(v)));
        }
        for v in self.plugins {
            events.push(Event::new(EventSource::Plugin, EventType::New, v.id.to_string(), EventValue::Plugin(v)));
        }
        if let Some(v) = self.applied {
            events.push(Event::new(EventSource::AppliedPlugins, EventType::New, "applied", EventValue::AppliedPlugins(v)));
        }
        for v in self.proxies {
            events.push(Event::new(EventSource::Proxy, EventType::New, v.addr.clone(), EventValue::Proxy(v)));
        }
        events
    }
}

/// Source of routing metadata.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read everything currently stored.
    fn load(&self) -> GatewayResult<StoreSnapshot>;

    /// Push change events into `events` until shutdown.
    async fn watch(
        &self,
        events: mpsc::UnboundedSender<Event>,
        shutdown: broadcast::Receiver<()>,
    ) -> GatewayResult<()>;
}

/// Handle for reporting server health transitions into the event stream.
#[derive(Debug, Clone)]
pub struct StatusNotifier {
    tx: mpsc::UnboundedSender<Event>,
}

impl StatusNotifier {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Queue a StatusChanged event. Returns false once the consumer is gone.
    pub fn notify(&self, server_id: u64, status: Status) -> bool {
        self.tx.send(Event::status_changed(server_id, status)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_in_dependency_order() {
        let doc: StoreSnapshot = toml::from_str(
            r#"
            [[proxies]]
            addr = "10.0.0.1:8080"

            [[binds]]
            cluster_id = 1
            server_id = 2

            [[servers]]
            id = 2
            addr = "127.0.0.1:9001"
            max_qps = 10

            [[clusters]]
            id = 1
            name = "users"

            [applied]
            applied = [3]
            "#,
        )
        .unwrap();

        let sources: Vec<EventSource> = doc.into_events().iter().map(|e| e.source).collect();
        assert_eq!(
            sources,
            vec![
                EventSource::Cluster,
                EventSource::Server,
                EventSource::Bind,
                EventSource::AppliedPlugins,
                EventSource::Proxy,
            ]
        );
    }

    #[test]
    fn test_notifier_reports_closed_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = StatusNotifier::new(tx);
        assert!(notifier.notify(4, Status::Down));
        assert_eq!(rx.try_recv().unwrap(), Event::status_changed(4, Status::Down));

        drop(rx);
        assert!(!notifier.notify(4, Status::Up));
    }
}
