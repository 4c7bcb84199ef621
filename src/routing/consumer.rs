//! Event consumer: the single writer of the routing table.
//!
//! # Responsibilities
//! - Apply store events in arrival order
//! - Keep every cluster's active list equal to its Up binds
//! - Publish a new snapshot after each mutating event
//!
//! # Design Decisions
//! - Copy-on-write: clone the current snapshot, mutate, swap
//! - Events that change nothing never swap the pointer
//! - Unknown sources, mismatched payloads and bad keys are logged and ignored
//! - Status changes rebuild the whole bind table before the swap

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::meta::{AppliedPlugins, Bind, Server, Status};
use crate::observability::metrics;
use crate::routing::runtime::{ApiRuntime, CompiledPlugin};
use crate::routing::table::{BoundServer, ClusterBinds, RoutingSnapshot, RoutingTable};
use crate::script::ScriptEngine;
use crate::store::{Event, EventSource, EventType, EventValue, StoreSnapshot};

pub struct EventConsumer {
    table: Arc<RoutingTable>,
    engine: Arc<dyn ScriptEngine>,
}

impl EventConsumer {
    pub fn new(table: Arc<RoutingTable>, engine: Arc<dyn ScriptEngine>) -> Self {
        Self { table, engine }
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    /// Apply the initial store contents and publish a single snapshot.
    pub fn load(&mut self, initial: StoreSnapshot) -> usize {
        let mut next = (*self.table.load()).clone();
        let mut applied = 0;
        for event in initial.into_events() {
            if self.apply_to(&mut next, &event) {
                applied += 1;
            }
        }
        self.table.publish(next);
        tracing::info!(applied, "Initial routing state loaded");
        applied
    }

    /// Apply one event. Returns true if a new snapshot was published.
    pub fn apply(&mut self, event: Event) -> bool {
        let current = self.table.load();
        let mut next = (*current).clone();
        let changed = self.apply_to(&mut next, &event);
        if changed {
            self.table.publish(next);
            tracing::debug!(source = %event.source, kind = %event.kind, key = %event.key, "Event applied");
        }
        metrics::record_event(event.source, event.kind, changed);
        changed
    }

    /// Drain the event channel until it closes or shutdown fires.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Event consumer starting");
        loop {
            tokio::select! {
                next = events.recv() => match next {
                    Some(event) => {
                        self.apply(event);
                    }
                    None => {
                        tracing::info!("Event stream closed, consumer exiting");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Event consumer received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn apply_to(&self, next: &mut RoutingSnapshot, event: &Event) -> bool {
        match (event.source, event.kind, &event.value) {
            (EventSource::Unknown, _, _) => {
                tracing::warn!(key = %event.key, "Ignoring event from unknown source");
                false
            }

            (EventSource::Cluster, EventType::Delete, _) => self.with_id(event, |id| delete_cluster(next, id)),
            (EventSource::Cluster, _, Some(EventValue::Cluster(cluster))) => {
                if next.clusters.get(&cluster.id) == Some(cluster) {
                    return false;
                }
                next.clusters.insert(cluster.id, cluster.clone());
                true
            }

            (EventSource::Server, EventType::Delete, _) => self.with_id(event, |id| delete_server(next, id)),
            (EventSource::Server, _, Some(EventValue::Server(server))) => upsert_server(next, server),

            (EventSource::Bind, EventType::Delete, Some(EventValue::Bind(bind))) => delete_bind(next, bind),
            (EventSource::Bind, _, Some(EventValue::Bind(bind))) => insert_bind(next, bind),

            (EventSource::Api, EventType::Delete, _) => self.with_id(event, |id| {
                let removed = next.apis.remove(&id).is_some();
                if removed {
                    next.reorder_apis();
                }
                removed
            }),
            (EventSource::Api, _, Some(EventValue::Api(api))) => {
                if next.apis.get(&api.id).is_some_and(|a| &a.meta == api) {
                    return false;
                }
                match ApiRuntime::compile(api) {
                    Ok(runtime) => {
                        next.apis.insert(api.id, Arc::new(runtime));
                        next.reorder_apis();
                        true
                    }
                    Err(e) => {
                        tracing::warn!(api = api.id, error = %e, "Ignoring API that failed to compile");
                        false
                    }
                }
            }

            (EventSource::Routing, EventType::Delete, _) => {
                self.with_id(event, |id| next.routings.remove(&id).is_some())
            }
            (EventSource::Routing, _, Some(EventValue::Routing(routing))) => {
                if next.routings.get(&routing.id) == Some(routing) {
                    return false;
                }
                next.routings.insert(routing.id, routing.clone());
                true
            }

            (EventSource::Proxy, EventType::Delete, _) => next.proxies.remove(&event.key).is_some(),
            (EventSource::Proxy, _, Some(EventValue::Proxy(proxy))) => {
                next.proxies.insert(proxy.addr.clone(), proxy.clone()).as_ref() != Some(proxy)
            }

            (EventSource::Plugin, EventType::Delete, _) => {
                self.with_id(event, |id| next.plugins.remove(&id).is_some())
            }
            (EventSource::Plugin, _, Some(EventValue::Plugin(plugin))) => {
                if next.plugins.get(&plugin.id).is_some_and(|p| &p.meta == plugin) {
                    return false;
                }
                match self.engine.compile(plugin) {
                    Ok(script) => {
                        next.plugins.insert(
                            plugin.id,
                            CompiledPlugin {
                                meta: plugin.clone(),
                                script,
                            },
                        );
                        true
                    }
                    Err(e) => {
                        tracing::warn!(plugin = plugin.id, error = %e, "Ignoring plugin that failed to compile");
                        false
                    }
                }
            }

            (EventSource::AppliedPlugins, EventType::Delete, _) => {
                let changed = !next.applied.applied.is_empty();
                next.applied = AppliedPlugins::default();
                changed
            }
            (EventSource::AppliedPlugins, _, Some(EventValue::AppliedPlugins(applied))) => {
                if &next.applied == applied {
                    return false;
                }
                next.applied = applied.clone();
                true
            }

            (EventSource::StatusChanged, _, Some(EventValue::StatusChanged { server_id, status })) => {
                change_status(next, *server_id, *status)
            }

            _ => {
                tracing::warn!(
                    source = %event.source,
                    kind = %event.kind,
                    key = %event.key,
                    "Ignoring event with missing or mismatched payload"
                );
                false
            }
        }
    }

    fn with_id(&self, event: &Event, f: impl FnOnce(u64) -> bool) -> bool {
        match event.id() {
            Some(id) => f(id),
            None => {
                tracing::warn!(source = %event.source, key = %event.key, "Ignoring delete with unparsable key");
                false
            }
        }
    }
}

fn delete_cluster(next: &mut RoutingSnapshot, id: u64) -> bool {
    let removed = next.clusters.remove(&id).is_some();
    let unbound = next.binds.remove(&id).is_some();
    removed || unbound
}

fn upsert_server(next: &mut RoutingSnapshot, server: &Server) -> bool {
    let mut server = server.clone();
    if let Some(existing) = next.servers.get(&server.id) {
        // live status is owned by StatusChanged events
        server.status = existing.status;
        if existing == &server {
            return false;
        }
    }
    for cluster in next.binds.values_mut() {
        cluster.actives.refresh(&server);
    }
    next.servers.insert(server.id, server);
    true
}

fn delete_server(next: &mut RoutingSnapshot, id: u64) -> bool {
    if next.servers.remove(&id).is_none() {
        return false;
    }
    for cluster in next.binds.values_mut() {
        cluster.servers.retain(|b| b.server_id != id);
        cluster.actives.remove(id);
    }
    next.binds.retain(|_, cluster| !cluster.servers.is_empty());
    true
}

fn insert_bind(next: &mut RoutingSnapshot, bind: &Bind) -> bool {
    if !next.clusters.contains_key(&bind.cluster_id) {
        tracing::warn!(bind = %bind.key(), "Ignoring bind to unknown cluster");
        return false;
    }
    let Some(server) = next.servers.get(&bind.server_id) else {
        tracing::warn!(bind = %bind.key(), "Ignoring bind to unknown server");
        return false;
    };

    let cluster = next.binds.entry(bind.cluster_id).or_default();
    if cluster.is_bound(bind.server_id) {
        return false;
    }
    cluster.servers.push(BoundServer {
        server_id: server.id,
        status: server.status,
    });
    if server.status == Status::Up {
        cluster.actives.insert(server.clone());
    }
    true
}

fn delete_bind(next: &mut RoutingSnapshot, bind: &Bind) -> bool {
    let Some(cluster) = next.binds.get_mut(&bind.cluster_id) else {
        return false;
    };
    if !cluster.is_bound(bind.server_id) {
        return false;
    }
    cluster.servers.retain(|b| b.server_id != bind.server_id);
    cluster.actives.remove(bind.server_id);
    if cluster.servers.is_empty() {
        next.binds.remove(&bind.cluster_id);
    }
    true
}

fn change_status(next: &mut RoutingSnapshot, server_id: u64, status: Status) -> bool {
    let Some(server) = next.servers.get_mut(&server_id) else {
        tracing::warn!(server = server_id, "Ignoring status change for unknown server");
        return false;
    };
    if server.status == status {
        return false;
    }
    server.status = status;
    let server = server.clone();

    let rebuilt: HashMap<u64, ClusterBinds> = next
        .binds
        .iter()
        .map(|(&cluster_id, cluster)| {
            let mut cluster = cluster.clone();
            if let Some(bound) = cluster.servers.iter_mut().find(|b| b.server_id == server_id) {
                bound.status = status;
                match status {
                    Status::Up => cluster.actives.insert(server.clone()),
                    Status::Down => cluster.actives.remove(server_id),
                };
            }
            (cluster_id, cluster)
        })
        .collect();
    next.binds = rebuilt;

    tracing::info!(server = server_id, addr = %server.addr, status = %status, "Server status changed");
    metrics::record_server_status(server_id, status);
    true
}
