//! In-process config store.
//!
//! Objects are validated on `put_*`; a refused object emits nothing. Each
//! accepted change emits exactly one event to every watcher, `New` or
//! `Update` depending on whether the identity was already stored.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::GatewayResult;
use crate::meta::validation::{validate_api, validate_cluster, validate_plugin, validate_routing, validate_server};
use crate::meta::{Api, AppliedPlugins, Bind, Cluster, Plugin, Proxy, Routing, Server};
use crate::script::ScriptEngine;
use crate::store::{Event, EventSource, EventType, EventValue, Store, StoreSnapshot};

#[derive(Debug, Default)]
struct State {
    clusters: BTreeMap<u64, Cluster>,
    servers: BTreeMap<u64, Server>,
    binds: Vec<Bind>,
    apis: BTreeMap<u64, Api>,
    routings: BTreeMap<u64, Routing>,
    plugins: BTreeMap<u64, Plugin>,
    applied: Option<AppliedPlugins>,
    proxies: BTreeMap<String, Proxy>,
}

fn kind(existed: bool) -> EventType {
    if existed {
        EventType::Update
    } else {
        EventType::New
    }
}

pub struct MemoryStore {
    engine: Arc<dyn ScriptEngine>,
    state: Mutex<State>,
    watchers: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
}

impl MemoryStore {
    pub fn new(engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            engine,
            state: Mutex::new(State::default()),
            watchers: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send to every live watcher, dropping closed ones.
    fn emit(&self, event: Event) {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.retain(|tx| tx.send(event.clone()).is_ok());
        tracing::debug!(source = %event.source, kind = %event.kind, key = %event.key, watchers = watchers.len(), "Store event emitted");
    }

    pub fn put_cluster(&self, cluster: Cluster) -> GatewayResult<()> {
        validate_cluster(&cluster)?;
        let existed = self.state().clusters.insert(cluster.id, cluster.clone()).is_some();
        self.emit(Event::new(EventSource::Cluster, kind(existed), cluster.id.to_string(), EventValue::Cluster(cluster)));
        Ok(())
    }

    /// Remove a cluster and its binds.
    pub fn remove_cluster(&self, id: u64) -> bool {
        let removed = {
            let mut state = self.state();
            state.binds.retain(|b| b.cluster_id != id);
            state.clusters.remove(&id).is_some()
        };
        if removed {
            self.emit(Event::delete(EventSource::Cluster, id.to_string()));
        }
        removed
    }

    pub fn put_server(&self, server: Server) -> GatewayResult<()> {
        validate_server(&server)?;
        let existed = self.state().servers.insert(server.id, server.clone()).is_some();
        self.emit(Event::new(EventSource::Server, kind(existed), server.id.to_string(), EventValue::Server(server)));
        Ok(())
    }

    /// Remove a server and its binds.
    pub fn remove_server(&self, id: u64) -> bool {
        let removed = {
            let mut state = self.state();
            state.binds.retain(|b| b.server_id != id);
            state.servers.remove(&id).is_some()
        };
        if removed {
            self.emit(Event::delete(EventSource::Server, id.to_string()));
        }
        removed
    }

    /// Store a bind; binding twice emits nothing.
    pub fn put_bind(&self, bind: Bind) -> bool {
        {
            let mut state = self.state();
            if state.binds.contains(&bind) {
                return false;
            }
            state.binds.push(bind);
        }
        self.emit(Event::new(EventSource::Bind, EventType::New, bind.key(), EventValue::Bind(bind)));
        true
    }

    pub fn remove_bind(&self, bind: Bind) -> bool {
        let removed = {
            let mut state = self.state();
            let before = state.binds.len();
            state.binds.retain(|b| *b != bind);
            state.binds.len() != before
        };
        if removed {
            self.emit(Event::delete_bind(bind));
        }
        removed
    }

    pub fn put_api(&self, api: Api) -> GatewayResult<()> {
        validate_api(&api)?;
        let existed = self.state().apis.insert(api.id, api.clone()).is_some();
        self.emit(Event::new(EventSource::Api, kind(existed), api.id.to_string(), EventValue::Api(api)));
        Ok(())
    }

    pub fn remove_api(&self, id: u64) -> bool {
        let removed = self.state().apis.remove(&id).is_some();
        if removed {
            self.emit(Event::delete(EventSource::Api, id.to_string()));
        }
        removed
    }

    pub fn put_routing(&self, routing: Routing) -> GatewayResult<()> {
        validate_routing(&routing)?;
        let existed = self.state().routings.insert(routing.id, routing.clone()).is_some();
        self.emit(Event::new(EventSource::Routing, kind(existed), routing.id.to_string(), EventValue::Routing(routing)));
        Ok(())
    }

    pub fn remove_routing(&self, id: u64) -> bool {
        let removed = self.state().routings.remove(&id).is_some();
        if removed {
            self.emit(Event::delete(EventSource::Routing, id.to_string()));
        }
        removed
    }

    pub fn put_plugin(&self, plugin: Plugin) -> GatewayResult<()> {
        validate_plugin(&plugin, self.engine.as_ref())?;
        let existed = self.state().plugins.insert(plugin.id, plugin.clone()).is_some();
        self.emit(Event::new(EventSource::Plugin, kind(existed), plugin.id.to_string(), EventValue::Plugin(plugin)));
        Ok(())
    }

    pub fn remove_plugin(&self, id: u64) -> bool {
        let removed = self.state().plugins.remove(&id).is_some();
        if removed {
            self.emit(Event::delete(EventSource::Plugin, id.to_string()));
        }
        removed
    }

    pub fn set_applied(&self, applied: AppliedPlugins) {
        let existed = self.state().applied.replace(applied.clone()).is_some();
        self.emit(Event::new(EventSource::AppliedPlugins, kind(existed), "applied", EventValue::AppliedPlugins(applied)));
    }

    pub fn clear_applied(&self) -> bool {
        let removed = self.state().applied.take().is_some();
        if removed {
            self.emit(Event::delete(EventSource::AppliedPlugins, "applied"));
        }
        removed
    }

    pub fn put_proxy(&self, proxy: Proxy) {
        let existed = self.state().proxies.insert(proxy.addr.clone(), proxy.clone()).is_some();
        self.emit(Event::new(EventSource::Proxy, kind(existed), proxy.addr.clone(), EventValue::Proxy(proxy)));
    }

    pub fn remove_proxy(&self, addr: &str) -> bool {
        let removed = self.state().proxies.remove(addr).is_some();
        if removed {
            self.emit(Event::delete(EventSource::Proxy, addr));
        }
        removed
    }

    /// Register a watcher without waiting for shutdown.
    pub fn subscribe(&self, tx: mpsc::UnboundedSender<Event>) {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner).push(tx);
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn load(&self) -> GatewayResult<StoreSnapshot> {
        let state = self.state();
        Ok(StoreSnapshot {
            clusters: state.clusters.values().cloned().collect(),
            servers: state.servers.values().cloned().collect(),
            binds: state.binds.clone(),
            apis: state.apis.values().cloned().collect(),
            routings: state.routings.values().cloned().collect(),
            plugins: state.plugins.values().cloned().collect(),
            applied: state.applied.clone(),
            proxies: state.proxies.values().cloned().collect(),
        })
    }

    async fn watch(
        &self,
        events: mpsc::UnboundedSender<Event>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> GatewayResult<()> {
        self.subscribe(events);
        tracing::info!("Memory store watcher registered");
        let _ = shutdown.recv().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::load_balancer::test_server;
    use crate::meta::LoadBalance;
    use crate::script::RhaiEngine;

    fn store() -> (MemoryStore, mpsc::UnboundedReceiver<Event>) {
        let store = MemoryStore::new(Arc::new(RhaiEngine::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        store.subscribe(tx);
        (store, rx)
    }

    fn cluster(id: u64) -> Cluster {
        Cluster {
            id,
            name: format!("cluster-{}", id),
            load_balance: LoadBalance::RoundRobin,
        }
    }

    #[test]
    fn test_new_then_update() {
        let (store, mut rx) = store();
        store.put_cluster(cluster(1)).unwrap();
        store.put_cluster(cluster(1)).unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!((first.source, first.kind), (EventSource::Cluster, EventType::New));
        assert_eq!(rx.try_recv().unwrap().kind, EventType::Update);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_invalid_object_emits_nothing() {
        let (store, mut rx) = store();
        let routing = Routing {
            id: 1,
            name: "canary".into(),
            api_id: 1,
            cluster_id: 2,
            traffic_rate: 150,
        };
        let err = store.put_routing(routing).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));

        let plugin = Plugin {
            id: 1,
            name: "broken".into(),
            version: 1,
            content: "fn pre(req) {".into(),
        };
        assert!(store.put_plugin(plugin).is_err());
        assert!(rx.try_recv().is_err());
        assert!(store.load().unwrap().routings.is_empty());
    }

    #[test]
    fn test_remove_cascades_binds_in_state() {
        let (store, mut rx) = store();
        store.put_cluster(cluster(1)).unwrap();
        store.put_server(test_server(2, 1)).unwrap();
        let bind = Bind {
            cluster_id: 1,
            server_id: 2,
        };
        assert!(store.put_bind(bind));
        assert!(!store.put_bind(bind));

        assert!(store.remove_server(2));
        assert!(!store.remove_server(2));
        assert!(store.load().unwrap().binds.is_empty());

        let kinds: Vec<(EventSource, EventType)> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| (e.source, e.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (EventSource::Cluster, EventType::New),
                (EventSource::Server, EventType::New),
                (EventSource::Bind, EventType::New),
                (EventSource::Server, EventType::Delete),
            ]
        );
    }

    #[test]
    fn test_closed_watchers_are_dropped() {
        let store = MemoryStore::new(Arc::new(RhaiEngine::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        store.subscribe(tx);
        drop(rx);
        store.put_cluster(cluster(1)).unwrap();
        assert!(store.watchers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_returns_on_shutdown() {
        let store = Arc::new(MemoryStore::new(Arc::new(RhaiEngine::new())));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let watcher = {
            let store = store.clone();
            tokio::spawn(async move { store.watch(tx, shutdown_rx).await })
        };
        tokio::task::yield_now().await;
        while store.watchers.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }

        store.put_proxy(Proxy {
            addr: "10.0.0.1:8080".into(),
            admin_addr: None,
        });
        assert_eq!(rx.recv().await.unwrap().source, EventSource::Proxy);

        shutdown_tx.send(()).unwrap();
        watcher.await.unwrap().unwrap();
    }
}
