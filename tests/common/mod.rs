//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    http::{Method, StatusCode, Uri},
    response::IntoResponse,
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use gateway_dispatch::config::GatewayConfig;
use gateway_dispatch::filter::FilterSpec;
use gateway_dispatch::meta::{Api, Bind, Cluster, LoadBalance, NodeConf, Server, Status};
use gateway_dispatch::routing::RoutingTable;
use gateway_dispatch::script::{RhaiEngine, ScriptEngine};
use gateway_dispatch::store::{Event, MemoryStore};
use gateway_dispatch::{Gateway, Shutdown};

/// Start a backend answering `"{name} {method} {uri} {body}"` with header `x-backend: name`.
pub async fn start_backend(name: &'static str) -> SocketAddr {
    let app = Router::new().fallback(move |method: Method, uri: Uri, body: Bytes| async move {
        let text = format!("{} {} {} {}", name, method, uri, String::from_utf8_lossy(&body));
        ([("x-backend", name)], text)
    });
    serve(app).await
}

/// Start a backend that always answers `status`.
pub async fn start_status_backend(status: u16) -> SocketAddr {
    let app = Router::new().fallback(move || async move {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, "backend says no").into_response()
    });
    serve(app).await
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Config with the given built-in filters and no background probing.
pub fn config(filters: &[&str]) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.filters = filters.iter().map(|name| FilterSpec::builtin(*name)).collect();
    config.store.watch = false;
    config.health_check.enabled = false;
    config.observability.metrics_enabled = false;
    config.timeouts.upstream_secs = 2;
    config
}

pub fn engine() -> Arc<dyn ScriptEngine> {
    Arc::new(RhaiEngine::new())
}

pub fn cluster(id: u64) -> Cluster {
    Cluster {
        id,
        name: format!("cluster-{}", id),
        load_balance: LoadBalance::RoundRobin,
    }
}

pub fn server(id: u64, addr: SocketAddr) -> Server {
    Server {
        id,
        addr: addr.to_string(),
        max_qps: 1000,
        weight: 1,
        status: Status::Up,
        health_check: None,
        circuit_breaker: None,
    }
}

pub fn api(id: u64, url_pattern: &str, cluster_id: u64) -> Api {
    Api {
        id,
        name: format!("api-{}", id),
        url_pattern: url_pattern.into(),
        method: "*".into(),
        status: Status::Up,
        nodes: vec![NodeConf {
            cluster_id,
            url_rewrite: None,
            validations: Vec::new(),
        }],
        ip_access: None,
        cache: None,
    }
}

/// Store with one cluster per entry of `backends`, each holding one server.
pub fn store_with(backends: &[SocketAddr]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new(engine()));
    for (i, addr) in backends.iter().enumerate() {
        let id = i as u64 + 1;
        store.put_cluster(cluster(id)).unwrap();
        store.put_server(server(10 + id, *addr)).unwrap();
        store.put_bind(Bind {
            cluster_id: id,
            server_id: 10 + id,
        });
    }
    store
}

/// A gateway serving on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub table: Arc<RoutingTable>,
    pub events: tokio::sync::mpsc::UnboundedSender<Event>,
    shutdown: Shutdown,
    handle: JoinHandle<std::io::Result<()>>,
}

impl TestGateway {
    pub async fn start(config: GatewayConfig, store: Arc<MemoryStore>) -> Self {
        let gateway = Gateway::with_store(config, store, engine()).unwrap();
        let table = gateway.table();
        let events = gateway.events();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { gateway.run(listener, &shutdown).await })
        };

        Self {
            addr,
            table,
            events,
            shutdown,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Send an event and wait until the table has moved on.
    pub async fn apply(&self, event: Event) {
        let before = self.table.load().version();
        self.events.send(event).unwrap();
        wait_until(|| self.table.load().version() > before).await;
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let result = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))), "gateway did not stop cleanly");
    }
}

pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
