//! Startup orchestration.
//!
//! # Startup Order
//! ```text
//! GatewayConfig (validated)
//!     → store.load() → EventConsumer::load (first routing snapshot)
//!     → FilterFactory::build_chain
//!     → Dispatcher, HttpUpstream, Analysis
//!     → spawn: event consumer, store watcher, health monitor
//!     → HTTP server (traffic only once the table is populated)
//! ```
//!
//! # Design Decisions
//! - Fail fast: a bad store document or filter list is fatal at startup
//! - Everything that writes the routing table goes through one event channel

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::GatewayConfig;
use crate::error::GatewayResult;
use crate::filter::{FilterFactory, HttpUpstream};
use crate::health::HealthMonitor;
use crate::http::{AppState, HttpServer};
use crate::lifecycle::Shutdown;
use crate::observability::Analysis;
use crate::routing::{Dispatcher, EventConsumer, RoutingTable};
use crate::script::{RhaiEngine, ScriptEngine};
use crate::store::{Event, FileStore, StatusNotifier, Store};

/// A fully wired gateway that has not started serving yet.
pub struct Gateway {
    config: GatewayConfig,
    store: Arc<dyn Store>,
    consumer: EventConsumer,
    state: AppState,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl Gateway {
    /// Build a gateway reading its metadata from `config.store.meta_file`.
    pub fn build(config: GatewayConfig) -> GatewayResult<Self> {
        let engine: Arc<dyn ScriptEngine> = Arc::new(RhaiEngine::new());
        let store = Arc::new(FileStore::new(&config.store.meta_file, engine.clone()));
        Self::with_store(config, store, engine)
    }

    /// Build a gateway on top of any store.
    pub fn with_store(
        config: GatewayConfig,
        store: Arc<dyn Store>,
        engine: Arc<dyn ScriptEngine>,
    ) -> GatewayResult<Self> {
        let table = Arc::new(RoutingTable::new());
        let mut consumer = EventConsumer::new(table.clone(), engine);
        let applied = consumer.load(store.load()?);
        tracing::info!(events = applied, apis = table.load().api_count(), "Routing table loaded");

        let chain = FilterFactory::new(config.options.clone()).build_chain(&config.filters)?;
        tracing::info!(filters = ?chain.names(), "Filter chain built");

        let upstream = HttpUpstream::new(
            Duration::from_secs(config.timeouts.upstream_secs),
            config.listener.max_body_bytes,
        );

        let state = AppState {
            table,
            dispatcher: Arc::new(Dispatcher::new()),
            chain,
            upstream: Arc::new(upstream),
            analysis: Arc::new(Analysis::new()),
            max_body_bytes: config.listener.max_body_bytes,
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            store,
            consumer,
            state,
            events_tx,
            events_rx,
        })
    }

    pub fn table(&self) -> Arc<RoutingTable> {
        self.state.table.clone()
    }

    pub fn analysis(&self) -> Arc<Analysis> {
        self.state.analysis.clone()
    }

    /// Sender feeding the event consumer, for sources outside the store.
    pub fn events(&self) -> mpsc::UnboundedSender<Event> {
        self.events_tx.clone()
    }

    /// Start background tasks and serve until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> std::io::Result<()> {
        let Gateway {
            config,
            store,
            consumer,
            state,
            events_tx,
            events_rx,
        } = self;

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        tasks.push(tokio::spawn(consumer.run(events_rx, shutdown.subscribe())));

        if config.store.watch {
            let tx = events_tx.clone();
            let rx = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = store.watch(tx, rx).await {
                    tracing::error!(error = %e, "Store watcher stopped");
                }
            }));
        }

        if config.health_check.enabled {
            let monitor = HealthMonitor::new(
                state.table.clone(),
                StatusNotifier::new(events_tx.clone()),
                config.health_check.clone(),
            );
            tasks.push(tokio::spawn(monitor.run(shutdown.subscribe())));
        }
        drop(events_tx);

        let server = HttpServer::new(&config, state);
        let result = server.run(listener, shutdown.subscribe()).await;

        // the server may also stop on its own error
        shutdown.trigger();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task panicked");
            }
        }
        tracing::info!("Gateway stopped");
        result
    }
}
