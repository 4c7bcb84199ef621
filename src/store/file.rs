//! TOML document store with hot reload.
//!
//! The whole routing state lives in one file laid out as a
//! [`StoreSnapshot`]. On change the file is re-read and validated, then
//! diffed against the last accepted document:
//!
//! ```text
//! upserts:  clusters → servers → binds → apis → routings → plugins → applied → proxies
//! deletes:  the same sources in reverse
//! ```
//!
//! An invalid document is rejected as a whole and the previous one stays
//! current.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use crate::error::{GatewayError, GatewayResult};
use crate::meta::validation::{validate_api, validate_cluster, validate_plugin, validate_routing, validate_server};
use crate::script::ScriptEngine;
use crate::store::{Event, EventSource, EventType, EventValue, Store, StoreSnapshot};

const RELOAD_DEBOUNCE: Duration = Duration::from_millis(200);

pub struct FileStore {
    path: PathBuf,
    engine: Arc<dyn ScriptEngine>,
    poll_interval: Duration,
    current: Mutex<StoreSnapshot>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>, engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            path: path.into(),
            engine,
            poll_interval: Duration::from_secs(2),
            current: Mutex::new(StoreSnapshot::default()),
        }
    }

    /// Poll interval for platforms without native file events.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read, parse and validate the document.
    fn read(&self) -> GatewayResult<StoreSnapshot> {
        let content = fs::read_to_string(&self.path)?;
        let doc: StoreSnapshot = toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("{}: {}", self.path.display(), e)))?;
        validate_document(&doc, self.engine.as_ref())?;
        Ok(doc)
    }

    /// Re-read the file and return the events that bring the last accepted
    /// document up to date with it.
    pub fn reload(&self) -> GatewayResult<Vec<Event>> {
        let next = self.read()?;
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let events = diff(&current, &next);
        *current = next;
        Ok(events)
    }
}

/// Validate every object in a document; the first failure rejects it.
pub fn validate_document(doc: &StoreSnapshot, engine: &dyn ScriptEngine) -> GatewayResult<()> {
    for cluster in &doc.clusters {
        validate_cluster(cluster)?;
    }
    for server in &doc.servers {
        validate_server(server)?;
    }
    for api in &doc.apis {
        validate_api(api)?;
    }
    for routing in &doc.routings {
        validate_routing(routing)?;
    }
    for plugin in &doc.plugins {
        validate_plugin(plugin, engine)?;
    }
    Ok(())
}

/// Upserts and deletes for one source.
fn diff_source<T: PartialEq>(
    old: &[T],
    new: &[T],
    key: impl Fn(&T) -> String,
    upsert: impl Fn(EventType, &T) -> Event,
    delete: impl Fn(&T) -> Event,
    upserts: &mut Vec<Event>,
) -> Vec<Event> {
    let before: HashMap<String, &T> = old.iter().map(|v| (key(v), v)).collect();
    let after: HashMap<String, &T> = new.iter().map(|v| (key(v), v)).collect();

    for value in new {
        match before.get(&key(value)) {
            None => upserts.push(upsert(EventType::New, value)),
            Some(previous) if *previous != value => upserts.push(upsert(EventType::Update, value)),
            Some(_) => {}
        }
    }
    old.iter()
        .filter(|v| !after.contains_key(&key(v)))
        .map(delete)
        .collect()
}

/// Events turning `old` into `new`.
pub(crate) fn diff(old: &StoreSnapshot, new: &StoreSnapshot) -> Vec<Event> {
    let mut upserts = Vec::new();
    let mut deletes = vec![
        diff_source(
            &old.clusters,
            &new.clusters,
            |v| v.id.to_string(),
            |kind, v| Event::new(EventSource::Cluster, kind, v.id.to_string(), EventValue::Cluster(v.clone())),
            |v| Event::delete(EventSource::Cluster, v.id.to_string()),
            &mut upserts,
        ),
        diff_source(
            &old.servers,
            &new.servers,
            |v| v.id.to_string(),
            |kind, v| Event::new(EventSource::Server, kind, v.id.to_string(), EventValue::Server(v.clone())),
            |v| Event::delete(EventSource::Server, v.id.to_string()),
            &mut upserts,
        ),
        diff_source(
            &old.binds,
            &new.binds,
            |v| v.key(),
            |kind, v| Event::new(EventSource::Bind, kind, v.key(), EventValue::Bind(*v)),
            |v| Event::delete_bind(*v),
            &mut upserts,
        ),
        diff_source(
            &old.apis,
            &new.apis,
            |v| v.id.to_string(),
            |kind, v| Event::new(EventSource::Api, kind, v.id.to_string(), EventValue::Api(v.clone())),
            |v| Event::delete(EventSource::Api, v.id.to_string()),
            &mut upserts,
        ),
        diff_source(
            &old.routings,
            &new.routings,
            |v| v.id.to_string(),
            |kind, v| Event::new(EventSource::Routing, kind, v.id.to_string(), EventValue::Routing(v.clone())),
            |v| Event::delete(EventSource::Routing, v.id.to_string()),
            &mut upserts,
        ),
        diff_source(
            &old.plugins,
            &new.plugins,
            |v| v.id.to_string(),
            |kind, v| Event::new(EventSource::Plugin, kind, v.id.to_string(), EventValue::Plugin(v.clone())),
            |v| Event::delete(EventSource::Plugin, v.id.to_string()),
            &mut upserts,
        ),
        diff_source(
            old.applied.as_slice(),
            new.applied.as_slice(),
            |_| "applied".to_string(),
            |kind, v| Event::new(EventSource::AppliedPlugins, kind, "applied", EventValue::AppliedPlugins(v.clone())),
            |_| Event::delete(EventSource::AppliedPlugins, "applied"),
            &mut upserts,
        ),
        diff_source(
            &old.proxies,
            &new.proxies,
            |v| v.addr.clone(),
            |kind, v| Event::new(EventSource::Proxy, kind, v.addr.clone(), EventValue::Proxy(v.clone())),
            |v| Event::delete(EventSource::Proxy, v.addr.clone()),
            &mut upserts,
        ),
    ];

    deletes.reverse();
    upserts.extend(deletes.into_iter().flatten());
    upserts
}

fn watch_err(e: notify::Error) -> GatewayError {
    GatewayError::Config(format!("file watch failed: {}", e))
}

#[async_trait]
impl Store for FileStore {
    fn load(&self) -> GatewayResult<StoreSnapshot> {
        let doc = self.read()?;
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = doc.clone();
        tracing::info!(path = %self.path.display(), "Store document loaded");
        Ok(doc)
    }

    async fn watch(
        &self,
        events: mpsc::UnboundedSender<Event>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> GatewayResult<()> {
        let (changed_tx, mut changed_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        let _ = changed_tx.send(());
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(self.poll_interval),
        )
        .map_err(watch_err)?;
        watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(watch_err)?;
        tracing::info!(path = %self.path.display(), "Store watcher started");

        loop {
            tokio::select! {
                Some(()) = changed_rx.recv() => {
                    // let the writer finish, then fold the burst into one reload
                    tokio::time::sleep(RELOAD_DEBOUNCE).await;
                    while changed_rx.try_recv().is_ok() {}
                    tracing::info!("Store document change detected, reloading...");
                    match self.reload() {
                        Ok(batch) => {
                            tracing::info!(events = batch.len(), "Store document reloaded");
                            for event in batch {
                                if events.send(event).is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload store document. Keeping current state.");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Store watcher received shutdown signal");
                    break;
                }
            }
        }
        Ok(())
    }
}
