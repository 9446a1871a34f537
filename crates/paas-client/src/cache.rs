//! Watch-fed resource caches.
//!
//! Three caches of identical shape, `namespace -> (name -> object)`, each
//! guarded by a reader/writer lock. A long-running worker per (kind,
//! namespace) decodes watch frames and applies them; an `INIT` frame forces a
//! namespace re-list, performed without holding the write lock.

use crate::models::{ConfigMap, EventType, ResourceEvent, Route, Service};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Consecutive silent worker failures tolerated before the process aborts.
const MAX_WORKER_ATTEMPTS: u32 = 10;
/// Pause between worker restarts after the frame channel went silent.
const WORKER_RESTART_DELAY: Duration = Duration::from_secs(120);

/// A resource kind that can live in a [`ResourceCache`].
pub trait CacheEntry: DeserializeOwned + Clone + Send + Sync + 'static {
    /// Resource segment in paas-mediation URLs.
    const KIND: &'static str;

    fn entry_name(&self) -> &str;
    fn entry_namespace(&self) -> &str;

    /// Whether an arriving object should be kept at all.
    fn retain(name: &str) -> bool {
        let _ = name;
        true
    }
}

impl CacheEntry for Route {
    const KIND: &'static str = "routes";

    fn entry_name(&self) -> &str {
        &self.metadata.name
    }

    fn entry_namespace(&self) -> &str {
        &self.metadata.namespace
    }
}

impl CacheEntry for Service {
    const KIND: &'static str = "services";

    fn entry_name(&self) -> &str {
        &self.metadata.name
    }

    fn entry_namespace(&self) -> &str {
        &self.metadata.namespace
    }
}

impl CacheEntry for ConfigMap {
    const KIND: &'static str = "configmaps";

    fn entry_name(&self) -> &str {
        &self.metadata.name
    }

    fn entry_namespace(&self) -> &str {
        &self.metadata.namespace
    }

    // Only two configmaps are ever read; everything else is dropped on
    // arrival to keep the cache small.
    fn retain(name: &str) -> bool {
        name == crate::PROJECT_TYPE_CONFIG_MAP || name == crate::TM_CONFIGS_CONFIG_MAP
    }
}

/// Per-kind, per-namespace in-memory map of cluster objects.
#[derive(Debug)]
pub struct ResourceCache<T> {
    entries: RwLock<HashMap<String, HashMap<String, T>>>,
}

impl<T: CacheEntry> ResourceCache<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn contains_namespace(&self, namespace: &str) -> bool {
        self.read().contains_key(namespace)
    }

    /// Snapshot copy of a namespace, `None` when the namespace is unknown.
    pub fn snapshot(&self, namespace: &str) -> Option<Vec<T>> {
        self.read()
            .get(namespace)
            .map(|by_name| by_name.values().cloned().collect())
    }

    /// Replace the whole namespace with a freshly listed set.
    pub fn replace_namespace(&self, namespace: &str, items: Vec<T>) {
        let mut by_name = HashMap::with_capacity(items.len());
        for item in items {
            if T::retain(item.entry_name()) {
                by_name.insert(item.entry_name().to_string(), item);
            }
        }
        self.write().insert(namespace.to_string(), by_name);
    }

    /// Apply a non-INIT watch event.
    pub fn apply(&self, event: &ResourceEvent<T>) {
        let namespace = event.object.entry_namespace();
        let name = event.object.entry_name();
        if !T::retain(name) {
            return;
        }
        let mut entries = self.write();
        let Some(by_name) = entries.get_mut(namespace) else {
            warn!(
                "Namespace {namespace} was not found in {} cache during {} update",
                T::KIND,
                event.event_type
            );
            return;
        };
        match event.event_type {
            EventType::Added | EventType::Created | EventType::Modified => {
                debug!(
                    "{}: renew {} {name} in namespace {namespace}",
                    event.event_type,
                    T::KIND
                );
                by_name.insert(name.to_string(), event.object.clone());
            }
            EventType::Deleted => {
                debug!("DELETED: remove {} {name} from namespace {namespace}", T::KIND);
                by_name.remove(name);
            }
            EventType::Init => {}
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, HashMap<String, T>>> {
        // Lock poisoning only happens when a writer panicked; the cache map
        // itself stays structurally valid, so keep serving.
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, HashMap<String, T>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: CacheEntry> Default for ResourceCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Async callback fired after a cache event was applied.
pub type EventCallback<T> =
    std::sync::Arc<dyn Fn(ResourceEvent<T>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Mutable list of event callbacks shared with running workers.
pub struct CallbackRegistry<T> {
    callbacks: RwLock<Vec<EventCallback<T>>>,
}

impl<T> std::fmt::Debug for CallbackRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry").finish_non_exhaustive()
    }
}

impl<T: Clone> CallbackRegistry<T> {
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, callback: EventCallback<T>) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    pub async fn fire(&self, event: ResourceEvent<T>) {
        let callbacks: Vec<EventCallback<T>> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for callback in callbacks {
            callback(event.clone()).await;
        }
    }
}

impl<T: Clone> Default for CallbackRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Re-lists a namespace on INIT. Runs the REST call without any cache lock
/// held and replaces the namespace afterwards.
pub type NamespaceLister =
    std::sync::Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Long-running frame consumer for one (kind, namespace) watch stream.
///
/// Decode failures are logged and skipped. When the channel goes silent the
/// worker restarts after a fixed pause; after ten consecutive silent failures
/// the process aborts; the supervisor is expected to restart it.
pub async fn run_watch_worker<T: CacheEntry>(
    cache: std::sync::Arc<ResourceCache<T>>,
    mut frames: mpsc::Receiver<Vec<u8>>,
    lister: NamespaceLister,
    last_update: std::sync::Arc<Mutex<Instant>>,
    callbacks: Option<std::sync::Arc<CallbackRegistry<T>>>,
) {
    let mut attempts_left = MAX_WORKER_ATTEMPTS;
    loop {
        while let Some(frame) = frames.recv().await {
            let event: ResourceEvent<T> = match serde_json::from_slice(&frame) {
                Ok(event) => event,
                Err(err) => {
                    error!("Error while unmarshalling {} update body: {err}", T::KIND);
                    continue;
                }
            };
            if event.event_type == EventType::Init {
                let namespace = event.object.entry_namespace().to_string();
                debug!("INIT: re-list {} cache for namespace {namespace}", T::KIND);
                lister(namespace).await;
            } else {
                cache.apply(&event);
            }
            if let Ok(mut stamp) = last_update.lock() {
                *stamp = Instant::now();
            }
            if let Some(registry) = &callbacks {
                registry.fire(event).await;
            }
            attempts_left = MAX_WORKER_ATTEMPTS;
        }

        attempts_left -= 1;
        if attempts_left == 0 {
            panic!("used all attempts to read {} watch channel", T::KIND);
        }
        error!(
            "{} watch channel went silent, restarting worker ({attempts_left} attempts left)",
            T::KIND
        );
        tokio::time::sleep(WORKER_RESTART_DELAY).await;
    }
}
