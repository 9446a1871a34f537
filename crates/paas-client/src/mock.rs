//! Mock paas-mediation transport for unit testing.
//!
//! Stores resources in memory and records every mutation so tests can assert
//! exactly which cluster calls a pass issued, without a running mediation
//! service.

use crate::error::PaasError;
use crate::models::{ConfigMap, Route, Service};
use crate::rest::PaasApi;
use crate::watch::{init_frame, WatchConnector, WATCH_CHANNEL_CAPACITY};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Store<T> = Arc<Mutex<HashMap<String, HashMap<String, T>>>>;

/// In-memory [`PaasApi`] with mutation recording.
#[derive(Clone, Default)]
pub struct MockPaasApi {
    routes: Store<Route>,
    services: Store<Service>,
    config_maps: Store<ConfigMap>,
    created_routes: Arc<Mutex<Vec<(String, Route)>>>,
    deleted_routes: Arc<Mutex<Vec<(String, String)>>>,
    created_services: Arc<Mutex<Vec<(String, Service)>>>,
    deleted_services: Arc<Mutex<Vec<(String, String)>>>,
}

impl std::fmt::Debug for MockPaasApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPaasApi").finish_non_exhaustive()
    }
}

impl MockPaasApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_route(&self, namespace: &str, route: Route) {
        lock(&self.routes)
            .entry(namespace.to_string())
            .or_default()
            .insert(route.metadata.name.clone(), route);
    }

    pub fn put_service(&self, namespace: &str, service: Service) {
        lock(&self.services)
            .entry(namespace.to_string())
            .or_default()
            .insert(service.metadata.name.clone(), service);
    }

    pub fn put_config_map(&self, namespace: &str, config_map: ConfigMap) {
        lock(&self.config_maps)
            .entry(namespace.to_string())
            .or_default()
            .insert(config_map.metadata.name.clone(), config_map);
    }

    /// Routes created through the API, in call order, as (namespace, route).
    pub fn created_routes(&self) -> Vec<(String, Route)> {
        lock_vec(&self.created_routes)
    }

    /// Routes deleted through the API, in call order, as (namespace, name).
    pub fn deleted_routes(&self) -> Vec<(String, String)> {
        lock_vec(&self.deleted_routes)
    }

    pub fn created_services(&self) -> Vec<(String, Service)> {
        lock_vec(&self.created_services)
    }

    pub fn deleted_services(&self) -> Vec<(String, String)> {
        lock_vec(&self.deleted_services)
    }

    pub fn clear_recorded(&self) {
        self.created_routes.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.deleted_routes.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.created_services.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.deleted_services.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn list<T: Clone>(store: &Store<T>, namespace: &str) -> Vec<T> {
        lock(store)
            .get(namespace)
            .map(|by_name| by_name.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn lock<T>(store: &Store<T>) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<String, T>>> {
    store.lock().unwrap_or_else(|e| e.into_inner())
}

fn lock_vec<T: Clone>(store: &Arc<Mutex<Vec<T>>>) -> Vec<T> {
    store.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

#[async_trait]
impl PaasApi for MockPaasApi {
    async fn list_routes(&self, namespace: &str) -> Result<Vec<Route>, PaasError> {
        Ok(Self::list(&self.routes, namespace))
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, PaasError> {
        Ok(Self::list(&self.services, namespace))
    }

    async fn list_config_maps(&self, namespace: &str) -> Result<Vec<ConfigMap>, PaasError> {
        Ok(Self::list(&self.config_maps, namespace))
    }

    async fn create_route(&self, namespace: &str, route: &Route) -> Result<Route, PaasError> {
        let mut stored = route.clone();
        stored.metadata.namespace = namespace.to_string();
        self.put_route(namespace, stored.clone());
        self.created_routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((namespace.to_string(), stored.clone()));
        Ok(stored)
    }

    async fn update_route(&self, namespace: &str, route: &Route) -> Result<Route, PaasError> {
        let mut stored = route.clone();
        stored.metadata.namespace = namespace.to_string();
        self.put_route(namespace, stored.clone());
        Ok(stored)
    }

    async fn delete_route(&self, namespace: &str, name: &str) -> Result<(), PaasError> {
        if let Some(by_name) = lock(&self.routes).get_mut(namespace) {
            by_name.remove(name);
        }
        self.deleted_routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, PaasError> {
        let mut stored = service.clone();
        stored.metadata.namespace = namespace.to_string();
        self.put_service(namespace, stored.clone());
        self.created_services
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((namespace.to_string(), stored.clone()));
        Ok(stored)
    }

    async fn update_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, PaasError> {
        let mut stored = service.clone();
        stored.metadata.namespace = namespace.to_string();
        self.put_service(namespace, stored.clone());
        Ok(stored)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), PaasError> {
        if let Some(by_name) = lock(&self.services).get_mut(namespace) {
            by_name.remove(name);
        }
        self.deleted_services
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((namespace.to_string(), name.to_string()));
        Ok(())
    }
}

/// Channel-backed [`WatchConnector`]: each subscription gets the synthetic
/// INIT frame, and tests can push further frames by hand.
#[derive(Clone, Default)]
pub struct ChannelWatchConnector {
    senders: Arc<Mutex<HashMap<(String, String), mpsc::Sender<Vec<u8>>>>>,
}

impl std::fmt::Debug for ChannelWatchConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelWatchConnector").finish_non_exhaustive()
    }
}

impl ChannelWatchConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw frame into an open subscription. Panics when the stream was
    /// never opened: a test wiring bug.
    pub async fn push(&self, namespace: &str, resource: &str, frame: Vec<u8>) {
        let sender = {
            let senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
            senders
                .get(&(namespace.to_string(), resource.to_string()))
                .cloned()
        };
        match sender {
            Some(sender) => {
                let _ = sender.send(frame).await;
            }
            None => panic!("no watch subscription for {namespace}/{resource}"),
        }
    }
}

#[async_trait]
impl WatchConnector for ChannelWatchConnector {
    async fn subscribe(&self, namespace: &str, resource: &str) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let _ = tx.send(init_frame(namespace)).await;
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((namespace.to_string(), resource.to_string()), tx);
        rx
    }
}
