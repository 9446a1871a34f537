//! The paas-mediation client proper.
//!
//! Owns the three watch-fed caches and the REST transport. Readers get
//! snapshot copies; mutations perform the REST call and then synthesise the
//! matching cache event in-line so readers never race the watch stream.

use crate::cache::{run_watch_worker, CacheEntry, CallbackRegistry, NamespaceLister, ResourceCache};
use crate::error::PaasError;
use crate::models::{ConfigMap, EventType, Metadata, ResourceEvent, Route, RouteEvent, Service};
use crate::rest::PaasApi;
use crate::watch::WatchConnector;
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const NAMESPACE_INIT_ATTEMPTS: usize = 5;
const NAMESPACE_INIT_DELAY: Duration = Duration::from_secs(1);

/// Callback invoked after each route event is applied to the cache.
pub type RouteCallback = Arc<dyn Fn(RouteEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Client for the paas-mediation facade with in-process resource caches.
pub struct PaasClient {
    api: Arc<dyn PaasApi>,
    connector: Arc<dyn WatchConnector>,
    /// Master namespace this instance manages.
    pub namespace: String,
    routes: Arc<ResourceCache<Route>>,
    services: Arc<ResourceCache<Service>>,
    config_maps: Arc<ResourceCache<ConfigMap>>,
    route_callbacks: Arc<CallbackRegistry<Route>>,
    last_update: Arc<Mutex<Instant>>,
    watched: Mutex<HashSet<(&'static str, String)>>,
}

impl std::fmt::Debug for PaasClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaasClient")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl PaasClient {
    pub fn new(
        api: Arc<dyn PaasApi>,
        connector: Arc<dyn WatchConnector>,
        namespace: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            connector,
            namespace,
            routes: Arc::new(ResourceCache::new()),
            services: Arc::new(ResourceCache::new()),
            config_maps: Arc::new(ResourceCache::new()),
            route_callbacks: Arc::new(CallbackRegistry::new()),
            last_update: Arc::new(Mutex::new(Instant::now())),
            watched: Mutex::new(HashSet::new()),
        })
    }

    /// Seed the caches for the master namespace and start the watch workers.
    /// A failed initial list is unrecoverable.
    pub async fn start(&self) -> Result<(), PaasError> {
        let namespace = self.namespace.clone();
        info!("Initializing paas-mediation caches for namespace {namespace}");

        let routes = self.api.list_routes(&namespace).await?;
        self.routes.replace_namespace(&namespace, routes);
        let services = self.api.list_services(&namespace).await?;
        self.services.replace_namespace(&namespace, services);
        let config_maps = self.api.list_config_maps(&namespace).await?;
        self.config_maps.replace_namespace(&namespace, config_maps);

        self.ensure_watch::<Route>(&namespace).await;
        self.ensure_watch::<Service>(&namespace).await;
        self.ensure_watch::<ConfigMap>(&namespace).await;
        Ok(())
    }

    /// Register a callback fired after every applied route event.
    pub fn add_route_callback(&self, callback: RouteCallback) {
        self.route_callbacks.register(callback);
    }

    /// Most recent instant any of the three caches applied an update.
    pub fn last_cache_update_time(&self) -> Instant {
        self.last_update
            .lock()
            .map(|stamp| *stamp)
            .unwrap_or_else(|e| *e.into_inner())
    }

    fn stamp_update(&self) {
        if let Ok(mut stamp) = self.last_update.lock() {
            *stamp = Instant::now();
        }
    }

    /// Open the watch stream for (kind, namespace) once and spawn its worker.
    async fn ensure_watch<T: CacheEntry>(&self, namespace: &str)
    where
        Self: CacheSelect<T>,
    {
        {
            let mut watched = self.watched.lock().unwrap_or_else(|e| e.into_inner());
            if !watched.insert((T::KIND, namespace.to_string())) {
                return;
            }
        }
        let frames = self.connector.subscribe(namespace, T::KIND).await;
        tokio::spawn(run_watch_worker(
            CacheSelect::<T>::cache(self),
            frames,
            CacheSelect::<T>::make_lister(self),
            Arc::clone(&self.last_update),
            CacheSelect::<T>::callbacks(self),
        ));
    }

    /// Re-list the services of one namespace and replace the cached view.
    /// Used by the namespace resolver to force a refresh between attempts.
    pub async fn hydrate_services(&self, namespace: &str) -> Result<(), PaasError> {
        let items = self.api.list_services(namespace).await?;
        self.services.replace_namespace(namespace, items);
        Ok(())
    }

    /// Snapshot of a namespace, lazily opening its watch and waiting a
    /// bounded number of attempts for the hydration to land.
    async fn get_cached<T: CacheEntry>(&self, namespace: &str) -> Result<Vec<T>, PaasError>
    where
        Self: CacheSelect<T>,
    {
        let namespace = if namespace.is_empty() {
            self.namespace.clone()
        } else {
            namespace.to_string()
        };
        if let Some(snapshot) = CacheSelect::<T>::cache(self).snapshot(&namespace) {
            return Ok(snapshot);
        }
        warn!(
            "Namespace {namespace} was not found in {} cache, opening watch and retrying",
            T::KIND
        );
        self.ensure_watch::<T>(&namespace).await;
        for _ in 0..NAMESPACE_INIT_ATTEMPTS {
            tokio::time::sleep(NAMESPACE_INIT_DELAY).await;
            if let Some(snapshot) = CacheSelect::<T>::cache(self).snapshot(&namespace) {
                return Ok(snapshot);
            }
        }
        Err(PaasError::NamespaceUnavailable {
            namespace,
            kind: T::KIND,
            attempts: NAMESPACE_INIT_ATTEMPTS,
        })
    }

    pub async fn get_routes(&self, namespace: &str) -> Result<Vec<Route>, PaasError> {
        self.get_cached::<Route>(namespace).await
    }

    pub async fn get_services(&self, namespace: &str) -> Result<Vec<Service>, PaasError> {
        self.get_cached::<Service>(namespace).await
    }

    pub async fn get_config_maps(&self, namespace: &str) -> Result<Vec<ConfigMap>, PaasError> {
        self.get_cached::<ConfigMap>(namespace).await
    }

    pub async fn get_routes_filtered<F>(
        &self,
        namespace: &str,
        filter: F,
    ) -> Result<Vec<Route>, PaasError>
    where
        F: Fn(&Route) -> bool,
    {
        Ok(self
            .get_routes(namespace)
            .await?
            .into_iter()
            .filter(|route| filter(route))
            .collect())
    }

    pub async fn get_services_filtered<F>(
        &self,
        namespace: &str,
        filter: F,
    ) -> Result<Vec<Service>, PaasError>
    where
        F: Fn(&Service) -> bool,
    {
        Ok(self
            .get_services(namespace)
            .await?
            .into_iter()
            .filter(|service| filter(service))
            .collect())
    }

    pub async fn get_config_maps_filtered<F>(
        &self,
        namespace: &str,
        filter: F,
    ) -> Result<Vec<ConfigMap>, PaasError>
    where
        F: Fn(&ConfigMap) -> bool,
    {
        Ok(self
            .get_config_maps(namespace)
            .await?
            .into_iter()
            .filter(|cm| filter(cm))
            .collect())
    }

    /// Union across namespaces, preserving per-namespace order.
    pub async fn get_routes_for_namespaces(
        &self,
        namespaces: &[String],
    ) -> Result<Vec<Route>, PaasError> {
        let mut result = Vec::new();
        for namespace in namespaces {
            result.extend(self.get_routes(namespace).await?);
        }
        Ok(result)
    }

    pub async fn get_routes_for_namespaces_filtered<F>(
        &self,
        namespaces: &[String],
        filter: F,
    ) -> Result<Vec<Route>, PaasError>
    where
        F: Fn(&Route) -> bool,
    {
        Ok(self
            .get_routes_for_namespaces(namespaces)
            .await?
            .into_iter()
            .filter(|route| filter(route))
            .collect())
    }

    pub async fn get_services_for_namespaces(
        &self,
        namespaces: &[String],
    ) -> Result<Vec<Service>, PaasError> {
        let mut result = Vec::new();
        for namespace in namespaces {
            result.extend(self.get_services(namespace).await?);
        }
        Ok(result)
    }

    pub async fn get_services_for_namespaces_filtered<F>(
        &self,
        namespaces: &[String],
        filter: F,
    ) -> Result<Vec<Service>, PaasError>
    where
        F: Fn(&Service) -> bool,
    {
        Ok(self
            .get_services_for_namespaces(namespaces)
            .await?
            .into_iter()
            .filter(|service| filter(service))
            .collect())
    }

    pub async fn create_route(&self, route: &Route, namespace: &str) -> Result<Route, PaasError> {
        let mut route = route.clone();
        normalize_route_host(&mut route);
        info!(
            "Create route {} with host {} in namespace {namespace}",
            route.metadata.name, route.spec.host
        );
        let created = self.api.create_route(namespace, &route).await?;
        self.apply_route_event(EventType::Created, created.clone())
            .await;
        Ok(created)
    }

    pub async fn update_or_create_route(
        &self,
        route: &Route,
        namespace: &str,
    ) -> Result<Route, PaasError> {
        let mut route = route.clone();
        normalize_route_host(&mut route);
        info!(
            "Update route {} with host {} in namespace {namespace}",
            route.metadata.name, route.spec.host
        );
        let updated = self.api.update_route(namespace, &route).await?;
        self.apply_route_event(EventType::Modified, updated.clone())
            .await;
        Ok(updated)
    }

    pub async fn delete_route(&self, namespace: &str, name: &str) -> Result<(), PaasError> {
        info!("Delete route {name} from namespace {namespace}");
        self.api.delete_route(namespace, name).await?;
        let tombstone = Route {
            metadata: Metadata {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..Metadata::default()
            },
            ..Route::default()
        };
        self.apply_route_event(EventType::Deleted, tombstone).await;
        Ok(())
    }

    pub async fn create_service(
        &self,
        service: &Service,
        namespace: &str,
    ) -> Result<Service, PaasError> {
        info!(
            "Create service {} in namespace {namespace}",
            service.metadata.name
        );
        let created = self.api.create_service(namespace, service).await?;
        self.apply_service_event(EventType::Created, created.clone());
        Ok(created)
    }

    pub async fn update_or_create_service(
        &self,
        service: &Service,
        namespace: &str,
    ) -> Result<Service, PaasError> {
        info!(
            "Update service {} in namespace {namespace}",
            service.metadata.name
        );
        let updated = self.api.update_service(namespace, service).await?;
        self.apply_service_event(EventType::Modified, updated.clone());
        Ok(updated)
    }

    pub async fn delete_service(&self, name: &str, namespace: &str) -> Result<(), PaasError> {
        info!("Delete service {name} from namespace {namespace}");
        self.api.delete_service(namespace, name).await?;
        let tombstone = Service {
            metadata: Metadata {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..Metadata::default()
            },
            ..Service::default()
        };
        self.apply_service_event(EventType::Deleted, tombstone);
        Ok(())
    }

    async fn apply_route_event(&self, event_type: EventType, mut route: Route) {
        if route.metadata.namespace.is_empty() {
            route.metadata.namespace = self.namespace.clone();
        }
        let event = ResourceEvent {
            event_type,
            object: route,
        };
        self.routes.apply(&event);
        self.stamp_update();
        self.route_callbacks.fire(event).await;
    }

    fn apply_service_event(&self, event_type: EventType, mut service: Service) {
        if service.metadata.namespace.is_empty() {
            service.metadata.namespace = self.namespace.clone();
        }
        let event = ResourceEvent {
            event_type,
            object: service,
        };
        self.services.apply(&event);
        self.stamp_update();
    }
}

/// Per-kind access to the client internals, so cache plumbing stays generic.
pub trait CacheSelect<T: CacheEntry> {
    fn cache(&self) -> Arc<ResourceCache<T>>;
    fn callbacks(&self) -> Option<Arc<CallbackRegistry<T>>>;
    /// Build the INIT re-list closure for the watch worker. Captures the REST
    /// transport and cache handles; holds no lock across the REST call.
    fn make_lister(&self) -> NamespaceLister;
}

macro_rules! impl_cache_select {
    ($kind:ty, $cache:ident, $list:ident, $callbacks:expr) => {
        impl CacheSelect<$kind> for PaasClient {
            fn cache(&self) -> Arc<ResourceCache<$kind>> {
                Arc::clone(&self.$cache)
            }

            #[allow(clippy::redundant_closure_call)]
            fn callbacks(&self) -> Option<Arc<CallbackRegistry<$kind>>> {
                ($callbacks)(self)
            }

            fn make_lister(&self) -> NamespaceLister {
                let api = Arc::clone(&self.api);
                let cache = Arc::clone(&self.$cache);
                Arc::new(move |namespace: String| {
                    let api = Arc::clone(&api);
                    let cache = Arc::clone(&cache);
                    Box::pin(async move {
                        match api.$list(&namespace).await {
                            Ok(items) => cache.replace_namespace(&namespace, items),
                            Err(err) => error!(
                                "Error occurred while listing {} from paas-mediation: {err}",
                                <$kind as CacheEntry>::KIND
                            ),
                        }
                    })
                })
            }
        }
    };
}

impl_cache_select!(Route, routes, list_routes, |client: &PaasClient| Some(
    Arc::clone(&client.route_callbacks)
));
impl_cache_select!(Service, services, list_services, |_client: &PaasClient| {
    None
});
impl_cache_select!(
    ConfigMap,
    config_maps,
    list_config_maps,
    |_client: &PaasClient| None
);

/// The cluster matches hosts case-insensitively; keep what we send canonical.
fn normalize_route_host(route: &mut Route) {
    route.spec.host = route.spec.host.to_lowercase();
}
