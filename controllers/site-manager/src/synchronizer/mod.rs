//! The reconciliation engine.
//!
//! All triggers (REST, tenant watch events, the periodic timer, completed
//! mutations) coalesce onto one bounded sync channel; a single worker drains
//! it and runs one pass at a time. A pass deletes manageable routes that no
//! active tenant claims, creates the missing ones, and notifies the tenants
//! it touched.

mod queries;
mod tenants;
mod virtual_services;
#[cfg(test)]
mod sync_test;

use crate::composite::BaselineSmApi;
use crate::dao::TenantDao;
use crate::domain::{self, validator::SchemeValidator, TenantDns, ValidationResult};
use crate::error::SiteError;
use crate::mailer::MailSender;
use idp_client::IdpFacade;
use paas_client::{AnnotationMapper, PaasClient, Route};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tenant_client::{TenantManagerClient, TenantWatchEventType};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Sync signals coalesce; capacity bounds the backlog, overflow is dropped.
const SYNC_CHANNEL_CAPACITY: usize = 16;

const AWAIT_ACTION_TIMEOUT: Duration = Duration::from_secs(180);
const SERVICE_RESOLVE_TIMEOUT: Duration = Duration::from_secs(20);
const POLL_STEP: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
struct SyncEvent;

/// A parent->child chain of namespaces a tenant spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeNamespace {
    pub namespace: String,
    pub child: Option<Box<CompositeNamespace>>,
}

impl CompositeNamespace {
    /// The chain as a list, root first.
    fn flatten(&self) -> Vec<&str> {
        let mut chain = vec![self.namespace.as_str()];
        let mut current = &self.child;
        while let Some(node) = current {
            chain.push(node.namespace.as_str());
            current = &node.child;
        }
        chain
    }
}

pub struct Synchronizer {
    pub(crate) dao: Arc<dyn TenantDao>,
    pub(crate) paas: Arc<PaasClient>,
    pub(crate) tenant_client: Arc<TenantManagerClient>,
    pub(crate) mailer: Arc<MailSender>,
    pub(crate) idp: Arc<IdpFacade>,
    pub(crate) validator: SchemeValidator,
    pub(crate) mapper: AnnotationMapper,
    sync_tx: mpsc::Sender<SyncEvent>,
    sync_rx: Mutex<Option<mpsc::Receiver<SyncEvent>>>,
    auto_sync_interval: Duration,
    pub(crate) platform_hostname: String,
    pub(crate) protocol: String,
    pub(crate) default_domain_zone: String,
    pub(crate) idp_url: String,
    pub(crate) composite_satellite: bool,
    pub(crate) baseline: Option<Arc<dyn BaselineSmApi>>,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("namespace", &self.paas.namespace)
            .field("composite_satellite", &self.composite_satellite)
            .finish_non_exhaustive()
    }
}

/// Everything a [`Synchronizer`] is built from.
pub struct SynchronizerParts {
    pub dao: Arc<dyn TenantDao>,
    pub paas: Arc<PaasClient>,
    pub tenant_client: Arc<TenantManagerClient>,
    pub mailer: Arc<MailSender>,
    pub idp: Arc<IdpFacade>,
    pub auto_sync_interval: Duration,
    pub platform_hostname: String,
    pub default_protocol: String,
    pub default_domain_zone: String,
    pub idp_url: String,
    pub composite_satellite: bool,
    pub baseline: Option<Arc<dyn BaselineSmApi>>,
}

impl std::fmt::Debug for SynchronizerParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizerParts").finish_non_exhaustive()
    }
}

impl Synchronizer {
    pub fn new(parts: SynchronizerParts) -> Arc<Self> {
        let (sync_tx, sync_rx) = mpsc::channel(SYNC_CHANNEL_CAPACITY);
        let protocol = if parts.default_protocol == "http" {
            info!("Set protocol to http");
            "http".to_string()
        } else {
            "https".to_string()
        };
        Arc::new(Self {
            dao: parts.dao,
            paas: parts.paas,
            tenant_client: parts.tenant_client,
            mailer: parts.mailer,
            idp: parts.idp,
            validator: SchemeValidator::new(),
            mapper: AnnotationMapper::default(),
            sync_tx,
            sync_rx: Mutex::new(Some(sync_rx)),
            auto_sync_interval: parts.auto_sync_interval,
            platform_hostname: parts.platform_hostname,
            protocol,
            default_domain_zone: parts.default_domain_zone,
            idp_url: parts.idp_url,
            composite_satellite: parts.composite_satellite,
            baseline: parts.baseline,
        })
    }

    /// First-boot projection, watch wiring, the sync worker and the periodic
    /// timer. A failed scheme build is unrecoverable.
    pub async fn start(self: Arc<Self>) -> Result<(), SiteError> {
        self.build_scheme_if_required().await?;

        if self.composite_satellite {
            let satellite = Arc::clone(&self);
            self.tenant_client.subscribe_to_all(Arc::new(move |event| {
                let satellite = Arc::clone(&satellite);
                Box::pin(async move {
                    satellite.sync_tenants_with_tm(event).await?;
                    Ok(())
                })
            }));
        }

        let index = Arc::clone(&self);
        self.tenant_client.subscribe_to_all(Arc::new(move |event| {
            let index = Arc::clone(&index);
            Box::pin(async move {
                index.actualize_active_tenants_cache(event);
                Ok(())
            })
        }));

        let publisher = Arc::clone(&self);
        self.tenant_client.subscribe_to_all_except(
            TenantWatchEventType::Deleted,
            Arc::new(move |_event| {
                let publisher = Arc::clone(&publisher);
                Box::pin(async move {
                    publisher.send_routes_to_idp().await?;
                    Ok(())
                })
            }),
        );

        let on_route = Arc::clone(&self);
        self.paas.add_route_callback(Arc::new(move |_event| {
            let on_route = Arc::clone(&on_route);
            Box::pin(async move {
                if let Err(err) = on_route.send_routes_to_idp().await {
                    error!("Failed to publish routes to IDP after route event: {err}");
                }
            })
        }));

        Arc::clone(&self.tenant_client).start_watching();
        Self::spawn_sync_worker(&self);

        if self.composite_satellite {
            // load all tenants from the baseline tenant-manager
            self.sync_all_tenants_from_tm().await;
        }

        Self::start_auto_sync_timer(&self);
        Ok(())
    }

    fn spawn_sync_worker(this: &Arc<Self>) {
        let Some(mut rx) = this
            .sync_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            warn!("Sync worker is already running");
            return;
        };
        let worker = Arc::clone(this);
        tokio::spawn(async move {
            info!("Start processing synchronization");
            while rx.recv().await.is_some() {
                if let Err(err) = worker.process_synchronization().await {
                    error!("{err}");
                }
            }
        });
    }

    fn start_auto_sync_timer(this: &Arc<Self>) {
        info!("Start auto sync notifier");
        let timer = Arc::clone(this);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(timer.auto_sync_interval);
            ticker.tick().await; // immediate first tick is not a cycle
            loop {
                ticker.tick().await;
                timer.sync();
                if let Err(err) = timer.send_routes_to_idp().await {
                    error!("Periodic IDP publication failed: {err}");
                }
            }
        });
    }

    /// Enqueue a sync signal. Drop-on-full is intentional: a later trigger
    /// subsumes an earlier pending one.
    pub fn sync(&self) {
        info!("Generate event to force routes sync");
        match self.sync_tx.try_send(SyncEvent) {
            Ok(()) => debug!("Routes sync signal was successfully sent"),
            Err(_) => error!("Routes sync signal wasn't sent successfully"),
        }
    }

    /// Run a mutation and, in synchronous mode, wait for the caches to
    /// observe a change. A failed mutation returns immediately; there is
    /// nothing to wait for.
    pub async fn await_action<F, Fut>(&self, wait: bool, operation: F) -> Result<(), SiteError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), SiteError>>,
    {
        let before = self.paas.last_cache_update_time();
        info!("Start to change tenant scheme, last update time for caches: {before:?}");
        let result = operation().await;
        if !wait || result.is_err() {
            return result;
        }
        let mut waited = Duration::ZERO;
        while waited < AWAIT_ACTION_TIMEOUT {
            if self.paas.last_cache_update_time() > before {
                info!("Synchronization was completed successfully, waiting time: {waited:?}");
                return result;
            }
            debug!("Wait for caches update, because of sync mode");
            tokio::time::sleep(POLL_STEP).await;
            waited += POLL_STEP;
        }
        Err(SiteError::SyncTimeout)
    }

    /// One reconciliation pass. Per-tenant failures are logged and skipped;
    /// the pass itself only fails when the store or route listing does.
    pub(crate) async fn process_synchronization(&self) -> Result<(), SiteError> {
        info!("Start routes sync procedure...");
        let all_tenants = self.dao.find_all().await?;
        let namespaces = self.all_namespaces_from_tenants(&all_tenants);
        let manageable = self
            .paas
            .get_routes_for_namespaces_filtered(&namespaces, |route| {
                route.is_manageable(&self.mapper)
            })
            .await?;

        info!("Start deleting routes which are not present in the database");
        for route in &manageable {
            if !host_belongs_to_active_tenant(&route.spec.host, &all_tenants) {
                debug!(
                    "Host {} is not present in database or belongs to a non-active tenant and will be deleted",
                    route.spec.host
                );
                if let Err(err) = self
                    .paas
                    .delete_route(&route.metadata.namespace, &route.metadata.name)
                    .await
                {
                    error!(
                        "Error occurred while deleting route {} with host {}: {err}",
                        route.metadata.name, route.spec.host
                    );
                }
            }
        }
        for tenant in &all_tenants {
            if tenant.removed {
                debug!("Remove tenant '{}' because removed flag is true", tenant.tenant_id);
                if let Err(err) = self.dao.delete(&tenant.tenant_id).await {
                    error!("Failed to remove tombstoned tenant {}: {err}", tenant.tenant_id);
                }
            }
        }

        info!("Start creating routes which are present in the database and absent in the cluster");
        let mut changed: BTreeMap<String, &TenantDns> = BTreeMap::new();
        for tenant in &all_tenants {
            if !tenant.active {
                continue;
            }
            let composite = match self.composite_namespace_for_tenant(tenant).await {
                Ok(composite) => composite,
                Err(err) => {
                    error!(
                        "Skipping tenant {}: cannot build namespace hierarchy: {err}",
                        tenant.tenant_id
                    );
                    continue;
                }
            };
            for services in tenant.sites.values() {
                for (service, addresses) in services {
                    for address in addresses {
                        let namespace = match self
                            .resolve_namespace_for_service(service, &composite)
                            .await
                        {
                            Ok(namespace) => namespace,
                            Err(err) => {
                                error!("Skipping address {address} of service {service}: {err}");
                                continue;
                            }
                        };
                        let existing = match self.paas.get_routes(&namespace).await {
                            Ok(existing) => existing,
                            Err(err) => {
                                error!("Cannot list routes of namespace {namespace}: {err}");
                                continue;
                            }
                        };
                        if host_present_in_routes(address, service, &existing) {
                            continue;
                        }
                        debug!("Host {address} is not present in the cluster and will be created");
                        let route = tenant.to_route(service, address, &self.mapper);
                        match self.paas.create_route(&route, &namespace).await {
                            Ok(_) => {
                                changed.insert(tenant.tenant_id.clone(), tenant);
                            }
                            Err(err) => {
                                error!(
                                    "Error occurred while creating route for host {address}: {err}"
                                );
                            }
                        }
                    }
                }
            }
        }

        for tenant in changed.values() {
            self.notify_tenant_update(tenant).await;
        }
        info!("Routes sync finished successfully");
        Ok(())
    }

    async fn notify_tenant_update(&self, tenant: &TenantDns) {
        let namespaces = self.namespaces_with_master(&tenant.namespaces);
        let common = match self
            .paas
            .get_routes_for_namespaces_filtered(&namespaces, |route| {
                route.is_general(&self.mapper)
            })
            .await
        {
            Ok(common) => common,
            Err(err) => {
                error!("Error occurred while getting common routes: {err}");
                return;
            }
        };
        let content = self.mailer.generate_text_for_tenant_update(tenant, &common);
        let mailer = Arc::clone(&self.mailer);
        let recipient = tenant.tenant_admin.clone();
        tokio::spawn(async move {
            mailer.send_notification(&recipient, &content).await;
        });
    }

    /// Build the parent->child namespace chain for a tenant, master first.
    pub(crate) async fn composite_namespace_for_tenant(
        &self,
        tenant: &TenantDns,
    ) -> Result<CompositeNamespace, SiteError> {
        debug!("Start getting composite namespace for tenant '{}'", tenant.tenant_id);
        let others: Vec<String> = tenant
            .namespaces
            .iter()
            .filter(|ns| !ns.is_empty() && **ns != self.paas.namespace)
            .cloned()
            .collect();

        let child = match others.len() {
            0 => None,
            1 => Some(Box::new(CompositeNamespace {
                namespace: others[0].clone(),
                child: None,
            })),
            _ => {
                let mut parents = self.load_namespace_parents(&others).await?;
                Some(Box::new(self.resolve_child_chain(
                    &self.paas.namespace,
                    &mut parents,
                )?))
            }
        };
        Ok(CompositeNamespace {
            namespace: self.paas.namespace.clone(),
            child,
        })
    }

    /// `namespace -> parent` from each namespace's project-type configmap.
    async fn load_namespace_parents(
        &self,
        namespaces: &[String],
    ) -> Result<BTreeMap<String, String>, SiteError> {
        let mut parents = BTreeMap::new();
        for namespace in namespaces {
            let config_maps = self
                .paas
                .get_config_maps_filtered(namespace, |cm| {
                    cm.metadata.name == paas_client::PROJECT_TYPE_CONFIG_MAP
                })
                .await?;
            let Some(config_map) = config_maps.first() else {
                return Err(SiteError::Internal(format!(
                    "Config map {} was not found for namespace {namespace}",
                    paas_client::PROJECT_TYPE_CONFIG_MAP
                )));
            };
            if config_map.data.parent.is_empty() {
                return Err(SiteError::Internal(
                    "Parent was not found in configmap".to_string(),
                ));
            }
            parents.insert(namespace.clone(), config_map.data.parent.clone());
        }
        Ok(parents)
    }

    /// Walk `namespace -> parent` entries starting from `root`, consuming one
    /// child per level. A level without a child is a broken hierarchy.
    fn resolve_child_chain(
        &self,
        root: &str,
        parents: &mut BTreeMap<String, String>,
    ) -> Result<CompositeNamespace, SiteError> {
        let child = parents
            .iter()
            .find(|(_, parent)| parent.as_str() == root)
            .map(|(namespace, _)| namespace.clone());
        let Some(namespace) = child else {
            return Err(SiteError::Internal(format!(
                "Cannot build hierarchy for namespaces. No child for '{root}' namespace"
            )));
        };
        parents.remove(&namespace);
        let child = if parents.is_empty() {
            None
        } else {
            Some(Box::new(self.resolve_child_chain(&namespace, parents)?))
        };
        Ok(CompositeNamespace { namespace, child })
    }

    /// The lowest-level namespace of the chain that hosts `service`,
    /// re-hydrating the services caches between bounded retries.
    pub(crate) async fn resolve_namespace_for_service(
        &self,
        service: &str,
        composite: &CompositeNamespace,
    ) -> Result<String, SiteError> {
        let chain = composite.flatten();
        let mut waited = Duration::ZERO;
        loop {
            // child-first: the deepest namespace hosting the service wins
            for namespace in chain.iter().rev() {
                let services = self
                    .paas
                    .get_services_filtered(namespace, |s| s.metadata.name == service)
                    .await?;
                if !services.is_empty() {
                    debug!("Namespace for service {service} was resolved: {namespace}");
                    return Ok((*namespace).to_string());
                }
            }
            if waited >= SERVICE_RESOLVE_TIMEOUT {
                return Err(SiteError::Internal(format!(
                    "Service {service} wasn't found in any namespace: {chain:?}"
                )));
            }
            debug!("Couldn't resolve namespace for service {service}. Try again...");
            for namespace in &chain {
                if let Err(err) = self.paas.hydrate_services(namespace).await {
                    error!("Failed to refresh services of namespace {namespace}: {err}");
                }
            }
            tokio::time::sleep(POLL_STEP).await;
            waited += POLL_STEP;
        }
    }

    /// Project the cluster's annotated routes into the store on first boot.
    async fn build_scheme_if_required(&self) -> Result<(), SiteError> {
        info!("Check if it is necessary to build scheme from routes");
        if self.dao.find_init_information().await.is_ok() {
            info!("Database was already initialized, no building required");
            return Ok(());
        }

        let namespace = self.paas.namespace.clone();
        let annotated = self
            .paas
            .get_routes_filtered(&namespace, |route| route.tenant_id(&self.mapper).is_some())
            .await?;
        let mut scheme = domain::from_routes(&annotated, &self.mapper);
        for tenant in &mut scheme {
            if tenant.tenant_name.is_empty() {
                if let Ok(data) = self
                    .tenant_client
                    .get_tenant_by_object_id(&tenant.tenant_id)
                    .await
                {
                    tenant.tenant_name = data.tenant_name;
                    if tenant.service_name.is_empty() {
                        tenant.service_name = data.service_name;
                    }
                }
            }
            self.dao.upsert(tenant).await?;
        }

        self.dao
            .set_init_information(domain::Init { initialized: true })
            .await?;
        info!("Scheme was built successfully, init information was set in db");
        Ok(())
    }

    /// Validate a candidate scheme against every stored tenant.
    pub async fn check_collisions(
        &self,
        candidate: &TenantDns,
    ) -> Result<ValidationResult, SiteError> {
        let stored = self.dao.find_all().await?;
        let mut result = ValidationResult::new();
        self.validator.check(candidate, &stored, &mut result);
        Ok(result)
    }

    /// Union of tenant namespaces plus the master namespace.
    pub(crate) fn all_namespaces_from_tenants(&self, tenants: &[TenantDns]) -> Vec<String> {
        let mut namespaces: Vec<String> = Vec::new();
        for tenant in tenants {
            for namespace in &tenant.namespaces {
                if !namespace.is_empty() && !namespaces.contains(namespace) {
                    namespaces.push(namespace.clone());
                }
            }
        }
        push_if_absent(&mut namespaces, &self.paas.namespace);
        namespaces
    }

    pub(crate) fn namespaces_with_master(&self, namespaces: &[String]) -> Vec<String> {
        let mut result: Vec<String> = namespaces
            .iter()
            .filter(|ns| !ns.is_empty())
            .cloned()
            .collect();
        push_if_absent(&mut result, &self.paas.namespace);
        result
    }
}

pub(crate) fn push_if_absent(namespaces: &mut Vec<String>, namespace: &str) {
    if !namespaces.iter().any(|ns| ns == namespace) {
        namespaces.push(namespace.to_string());
    }
}

fn host_belongs_to_active_tenant(host: &str, tenants: &[TenantDns]) -> bool {
    tenants
        .iter()
        .filter(|tenant| tenant.active)
        .any(|tenant| tenant.has_host(host))
}

fn host_present_in_routes(
    address: &domain::Address,
    service: &str,
    routes: &[Route],
) -> bool {
    let host = address.host();
    for route in routes {
        if route.spec.host.to_lowercase() == host.to_lowercase() {
            if route.spec.service.name != service {
                warn!(
                    "Host {host} is already routed to service {}, expected {service}",
                    route.spec.service.name
                );
            }
            return true;
        }
    }
    false
}
