//! Tenant-manager client.

use crate::error::TenantManagerError;
use crate::models::Tenant;
use crate::watch::{TenantWatchConnector, TenantWatchEvent, TenantWatchEventType};
use async_trait::async_trait;
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const TENANTS_API_PATH: &str = "/manage/tenants";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// REST operations against tenant-manager.
#[async_trait]
pub trait TenantManagerApi: Send + Sync {
    /// Look a tenant up by object id or external id; tenant-manager resolves
    /// either through the same path.
    async fn get_tenant(&self, id: &str) -> Result<Tenant, TenantManagerError>;

    /// All tenants, optionally filtered by status.
    async fn get_tenants_by_status(&self, status: &str) -> Result<Vec<Tenant>, TenantManagerError>;
}

/// reqwest-backed [`TenantManagerApi`].
pub struct HttpTenantManagerApi {
    client: Client,
    base_url: String,
}

impl std::fmt::Debug for HttpTenantManagerApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTenantManagerApi")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpTenantManagerApi {
    /// `base_url` points at the tenant-manager API root, e.g.
    /// `http://internal-gateway-service:8080/api/v4/tenant-manager`.
    pub fn new(base_url: String) -> Result<Self, TenantManagerError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl HttpTenantManagerApi {
    async fn fetch_tenant(&self, url: &str, id: &str) -> Result<Tenant, TenantManagerError> {
        debug!("Get tenant from tenant-manager: {url}");
        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                warn!("Tenant with id {id} not found in tenant-manager");
                Err(TenantManagerError::TenantNotFound)
            }
            status if status.is_success() => Ok(response.json().await?),
            status => Err(TenantManagerError::UnexpectedStatus {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn fetch_tenants(&self, url: &str) -> Result<Vec<Tenant>, TenantManagerError> {
        debug!("Get all tenants from tenant-manager: {url}");
        let response = self.client.get(url).send().await?;
        let code = response.status();
        if !code.is_success() {
            return Err(TenantManagerError::UnexpectedStatus {
                status: code.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TenantManagerApi for HttpTenantManagerApi {
    async fn get_tenant(&self, id: &str) -> Result<Tenant, TenantManagerError> {
        let url = format!("{}{}/{}", self.base_url, TENANTS_API_PATH, id);
        crate::backoff::with_retry(|| self.fetch_tenant(&url, id)).await
    }

    async fn get_tenants_by_status(&self, status: &str) -> Result<Vec<Tenant>, TenantManagerError> {
        let mut url = format!("{}{}", self.base_url, TENANTS_API_PATH);
        if !status.is_empty() {
            url.push_str("?search=status=");
            url.push_str(status);
        }
        crate::backoff::with_retry(|| self.fetch_tenants(&url)).await
    }
}

/// Async callback invoked for every tenant watch event of a subscribed type.
pub type TenantEventCallback =
    Arc<dyn Fn(TenantWatchEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Tenant-manager client with the active-tenant index and the watch reader.
pub struct TenantManagerClient {
    api: Arc<dyn TenantManagerApi>,
    connector: Arc<dyn TenantWatchConnector>,
    retry_timeout: Duration,
    active_tenants: RwLock<HashMap<String, Tenant>>,
    callbacks: Mutex<HashMap<TenantWatchEventType, Vec<TenantEventCallback>>>,
}

impl std::fmt::Debug for TenantManagerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantManagerClient").finish_non_exhaustive()
    }
}

impl TenantManagerClient {
    pub fn new(
        api: Arc<dyn TenantManagerApi>,
        connector: Arc<dyn TenantWatchConnector>,
        retry_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            connector,
            retry_timeout,
            active_tenants: RwLock::new(HashMap::new()),
            callbacks: Mutex::new(HashMap::new()),
        })
    }

    pub async fn get_tenant_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Tenant, TenantManagerError> {
        info!("Get tenant from tenant-manager by external id: '{external_id}'");
        self.api.get_tenant(external_id).await
    }

    pub async fn get_tenant_by_object_id(
        &self,
        object_id: &str,
    ) -> Result<Tenant, TenantManagerError> {
        info!("Get tenant from tenant-manager by object id: '{object_id}'");
        self.api.get_tenant(object_id).await
    }

    pub async fn get_all_tenants_by_status(
        &self,
        status: &str,
    ) -> Result<Vec<Tenant>, TenantManagerError> {
        self.api.get_tenants_by_status(status).await
    }

    /// ACTIVE tenants are stored, SUSPENDED removed; other statuses ignored.
    pub fn update_active_tenants_cache(&self, tenants: &[Tenant]) {
        let mut cache = self.write_active();
        for tenant in tenants {
            match tenant.status.as_str() {
                crate::STATUS_ACTIVE => {
                    debug!("Storing tenant {} in active tenants cache", tenant.external_id);
                    cache.insert(tenant.external_id.clone(), tenant.clone());
                }
                crate::STATUS_SUSPENDED => {
                    cache.remove(&tenant.external_id);
                }
                _ => {}
            }
        }
    }

    pub fn delete_from_active_tenants_cache(&self, tenants: &[Tenant]) {
        let mut cache = self.write_active();
        for tenant in tenants {
            cache.remove(&tenant.external_id);
        }
    }

    /// Snapshot list of active tenants.
    pub fn get_active_tenants_cache(&self) -> Vec<Tenant> {
        let cache = self
            .active_tenants
            .read()
            .unwrap_or_else(|e| e.into_inner());
        let tenants: Vec<Tenant> = cache.values().cloned().collect();
        debug!("Found {} active tenants in cache", tenants.len());
        tenants
    }

    pub fn subscribe_to_event(&self, event: TenantWatchEventType, callback: TenantEventCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event)
            .or_default()
            .push(callback);
    }

    pub fn subscribe_to_all(&self, callback: TenantEventCallback) {
        for event in TenantWatchEventType::ALL {
            self.subscribe_to_event(event, Arc::clone(&callback));
        }
    }

    pub fn subscribe_to_all_except(
        &self,
        excluded: TenantWatchEventType,
        callback: TenantEventCallback,
    ) {
        for event in TenantWatchEventType::ALL {
            if event != excluded {
                self.subscribe_to_event(event, Arc::clone(&callback));
            }
        }
    }

    /// Spawn the watch reader. Reconnects with the configured timeout when
    /// the frame stream ends; callback failures are logged and never fatal.
    pub fn start_watching(self: Arc<Self>) {
        let client = self;
        info!("Watching tenant-manager has been started");
        tokio::spawn(async move {
            loop {
                let mut frames = client.connector.subscribe().await;
                while let Some(frame) = frames.recv().await {
                    if frame.is_empty() {
                        warn!("Received frame from tenant-manager has empty body");
                        continue;
                    }
                    let event: TenantWatchEvent = match serde_json::from_slice(&frame) {
                        Ok(event) => event,
                        Err(err) => {
                            error!("Failed to unmarshal tenant watch frame: {err}");
                            continue;
                        }
                    };
                    info!("Received tenant watch event of type '{}'", event.event_type);
                    client.dispatch(event).await;
                }
                warn!("Tenant-manager watch stream closed, reconnecting");
                tokio::time::sleep(client.retry_timeout).await;
            }
        });
    }

    /// Dispatch one event to its subscribers. Exposed for the satellite
    /// start-up import which replays synthetic events.
    pub async fn dispatch(&self, event: TenantWatchEvent) {
        let callbacks: Vec<TenantEventCallback> = {
            let map = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
            match map.get(&event.event_type) {
                Some(callbacks) => callbacks.clone(),
                None => {
                    warn!(
                        "There are no registered callbacks for event type {}",
                        event.event_type
                    );
                    return;
                }
            }
        };
        for callback in callbacks {
            if let Err(err) = callback(event.clone()).await {
                error!("One of tenant watch callbacks failed: {err:#}");
            }
        }
    }

    fn write_active(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Tenant>> {
        self.active_tenants
            .write()
            .unwrap_or_else(|e| e.into_inner())
    }
}
