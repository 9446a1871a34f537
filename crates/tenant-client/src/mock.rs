//! Mock tenant-manager transport for unit testing.

use crate::error::TenantManagerError;
use crate::models::Tenant;
use crate::watch::{TenantWatchConnector, TENANT_WATCH_CHANNEL_CAPACITY};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// In-memory [`crate::TenantManagerApi`], tenants resolvable by object id and
/// external id alike.
#[derive(Clone, Default)]
pub struct MockTenantManagerApi {
    tenants: Arc<Mutex<HashMap<String, Tenant>>>,
}

impl std::fmt::Debug for MockTenantManagerApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTenantManagerApi").finish_non_exhaustive()
    }
}

impl MockTenantManagerApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tenant under both of its ids.
    pub fn put_tenant(&self, tenant: Tenant) {
        let mut tenants = self.tenants.lock().unwrap_or_else(|e| e.into_inner());
        if !tenant.external_id.is_empty() {
            tenants.insert(tenant.external_id.clone(), tenant.clone());
        }
        tenants.insert(tenant.object_id.clone(), tenant);
    }

    pub fn remove_tenant(&self, id: &str) {
        let mut tenants = self.tenants.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tenant) = tenants.remove(id) {
            tenants.remove(&tenant.object_id);
            tenants.remove(&tenant.external_id);
        }
    }
}

#[async_trait]
impl crate::TenantManagerApi for MockTenantManagerApi {
    async fn get_tenant(&self, id: &str) -> Result<Tenant, TenantManagerError> {
        self.tenants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or(TenantManagerError::TenantNotFound)
    }

    async fn get_tenants_by_status(&self, status: &str) -> Result<Vec<Tenant>, TenantManagerError> {
        let tenants = self.tenants.lock().unwrap_or_else(|e| e.into_inner());
        let mut seen = Vec::new();
        let mut result = Vec::new();
        for tenant in tenants.values() {
            if seen.contains(&tenant.object_id) {
                continue;
            }
            if status.is_empty() || tenant.status == status {
                seen.push(tenant.object_id.clone());
                result.push(tenant.clone());
            }
        }
        result.sort_by(|a, b| a.object_id.cmp(&b.object_id));
        Ok(result)
    }
}

/// Channel-backed [`TenantWatchConnector`] for pushing frames by hand.
#[derive(Clone, Default)]
pub struct ChannelTenantWatchConnector {
    sender: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>>,
}

impl std::fmt::Debug for ChannelTenantWatchConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTenantWatchConnector")
            .finish_non_exhaustive()
    }
}

impl ChannelTenantWatchConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw frame, waiting briefly for the reader to subscribe first.
    pub async fn push(&self, frame: Vec<u8>) {
        for _ in 0..200 {
            let sender = self
                .sender
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            if let Some(sender) = sender {
                let _ = sender.send(frame).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("tenant watch was never subscribed");
    }
}

#[async_trait]
impl TenantWatchConnector for ChannelTenantWatchConnector {
    async fn subscribe(&self) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(TENANT_WATCH_CHANNEL_CAPACITY);
        *self.sender.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx
    }
}
