//! Persistence contract.
//!
//! Relational storage lives behind this trait; the logical layout is one
//! `tenant_dns` row per tenant (sites as nested JSON, namespaces as an
//! array) plus the `inits` singleton. The in-memory implementation backs
//! tests and single-node wiring.

use crate::domain::{Address, Init, TenantDns, DEFAULT_SITE};
use crate::error::SiteError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[async_trait]
pub trait TenantDao: Send + Sync {
    async fn find_all(&self) -> Result<Vec<TenantDns>, SiteError>;

    /// Absence surfaces as [`SiteError::TenantNotFound`].
    async fn find_by_tenant_id(&self, tenant_id: &str) -> Result<TenantDns, SiteError>;

    /// Insert a new row; fails when the tenant already exists.
    async fn save_tenant(&self, tenant: &TenantDns) -> Result<(), SiteError>;

    /// Insert-or-update keyed by tenant id.
    async fn upsert(&self, tenant: &TenantDns) -> Result<(), SiteError>;

    async fn delete(&self, tenant_id: &str) -> Result<(), SiteError>;

    /// Append `host` to `sites["default"][service]` of every active tenant,
    /// creating the default site map when missing.
    async fn add_route_to_tenants(&self, host: &str, service: &str) -> Result<(), SiteError>;

    /// Remove `service` from every site of every tenant.
    async fn delete_route_from_tenants(&self, service: &str) -> Result<(), SiteError>;

    /// The first-boot marker; absence surfaces as [`SiteError::NotFound`].
    async fn find_init_information(&self) -> Result<Init, SiteError>;

    async fn set_init_information(&self, init: Init) -> Result<(), SiteError>;

    /// Deduplicated set of every host present in the store.
    async fn find_all_hosts(&self) -> Result<BTreeSet<String>, SiteError>;
}

/// Tenant store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryDao {
    tenants: RwLock<BTreeMap<String, TenantDns>>,
    init: RwLock<Option<Init>>,
}

impl InMemoryDao {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantDao for InMemoryDao {
    async fn find_all(&self) -> Result<Vec<TenantDns>, SiteError> {
        let tenants = self.tenants.read().await;
        debug!("Found {} tenant rows", tenants.len());
        Ok(tenants.values().cloned().collect())
    }

    async fn find_by_tenant_id(&self, tenant_id: &str) -> Result<TenantDns, SiteError> {
        self.tenants
            .read()
            .await
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| SiteError::TenantNotFound(tenant_id.to_string()))
    }

    async fn save_tenant(&self, tenant: &TenantDns) -> Result<(), SiteError> {
        info!("Save tenant {}", tenant.tenant_id);
        let mut tenants = self.tenants.write().await;
        if tenants.contains_key(&tenant.tenant_id) {
            return Err(SiteError::BadRequest(format!(
                "Tenant {} already registered",
                tenant.tenant_id
            )));
        }
        tenants.insert(tenant.tenant_id.clone(), tenant.clone());
        Ok(())
    }

    async fn upsert(&self, tenant: &TenantDns) -> Result<(), SiteError> {
        info!("Upsert routes for tenant {}", tenant.tenant_id);
        self.tenants
            .write()
            .await
            .insert(tenant.tenant_id.clone(), tenant.clone());
        Ok(())
    }

    async fn delete(&self, tenant_id: &str) -> Result<(), SiteError> {
        info!("Delete routes by tenantId: {tenant_id}");
        self.tenants.write().await.remove(tenant_id);
        Ok(())
    }

    async fn add_route_to_tenants(&self, host: &str, service: &str) -> Result<(), SiteError> {
        info!("Update tenants with host {host} and service {service}");
        let mut tenants = self.tenants.write().await;
        for tenant in tenants.values_mut() {
            if !tenant.active {
                continue;
            }
            tenant
                .sites
                .entry(DEFAULT_SITE.to_string())
                .or_default()
                .entry(service.to_string())
                .or_default()
                .push(Address::new(host));
        }
        Ok(())
    }

    async fn delete_route_from_tenants(&self, service: &str) -> Result<(), SiteError> {
        info!("Remove service {service} from every tenant scheme");
        let mut tenants = self.tenants.write().await;
        for tenant in tenants.values_mut() {
            for services in tenant.sites.values_mut() {
                services.remove(service);
            }
        }
        Ok(())
    }

    async fn find_init_information(&self) -> Result<Init, SiteError> {
        self.init
            .read()
            .await
            .clone()
            .ok_or_else(|| SiteError::NotFound("init information is not present".to_string()))
    }

    async fn set_init_information(&self, init: Init) -> Result<(), SiteError> {
        *self.init.write().await = Some(init);
        Ok(())
    }

    async fn find_all_hosts(&self) -> Result<BTreeSet<String>, SiteError> {
        let tenants = self.tenants.read().await;
        let mut hosts = BTreeSet::new();
        for tenant in tenants.values() {
            for services in tenant.sites.values() {
                for addresses in services.values() {
                    for address in addresses {
                        hosts.insert(address.host());
                    }
                }
            }
        }
        Ok(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Services;

    fn tenant(id: &str, active: bool) -> TenantDns {
        TenantDns {
            tenant_id: id.to_string(),
            active,
            ..TenantDns::default()
        }
    }

    #[tokio::test]
    async fn find_by_tenant_id_reports_absence() {
        let dao = InMemoryDao::new();
        let err = dao.find_by_tenant_id("missing").await.unwrap_err();
        assert!(matches!(err, SiteError::TenantNotFound(_)));
    }

    #[tokio::test]
    async fn save_refuses_duplicates_but_upsert_overwrites() {
        let dao = InMemoryDao::new();
        dao.save_tenant(&tenant("t1", false)).await.unwrap();
        assert!(dao.save_tenant(&tenant("t1", false)).await.is_err());

        dao.upsert(&tenant("t1", true)).await.unwrap();
        assert!(dao.find_by_tenant_id("t1").await.unwrap().active);
    }

    #[tokio::test]
    async fn add_route_touches_only_active_tenants() {
        let dao = InMemoryDao::new();
        dao.upsert(&tenant("active", true)).await.unwrap();
        dao.upsert(&tenant("inactive", false)).await.unwrap();

        dao.add_route_to_tenants("v.example.org", "virtual-svc")
            .await
            .unwrap();

        let active = dao.find_by_tenant_id("active").await.unwrap();
        assert_eq!(
            active.sites[DEFAULT_SITE]["virtual-svc"],
            vec![Address::new("v.example.org")]
        );
        let inactive = dao.find_by_tenant_id("inactive").await.unwrap();
        assert!(inactive.sites.is_empty());
    }

    #[tokio::test]
    async fn delete_route_removes_service_from_all_sites() {
        let dao = InMemoryDao::new();
        let mut t = tenant("t1", true);
        t.sites.insert(
            DEFAULT_SITE.to_string(),
            Services::from([("svc".to_string(), vec![Address::new("a.example.org")])]),
        );
        t.sites.insert(
            "brand".to_string(),
            Services::from([("svc".to_string(), vec![Address::new("b.example.org")])]),
        );
        dao.upsert(&t).await.unwrap();

        dao.delete_route_from_tenants("svc").await.unwrap();
        let stored = dao.find_by_tenant_id("t1").await.unwrap();
        assert!(stored.sites.values().all(|s| s.is_empty()));
    }

    #[tokio::test]
    async fn all_hosts_are_deduplicated() {
        let dao = InMemoryDao::new();
        let mut t = tenant("t1", true);
        t.sites.insert(
            DEFAULT_SITE.to_string(),
            Services::from([
                ("a".to_string(), vec![Address::new("h.example.org")]),
                ("b".to_string(), vec![Address::new("http://h.example.org")]),
            ]),
        );
        dao.upsert(&t).await.unwrap();

        let hosts = dao.find_all_hosts().await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert!(hosts.contains("h.example.org"));
    }
}
