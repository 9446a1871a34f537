//! Tenant lifecycle mutations and composite-satellite mirroring.

use super::Synchronizer;
use crate::domain::{Services, Sites, TenantDns, DEFAULT_SITE, SHOPPING_FRONTEND};
use crate::error::SiteError;
use std::collections::HashSet;
use std::time::Duration;
use tenant_client::{Tenant, TenantWatchEvent, TenantWatchEventType};
use tracing::{debug, error, info};

const SATELLITE_RETRY_DELAY: Duration = Duration::from_secs(5);

impl Synchronizer {
    /// Validate and store a tenant scheme, then trigger a sync.
    pub async fn upsert(&self, mut data: TenantDns) -> Result<(), SiteError> {
        debug!("Check if we can build hierarchy for tenant namespaces...");
        self.composite_namespace_for_tenant(&data).await?;
        debug!("Hierarchy was built successfully");

        self.generate_new_urls_if_necessary(&mut data).await?;
        let mut filtered = self.filter_general_routes(data).await?;

        if let Some(site) = service_site(&filtered, SHOPPING_FRONTEND) {
            info!("Shopping frontend found in site {site}");
            if filtered.service_name.is_empty() {
                if let Ok(stored) = self.dao.find_by_tenant_id(&filtered.tenant_id).await {
                    filtered.service_name = stored.service_name;
                }
                if filtered.service_name.is_empty() {
                    filtered.service_name = self
                        .generate_unique_service_name(&filtered.tenant_name)
                        .await?;
                    info!("Generated service name {}", filtered.service_name);
                }
            }
            let service_name = filtered.service_name.clone();
            rename_service_key(SHOPPING_FRONTEND, &service_name, &site, &mut filtered)?;
        }

        let validation = self.check_collisions(&filtered).await?;
        for services in validation.values() {
            for (service, info) in services {
                if !info.valid {
                    return Err(SiteError::BadRequest(format!(
                        "Scheme validation failed for service {service}: {}",
                        info.reason
                    )));
                }
            }
        }

        self.dao.upsert(&filtered).await?;
        self.sync();
        Ok(())
    }

    /// When an inactive tenant changes its domain or name, the generated
    /// default site is rebuilt before storing.
    async fn generate_new_urls_if_necessary(&self, data: &mut TenantDns) -> Result<(), SiteError> {
        if data.active || !data.sites.contains_key(DEFAULT_SITE) {
            return Ok(());
        }
        info!("Tenant is not in active state. Check if domain name or tenant name were changed");
        let Ok(stored) = self.dao.find_by_tenant_id(&data.tenant_id).await else {
            return Ok(());
        };
        if stored.domain_name == data.domain_name && stored.tenant_name == data.tenant_name {
            return Ok(());
        }

        let namespaces = self.namespaces_with_master(&data.namespaces);
        if stored.domain_name != data.domain_name {
            info!(
                "Domain name was changed from '{}' to '{}'",
                stored.domain_name, data.domain_name
            );
            let public_services = self.get_public_services(&namespaces).await?;
            let services = self
                .generate_routes_for_services(&data.domain_name, &public_services, &namespaces)
                .await?;
            data.sites.insert(DEFAULT_SITE.to_string(), services);
        }
        let has_shopping = data
            .sites
            .get(DEFAULT_SITE)
            .is_some_and(|services| services.contains_key(SHOPPING_FRONTEND));
        if has_shopping {
            debug!("Regenerate the shopping frontend url");
            let shopping = self.generate_shopping_route(&data.domain_name, &data.tenant_name);
            if let Some(services) = data.sites.get_mut(DEFAULT_SITE) {
                services.insert(SHOPPING_FRONTEND.to_string(), shopping);
            }
        }
        Ok(())
    }

    /// Strip addresses that collide with GENERAL routes; they are served
    /// cluster-wide and must not be persisted per tenant.
    async fn filter_general_routes(&self, mut data: TenantDns) -> Result<TenantDns, SiteError> {
        let namespaces = self.namespaces_with_master(&data.namespaces);
        let general = self
            .paas
            .get_routes_for_namespaces_filtered(&namespaces, |route| {
                route.is_general(&self.mapper)
            })
            .await?;
        let general_hosts: HashSet<String> = general
            .iter()
            .map(|route| route.spec.host.to_lowercase())
            .collect();

        for services in data.sites.values_mut() {
            services.retain(|_service, addresses| {
                addresses.retain(|address| !general_hosts.contains(&address.host().to_lowercase()));
                !addresses.is_empty()
            });
        }
        Ok(data)
    }

    pub async fn change_tenant_status(&self, tenant_id: &str, active: bool) -> Result<(), SiteError> {
        let mut tenant = self.dao.find_by_tenant_id(tenant_id).await.map_err(|err| {
            error!("Error occurred while searching for tenant: {tenant_id}");
            err
        })?;
        tenant.active = active;
        debug!("Change tenant {tenant_id} status to {active}");
        self.upsert(tenant).await
    }

    /// Tombstone the tenant; the next reconciliation pass removes the row.
    pub async fn delete_tenant(&self, tenant_id: &str) -> Result<(), SiteError> {
        let mut tenant = match self.dao.find_by_tenant_id(tenant_id).await {
            Ok(tenant) => tenant,
            Err(SiteError::TenantNotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        tenant.sites = Sites::new();
        tenant.removed = true;
        self.dao.upsert(&tenant).await?;
        self.sync();
        Ok(())
    }

    /// Clear the scheme, keeping the row.
    pub async fn delete_routes(&self, tenant_id: &str) -> Result<(), SiteError> {
        let mut tenant = match self.dao.find_by_tenant_id(tenant_id).await {
            Ok(tenant) => tenant,
            Err(SiteError::TenantNotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        tenant.sites = Sites::new();
        self.dao.upsert(&tenant).await?;
        self.sync();
        Ok(())
    }

    pub async fn register_tenant(&self, tenant: &Tenant) -> Result<(), SiteError> {
        debug!("Register tenant in site-management: {}", tenant.object_id);
        let tenant_dns = TenantDns {
            tenant_id: tenant.object_id.clone(),
            namespaces: tenant.namespaces(),
            tenant_name: tenant.tenant_name.clone(),
            ..TenantDns::default()
        };
        self.dao.save_tenant(&tenant_dns).await
    }

    /// Maintain the active-tenant index from watch events.
    pub(crate) fn actualize_active_tenants_cache(&self, event: TenantWatchEvent) {
        debug!("Ready to update active tenants cache");
        match event.event_type {
            TenantWatchEventType::Subscribed
            | TenantWatchEventType::Created
            | TenantWatchEventType::Modified => {
                self.tenant_client.update_active_tenants_cache(&event.tenants);
            }
            TenantWatchEventType::Deleted => {
                self.tenant_client
                    .delete_from_active_tenants_cache(&event.tenants);
            }
        }
    }

    /// Satellite start-up import: mirror the baseline tenant set, dropping
    /// rows the baseline no longer knows. Retries until it succeeds.
    pub(crate) async fn sync_all_tenants_from_tm(&self) {
        info!("Sync all tenants from tenant-manager");
        loop {
            let tenants = match self.tenant_client.get_all_tenants_by_status("").await {
                Ok(tenants) => tenants,
                Err(err) => {
                    error!("Failed attempt to get all tenants from tenant-manager: {err}");
                    tokio::time::sleep(SATELLITE_RETRY_DELAY).await;
                    continue;
                }
            };

            let mut known: HashSet<String> = HashSet::with_capacity(tenants.len());
            for tenant in &tenants {
                known.insert(tenant.object_id.clone());
                if let Err(err) = self.upsert_tenant_from_tm(tenant).await {
                    error!("Failed attempt to upsert tenant from tenant-manager: {err}");
                }
            }

            let stored = match self.dao.find_all().await {
                Ok(stored) => stored,
                Err(err) => {
                    error!("Failed attempt to get all tenant dns rows: {err}");
                    tokio::time::sleep(SATELLITE_RETRY_DELAY).await;
                    continue;
                }
            };
            for tenant in stored {
                if !known.contains(&tenant.tenant_id) {
                    debug!("Deleting tenant {} absent upstream", tenant.tenant_id);
                    if let Err(err) = self.delete_tenant(&tenant.tenant_id).await {
                        error!("Failed attempt to delete tenant dns row: {err}");
                    }
                }
            }
            break;
        }
        info!("Finished syncing all tenants from tenant-manager");
    }

    /// Mirror one upstream tenant into the local store.
    pub(crate) async fn upsert_tenant_from_tm(&self, tenant: &Tenant) -> Result<(), SiteError> {
        let is_active = tenant.is_active();
        let mut tenant_dns = TenantDns {
            tenant_id: tenant.object_id.clone(),
            tenant_name: tenant.tenant_name.clone(),
            tenant_admin: tenant.user.email.clone(),
            namespaces: tenant.namespaces(),
            domain_name: tenant.domain_name.clone(),
            active: is_active,
            sites: Sites::new(),
            ..TenantDns::default()
        };

        if is_active {
            match self
                .find_by_tenant_id(&tenant.object_id, "", false, true)
                .await
            {
                Ok(stored) => tenant_dns.sites = stored.sites,
                Err(err) => {
                    info!(
                        "Searching of tenant {} finished with error {err}",
                        tenant.object_id
                    );
                    tenant_dns
                        .sites
                        .insert(DEFAULT_SITE.to_string(), Services::new());
                }
            }
        }

        self.upsert(tenant_dns).await
    }

    /// Tenant watch mirroring in satellite mode.
    pub(crate) async fn sync_tenants_with_tm(
        &self,
        event: TenantWatchEvent,
    ) -> Result<(), SiteError> {
        info!("Syncing tenants on event {}...", event.event_type);
        for tenant in &event.tenants {
            if event.event_type == TenantWatchEventType::Deleted {
                self.delete_tenant(&tenant.object_id).await.map_err(|err| {
                    error!("Failed to delete tenant with objectId {}", tenant.object_id);
                    err
                })?;
            } else {
                self.upsert_tenant_from_tm(tenant).await?;
            }
        }
        Ok(())
    }
}

fn service_site(tenant: &TenantDns, service: &str) -> Option<String> {
    tenant
        .sites
        .iter()
        .find(|(_, services)| services.contains_key(service))
        .map(|(site, _)| site.clone())
}

/// Move the scheme entry `from` to the key `to` inside `site`. The target
/// name must be printable.
fn rename_service_key(
    from: &str,
    to: &str,
    site: &str,
    tenant: &mut TenantDns,
) -> Result<(), SiteError> {
    if let Some(position) = to.chars().position(|c| c.is_control()) {
        return Err(SiteError::BadRequest(format!(
            "Passed tenant serviceName {to} is incorrect. It contains a forbidden symbol at position {position}."
        )));
    }
    if let Some(services) = tenant.sites.get_mut(site) {
        if let Some(addresses) = services.remove(from) {
            info!("Delete service {from} from site {site} and set to {to}");
            services.insert(to.to_string(), addresses);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Address;

    fn tenant_with(service: &str) -> TenantDns {
        let mut tenant = TenantDns::default();
        tenant.sites.insert(
            DEFAULT_SITE.to_string(),
            Services::from([(service.to_string(), vec![Address::new("x.example.org")])]),
        );
        tenant
    }

    #[test]
    fn rename_moves_addresses_to_new_key() {
        let mut tenant = tenant_with(SHOPPING_FRONTEND);
        rename_service_key(SHOPPING_FRONTEND, "tenant-acme", DEFAULT_SITE, &mut tenant).unwrap();
        let services = &tenant.sites[DEFAULT_SITE];
        assert!(!services.contains_key(SHOPPING_FRONTEND));
        assert_eq!(services["tenant-acme"], vec![Address::new("x.example.org")]);
    }

    #[test]
    fn rename_rejects_unprintable_target() {
        let mut tenant = tenant_with(SHOPPING_FRONTEND);
        let err =
            rename_service_key(SHOPPING_FRONTEND, "bad\u{0007}name", DEFAULT_SITE, &mut tenant)
                .unwrap_err();
        assert!(matches!(err, SiteError::BadRequest(_)));
    }

    #[test]
    fn service_site_finds_hosting_site() {
        let tenant = tenant_with("svc");
        assert_eq!(service_site(&tenant, "svc"), Some(DEFAULT_SITE.to_string()));
        assert_eq!(service_site(&tenant, "other"), None);
    }
}
