//! Read paths: schemes, realms, annotated routes, sites, search.

use super::Synchronizer;
use crate::domain::{
    self, Address, Realm, Realms, Services, Sites, TenantData, TenantDns, DEFAULT_SITE,
    IDENTITY_PROVIDER_ID, NAME_MAX_LENGTH, PUBLIC_GATEWAY_SERVICE_ID, SHOPPING_FRONTEND,
    TENANT_SERVICE_PREFIX,
};
use crate::error::SiteError;
use paas_client::{CustomService, Route, Service};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, info, warn};

impl Synchronizer {
    pub async fn find_all(&self) -> Result<Vec<TenantDns>, SiteError> {
        self.find_all_with_general(true).await
    }

    pub async fn find_all_with_general(
        &self,
        merge_general: bool,
    ) -> Result<Vec<TenantDns>, SiteError> {
        let mut scheme = self.dao.find_all().await?;
        if merge_general {
            let namespaces = self.all_namespaces_from_tenants(&scheme);
            let general = self
                .paas
                .get_routes_for_namespaces_filtered(&namespaces, |route| {
                    route.is_general(&self.mapper)
                })
                .await?;
            for tenant in &mut scheme {
                *tenant = domain::merge_scheme_with_general_routes(tenant, &general);
            }
        }
        Ok(scheme)
    }

    pub async fn find_by_tenant_id(
        &self,
        tenant_id: &str,
        site: &str,
        merge_general: bool,
        generate_default: bool,
    ) -> Result<TenantDns, SiteError> {
        let mut scheme = self.dao.find_by_tenant_id(tenant_id).await?;
        if !site.is_empty() {
            scheme.filter_by_site(site);
        }

        if scheme.sites.is_empty() && generate_default {
            let site = if site.is_empty() { DEFAULT_SITE } else { site };
            if scheme.tenant_name.is_empty() {
                let tenant = self.tenant_client.get_tenant_by_object_id(tenant_id).await?;
                scheme.tenant_name = tenant.tenant_name;
            }
            let data = TenantData {
                tenant_id: Some(tenant_id.to_string()),
                tenant_name: scheme.tenant_name.clone(),
                protocol: self.protocol.clone(),
                site: site.to_string(),
                ignore_missing: true,
                routes: Vec::new(),
            };
            let routes = self.get_annotated_routes_for_tenant(&data).await?;
            let mut services = Services::new();
            for route in routes {
                let host = Address::new(route.url).host();
                services.insert(route.id, vec![Address::new(host)]);
            }
            scheme.sites = Sites::from([(site.to_string(), services)]);
        } else if merge_general {
            let namespaces = self.namespaces_with_master(&scheme.namespaces);
            let general = self
                .paas
                .get_routes_for_namespaces_filtered(&namespaces, |route| {
                    route.is_general(&self.mapper)
                })
                .await?;
            scheme = domain::merge_scheme_with_general_routes(&scheme, &general);
        }
        Ok(scheme)
    }

    pub async fn find_by_external_tenant_id(
        &self,
        external_id: &str,
        site: &str,
        merge_general: bool,
        generate_default: bool,
    ) -> Result<TenantDns, SiteError> {
        debug!("Get tenant for external id {external_id}");
        let tenant_data = self
            .tenant_client
            .get_tenant_by_external_id(external_id)
            .await?;
        let mut tenant = self
            .find_by_tenant_id(&tenant_data.object_id, site, merge_general, generate_default)
            .await?;
        self.actualize_tenant_status(&mut tenant, tenant_data.is_active())
            .await?;
        Ok(tenant)
    }

    /// Composite satellites may miss tenant status changes; align the stored
    /// flag with what tenant-manager reports.
    pub(crate) async fn actualize_tenant_status(
        &self,
        tenant: &mut TenantDns,
        active: bool,
    ) -> Result<(), SiteError> {
        if tenant.active != active {
            tenant.active = active;
            if let Err(err) = self.change_tenant_status(&tenant.tenant_id, active).await {
                error!(
                    "Failed to update tenant {} status to active={active}",
                    tenant.tenant_id
                );
                return Err(err);
            }
        }
        Ok(())
    }

    /// The virtual-shopping service name, generated once and persisted.
    pub async fn get_service_name(&self, external_id: &str) -> Result<String, SiteError> {
        info!("Get service name for tenant with external id {external_id}");
        let tenant_data = self
            .tenant_client
            .get_tenant_by_external_id(external_id)
            .await?;
        let mut tenant = self.dao.find_by_tenant_id(&tenant_data.object_id).await?;
        self.actualize_tenant_status(&mut tenant, tenant_data.is_active())
            .await?;

        if tenant.service_name.is_empty() {
            tenant.service_name = self.generate_unique_service_name(&tenant.tenant_name).await?;
            self.dao.upsert(&tenant).await?;
            info!("Generated ServiceName: {}", tenant.service_name);
        }
        Ok(tenant.service_name)
    }

    /// `tenant-{name}` capped at 63 characters, with a numeric suffix when
    /// the name is already taken by a cluster service.
    pub(crate) async fn generate_unique_service_name(
        &self,
        tenant_name: &str,
    ) -> Result<String, SiteError> {
        let mut base = format!("{TENANT_SERVICE_PREFIX}{tenant_name}");
        base.truncate(NAME_MAX_LENGTH);
        let mut candidate = base.clone();
        let mut counter: u32 = 1;
        while self.service_name_exists(&candidate).await? {
            if counter > 100 {
                // pathological collision run; fall back to a random suffix
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                let suffix = &suffix[..8];
                let mut prefix = base.clone();
                prefix.truncate(NAME_MAX_LENGTH - suffix.len());
                candidate = format!("{prefix}{suffix}");
                break;
            }
            let suffix = counter.to_string();
            let mut prefix = base.clone();
            prefix.truncate(NAME_MAX_LENGTH - suffix.len());
            candidate = format!("{prefix}{suffix}");
            counter += 1;
        }
        Ok(candidate)
    }

    async fn service_name_exists(&self, service_name: &str) -> Result<bool, SiteError> {
        let namespace = self.paas.namespace.clone();
        let services = self
            .paas
            .get_services_filtered(&namespace, |service| service.metadata.name == service_name)
            .await?;
        Ok(!services.is_empty())
    }

    /// The site name serving `url` for the tenant, `""` when none matches.
    pub async fn get_site(
        &self,
        external_id: &str,
        url: &str,
        merge_general: bool,
        generate_default: bool,
    ) -> Result<String, SiteError> {
        debug!("Get site for tenant with external id {external_id} and url {url}");
        let tenant = self
            .find_by_external_tenant_id(external_id, "", merge_general, generate_default)
            .await?;
        Ok(tenant.site_for_host(url))
    }

    pub async fn get_realms(&self, show_all: bool) -> Result<Realms, SiteError> {
        info!("Get realms with showAll property = {show_all}");
        let (common_routes, tenants) = self.collect_realms().await?;
        Ok(Realms {
            tenants,
            common_routes,
        })
    }

    /// Hosts for one realm: the tenant's persisted scheme plus the GENERAL
    /// routes of its namespaces.
    pub async fn get_realm(&self, realm_id: &str) -> Result<Realm, SiteError> {
        info!("Get hosts for realm {realm_id}");
        let scheme = self.dao.find_by_tenant_id(realm_id).await?;
        let mut routes: Vec<String> = scheme
            .sites
            .values()
            .flat_map(|services| services.values())
            .flatten()
            .map(Address::host)
            .collect();

        let namespaces = self.namespaces_with_master(&scheme.namespaces);
        let general = self
            .paas
            .get_routes_for_namespaces_filtered(&namespaces, |route| {
                route.is_general(&self.mapper)
            })
            .await?;
        routes.extend(general.into_iter().map(|route| route.spec.host));

        Ok(Realm {
            realm_id: String::new(),
            routes,
        })
    }

    /// Publish the current realm set to the identity provider.
    pub async fn send_routes_to_idp(&self) -> Result<(), SiteError> {
        let (common_uris, realms) = self.collect_realms().await?;
        let mut tenant_routes: HashMap<String, Vec<String>> = HashMap::new();
        for realm in realms {
            tenant_routes.insert(realm.realm_id, realm.routes);
        }
        self.idp.set_redirect_uris(&tenant_routes, &common_uris).await?;
        Ok(())
    }

    async fn collect_realms(&self) -> Result<(Vec<String>, Vec<Realm>), SiteError> {
        info!("Start building realms from routes of the master namespace");
        let namespace = self.paas.namespace.clone();
        let routes = self.paas.get_routes(&namespace).await?;
        let (mut common_routes, mut tenant_routes) = self.partition_tenant_routes(&routes);

        self.append_common_external_routes(&mut common_routes).await?;
        self.append_tenant_external_routes(&mut tenant_routes).await?;

        let tenants = self.tenant_client.get_active_tenants_cache();
        info!("Was received {} activated tenants", tenants.len());
        let mut realms = Vec::new();
        for tenant in tenants {
            if tenant.external_id.is_empty() {
                error!(
                    "Active tenant with objectId {} has empty externalId. Skipping",
                    tenant.object_id
                );
                continue;
            }
            let routes = tenant_routes
                .get(&tenant.object_id)
                .cloned()
                .unwrap_or_default();
            realms.push(Realm {
                realm_id: tenant.external_id,
                routes,
            });
        }
        info!(
            "Return {} common routes and {} realms",
            common_routes.len(),
            realms.len()
        );
        Ok((common_routes, realms))
    }

    /// GENERAL and unannotated hosts go to the common set, the rest are
    /// keyed by their tenant annotation.
    fn partition_tenant_routes(
        &self,
        routes: &[Route],
    ) -> (Vec<String>, BTreeMap<String, Vec<String>>) {
        let mut common = Vec::new();
        let mut by_tenant: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for route in routes {
            let host = route.spec.host.clone();
            if host.is_empty() {
                warn!("Route with name {} has empty host", route.metadata.name);
            }
            match route.tenant_id(&self.mapper) {
                None | Some(paas_client::GENERAL_TENANT) | Some("") => common.push(host),
                Some(tenant_id) => by_tenant.entry(tenant_id.to_string()).or_default().push(host),
            }
        }
        (common, by_tenant)
    }

    /// The tenant-manager configmap may carry a JSON array of hostnames
    /// exposed outside the cluster; they join the common set.
    async fn append_common_external_routes(
        &self,
        common_routes: &mut Vec<String>,
    ) -> Result<(), SiteError> {
        let namespace = self.paas.namespace.clone();
        let config_maps = self
            .paas
            .get_config_maps_filtered(&namespace, |cm| {
                cm.metadata.name == paas_client::TM_CONFIGS_CONFIG_MAP
            })
            .await?;
        let Some(config_map) = config_maps.first() else {
            return Ok(());
        };
        if config_map.data.external_routes.is_empty() {
            info!("Configmap with external routes is empty");
            return Ok(());
        }
        let external: Vec<String> = serde_json::from_str(&config_map.data.external_routes)
            .map_err(|err| {
                error!("Error while unmarshalling external routes from configmap: {err}");
                paas_client::PaasError::Decode(err)
            })?;
        common_routes.extend(external);
        Ok(())
    }

    /// Tenants spanning extra namespaces pick up the hosts of the routes
    /// owned by them (or GENERAL) in those namespaces.
    async fn append_tenant_external_routes(
        &self,
        tenant_routes: &mut BTreeMap<String, Vec<String>>,
    ) -> Result<(), SiteError> {
        for (tenant_object_id, routes) in tenant_routes.iter_mut() {
            let tenant = match self.tenant_client.get_tenant_by_object_id(tenant_object_id).await {
                Ok(tenant) => tenant,
                Err(tenant_client::TenantManagerError::TenantNotFound) => {
                    debug!(
                        "Tenant with objectId {tenant_object_id} was not found in tenant-manager. Skip searching for external routes"
                    );
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            for namespace in tenant.namespaces() {
                let namespace_routes = self.paas.get_routes(&namespace).await?;
                for route in namespace_routes {
                    let owner = route.tenant_id(&self.mapper).unwrap_or_default();
                    if owner == tenant_object_id || owner == paas_client::GENERAL_TENANT {
                        if !routes.contains(&route.spec.host) {
                            routes.push(route.spec.host.clone());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Identity-provider route: proxied to the baseline in satellite mode,
    /// otherwise the public-gateway URL of this cluster. Always a single
    /// element since the REST contract requires a list.
    pub async fn get_idp_route_for_tenant(
        &self,
        data: &TenantData,
    ) -> Result<Vec<CustomService>, SiteError> {
        let services = self.get_annotated_routes_for_tenant(data).await?;
        let pgw_url = services
            .iter()
            .find(|service| service.id == PUBLIC_GATEWAY_SERVICE_ID)
            .map(|service| service.url.clone())
            .unwrap_or_default();

        if self.composite_satellite {
            let baseline = self.baseline.as_ref().ok_or_else(|| {
                SiteError::Internal("satellite mode without a baseline client".to_string())
            })?;
            let tenant_id = data.tenant_id.clone().unwrap_or_default();
            let routes = baseline
                .get_idp_route(&tenant_id, &data.protocol, &data.site, data.ignore_missing)
                .await
                .map_err(|err| {
                    error!("Could not load baseline idp route: {err}");
                    SiteError::Internal(format!("could not load baseline idp route: {err}"))
                })?;
            debug!("Identity-provider url obtained from baseline SM: {routes:?}");
            Ok(routes)
        } else {
            let default_route = CustomService {
                id: IDENTITY_PROVIDER_ID.to_string(),
                name: "Identity Provider".to_string(),
                url: pgw_url,
                description: "URL to access Identity Provider API".to_string(),
            };
            debug!(
                "This is a baseline so the public-gateway url is returned as the identity-provider url: {default_route:?}"
            );
            Ok(vec![default_route])
        }
    }

    /// Annotated routes for a tenant resolved by internal or external id.
    pub async fn get_annotated_routes_for_tenant(
        &self,
        data: &TenantData,
    ) -> Result<Vec<CustomService>, SiteError> {
        let requested_id = data
            .tenant_id
            .clone()
            .ok_or_else(|| SiteError::BadRequest("No tenantId specified".to_string()))?;

        let mut tenant_name_fallback = String::new();
        let mut scheme = match self.dao.find_by_tenant_id(&requested_id).await {
            Ok(scheme) => Ok(scheme),
            Err(err) => {
                info!("Empty result or search error: {err}. Try to find by externalId.");
                match self.tenant_client.get_tenant_by_external_id(&requested_id).await {
                    Ok(tenant_data) => {
                        tenant_name_fallback = tenant_data.tenant_name.clone();
                        match self.dao.find_by_tenant_id(&tenant_data.object_id).await {
                            Ok(mut scheme) => {
                                self.actualize_tenant_status(&mut scheme, tenant_data.is_active())
                                    .await?;
                                Ok(scheme)
                            }
                            Err(err) => Err(err),
                        }
                    }
                    Err(_) => Err(err),
                }
            }
        };

        if let Ok(found) = &scheme {
            if !found.active && !data.ignore_missing {
                info!(
                    "Tenant {requested_id} is not active, ignoreMissing parameter is {}",
                    data.ignore_missing
                );
                return Err(SiteError::TenantNotActive(requested_id));
            }
        }
        if scheme.is_err() {
            if !data.ignore_missing {
                return Err(SiteError::TenantNotFound(requested_id));
            }
            scheme = Ok(TenantDns {
                tenant_id: requested_id,
                tenant_name: tenant_name_fallback,
                ..TenantDns::default()
            });
        }
        // the error arm was replaced above
        let scheme = scheme.unwrap_or_default();
        self.get_annotated_routes(data, scheme).await
    }

    /// Annotated routes for an already-resolved scheme. Inactive tenants get
    /// generated defaults merged in first.
    pub async fn get_annotated_routes(
        &self,
        data: &TenantData,
        mut scheme: TenantDns,
    ) -> Result<Vec<CustomService>, SiteError> {
        info!(
            "Getting annotated routes, protocol: '{}', site: '{}', ignoreMissing: {}",
            data.protocol, data.site, data.ignore_missing
        );
        if !scheme.active {
            self.merge_scheme_with_generated(&mut scheme, &data.site).await?;
        }
        scheme.filter_by_site(&data.site);
        if !scheme.service_name.is_empty() {
            if let Some(services) = scheme.sites.get_mut(&data.site) {
                services.remove(&scheme.service_name);
            }
        }

        let namespaces = self.namespaces_with_master(&scheme.namespaces);
        let mut routes = self
            .paas
            .get_routes_for_namespaces_filtered(&namespaces, |route| {
                route.is_general(&self.mapper)
            })
            .await?;
        scheme.append_to_routes(&mut routes, &self.mapper);
        self.build_custom_services_from_routes(&routes, &data.protocol, &namespaces)
            .await
    }

    /// Fill the `routes` field of every entry; per-entry failures are logged
    /// and leave the entry untouched.
    pub async fn get_annotated_routes_bulk(
        &self,
        mut entries: Vec<TenantData>,
    ) -> Result<Vec<TenantData>, SiteError> {
        info!("Get bulk annotated routes");
        let all_tenants = self.dao.find_all().await?;
        for entry in &mut entries {
            let scheme = entry.tenant_id.as_ref().and_then(|id| {
                all_tenants.iter().find(|tenant| tenant.tenant_id == *id)
            });
            let eligible = scheme.map(|s| s.active).unwrap_or(false) || entry.ignore_missing;
            if !eligible {
                debug!("Tenant {:?} is not active and ignoreMissing is false", entry.tenant_id);
                continue;
            }
            let scheme = scheme.cloned().unwrap_or_else(|| TenantDns {
                tenant_id: entry.tenant_id.clone().unwrap_or_default(),
                ..TenantDns::default()
            });
            match self.get_annotated_routes(entry, scheme).await {
                Ok(routes) => entry.routes = routes,
                Err(err) => {
                    error!(
                        "Error occurred while getting annotated routes for tenant {:?}: {err}",
                        entry.tenant_id
                    );
                }
            }
        }
        Ok(entries)
    }

    /// Merge generated default routes into the scheme for `site`, keeping
    /// whatever is already configured.
    async fn merge_scheme_with_generated(
        &self,
        scheme: &mut TenantDns,
        site: &str,
    ) -> Result<(), SiteError> {
        let generated = self
            .generate_default_routes(&scheme.domain_name, &scheme.namespaces)
            .await?;
        match scheme.sites.get_mut(site) {
            None => {
                debug!("There is no scheme for site '{site}', insert whole generated scheme");
                scheme.sites.insert(site.to_string(), generated);
            }
            Some(existing) => {
                debug!("There are configured services for site '{site}', add only missed services");
                for (service, addresses) in generated {
                    existing.entry(service).or_insert(addresses);
                }
            }
        }
        Ok(())
    }

    /// One address per public service: `proto://prefix.domain/` or, without a
    /// domain, the host of the first GENERAL route backing the service.
    pub(crate) async fn generate_default_routes(
        &self,
        domain_name: &str,
        namespaces: &[String],
    ) -> Result<Services, SiteError> {
        info!("Generate default routes for tenant with domainName '{domain_name}'");
        let namespaces = self.namespaces_with_master(namespaces);
        let public_services = self.get_public_services(&namespaces).await?;
        self.generate_routes_for_services(domain_name, &public_services, &namespaces)
            .await
    }

    pub(crate) async fn generate_routes_for_services(
        &self,
        domain_name: &str,
        public_services: &[Service],
        namespaces: &[String],
    ) -> Result<Services, SiteError> {
        let mut result = Services::new();
        for service in public_services {
            let service_name = service.metadata.name.clone();
            let host = if domain_name.is_empty() {
                let backing = self
                    .paas
                    .get_routes_for_namespaces_filtered(namespaces, |route| {
                        route.is_general(&self.mapper)
                            && route.spec.service.name == service_name
                    })
                    .await?;
                backing.first().map(|route| route.spec.host.clone())
            } else {
                let prefix = service.alias_prefix(&self.mapper).unwrap_or_default();
                Some(format!("{prefix}.{domain_name}"))
            };
            match host {
                Some(host) if !host.is_empty() => {
                    let url = format!("{}://{host}/", self.protocol);
                    debug!("For service '{service_name}' generated url is '{url}'");
                    result.insert(service_name, vec![Address::new(url)]);
                }
                _ => {
                    error!("Url for service '{service_name}' cannot be generated");
                    result.insert(service_name, vec![Address::new("")]);
                }
            }
        }
        Ok(result)
    }

    /// The virtual-shopping URL: tenant domain, the default zone, or the
    /// platform host as a last resort.
    pub(crate) fn generate_shopping_route(
        &self,
        domain_name: &str,
        tenant_name: &str,
    ) -> Vec<Address> {
        let host = if !domain_name.is_empty() {
            domain_name.to_string()
        } else if !self.default_domain_zone.is_empty() {
            format!("{tenant_name}.{}", self.default_domain_zone)
        } else {
            format!("{tenant_name}.{}", self.platform_hostname)
        };
        let url = format!("{}://{host}/", self.protocol);
        debug!("For service '{SHOPPING_FRONTEND}' generated url is '{url}'");
        vec![Address::new(url)]
    }

    /// Services carrying the alias-prefix annotation, i.e. publicly
    /// exposable ones.
    pub async fn get_public_services(
        &self,
        namespaces: &[String],
    ) -> Result<Vec<Service>, SiteError> {
        let namespaces = if namespaces.is_empty() {
            vec![self.paas.namespace.clone()]
        } else {
            namespaces.to_vec()
        };
        let services = self
            .paas
            .get_services_for_namespaces_filtered(&namespaces, |service| {
                service.alias_prefix(&self.mapper).is_some()
            })
            .await?;
        Ok(services)
    }

    /// Raw route listing with the namespace/name dispatch of the REST API.
    pub async fn get_open_shift_routes(
        &self,
        namespace: Option<String>,
        name: Option<String>,
        namespaces: Option<String>,
    ) -> Result<Vec<Route>, SiteError> {
        if let Some(namespace) = namespace.filter(|ns| !ns.is_empty()) {
            debug!("Get openshift routes for namespace {namespace}");
            return Ok(self.paas.get_routes_for_namespaces(&[namespace]).await?);
        }
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            let namespaces = match namespaces {
                Some(list) if !list.is_empty() => {
                    list.split(',').map(str::to_string).collect()
                }
                _ => vec![self.paas.namespace.clone()],
            };
            debug!("Get openshift route with name {name} in namespaces {namespaces:?}");
            return Ok(self
                .paas
                .get_routes_for_namespaces_filtered(&namespaces, |route| {
                    route.metadata.name == name
                })
                .await?);
        }
        if let Some(list) = namespaces.filter(|l| !l.is_empty()) {
            let namespaces: Vec<String> = list.split(',').map(str::to_string).collect();
            debug!("Get openshift routes for namespaces {namespaces:?}");
            return Ok(self.paas.get_routes_for_namespaces(&namespaces).await?);
        }
        debug!("Get openshift routes for the master namespace");
        let namespace = self.paas.namespace.clone();
        Ok(self.paas.get_routes(&namespace).await?)
    }

    /// Tenants whose addresses resolve to `host`, case-insensitively.
    pub async fn search(&self, host: &str) -> Result<Vec<TenantDns>, SiteError> {
        let wanted = Address::new(host).host();
        if wanted.is_empty() {
            return Err(SiteError::BadRequest("Host format is not valid".to_string()));
        }
        let tenants = self.find_all().await?;
        Ok(tenants
            .into_iter()
            .filter(|tenant| tenant.has_host(&wanted))
            .collect())
    }

    /// Project routes into display services: group by service id, keep the
    /// highest-priority route per group.
    pub(crate) async fn build_custom_services_from_routes(
        &self,
        routes: &[Route],
        protocol: &str,
        namespaces: &[String],
    ) -> Result<Vec<CustomService>, SiteError> {
        let mut by_id: BTreeMap<String, Vec<&Route>> = BTreeMap::new();
        for route in routes {
            let id = route.service_id(&self.mapper, &route.spec.service.name);
            by_id.entry(id.to_string()).or_default().push(route);
        }

        let mut services = Vec::new();
        for group in by_id.values_mut() {
            group.sort_by_key(|route| std::cmp::Reverse(route.priority(&self.mapper)));
            let route = group[0];
            let mut service = self
                .build_custom_service_from_route(route, protocol, namespaces)
                .await?;
            if service.id == SHOPPING_FRONTEND {
                service.name = "Shopping Catalogue".to_string();
                service.description = "Market for your customers".to_string();
            }
            services.push(service);
        }
        Ok(services)
    }

    async fn build_custom_service_from_route(
        &self,
        route: &Route,
        protocol: &str,
        namespaces: &[String],
    ) -> Result<CustomService, SiteError> {
        let backing_service = route.spec.service.name.clone();
        let id = self
            .resolve_field(
                &backing_service,
                route.service_id(&self.mapper, ""),
                |service| service.service_id(&self.mapper).to_string(),
                &backing_service,
                namespaces,
            )
            .await?;
        let name = self
            .resolve_field(
                &backing_service,
                route.show_name(&self.mapper),
                |service| service.show_name(&self.mapper).to_string(),
                &route.metadata.name,
                namespaces,
            )
            .await?;
        let description = self
            .resolve_field(
                &backing_service,
                route.description(&self.mapper),
                |service| service.description(&self.mapper).to_string(),
                "",
                namespaces,
            )
            .await?;
        let url = self
            .resolve_custom_service_url(route, protocol, namespaces)
            .await?;
        Ok(CustomService {
            id,
            name,
            url,
            description,
        })
    }

    /// Route annotation first, backing-service annotation second, default
    /// last.
    async fn resolve_field<F>(
        &self,
        service_name: &str,
        from_route: &str,
        from_service: F,
        default: &str,
        namespaces: &[String],
    ) -> Result<String, SiteError>
    where
        F: Fn(&Service) -> String,
    {
        if !from_route.is_empty() {
            return Ok(from_route.to_string());
        }
        let services = self
            .paas
            .get_services_for_namespaces_filtered(namespaces, |service| {
                service.metadata.name == service_name
            })
            .await?;
        match services.first() {
            None => Ok(default.to_string()),
            Some(service) => {
                let value = from_service(service);
                if value.is_empty() {
                    Ok(default.to_string())
                } else {
                    Ok(value)
                }
            }
        }
    }

    async fn resolve_custom_service_url(
        &self,
        route: &Route,
        protocol: &str,
        namespaces: &[String],
    ) -> Result<String, SiteError> {
        let protocol = if protocol.is_empty() {
            self.protocol.as_str()
        } else {
            protocol
        };
        let suffix = self
            .resolve_field(
                &route.spec.service.name,
                route.url_suffix(&self.mapper),
                |service| service.url_suffix(&self.mapper).to_string(),
                "",
                namespaces,
            )
            .await?;
        let path = format!("{}/{}", route.spec.path, suffix)
            .replace("//", "/")
            .trim_start_matches('/')
            .to_string();
        Ok(format!("{protocol}://{}/{path}", route.spec.host))
    }
}
