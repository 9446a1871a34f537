//! Domain model: tenant route schemes.
//!
//! A tenant's scheme is the tree `sites -> services -> addresses`. Site
//! `"default"` is the conventional root. Only active tenants materialise
//! routes in the cluster.

pub mod validator;

use paas_client::annotations::{self, AnnotationMapper};
use paas_client::{CustomService, Metadata, Route, RouteSpec, Service, ServiceSpec, Target};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_SITE: &str = "default";
pub const SHOPPING_FRONTEND: &str = "shopping-frontend";
pub const IDENTITY_PROVIDER_ID: &str = "identity-provider";
pub const PUBLIC_GATEWAY_SERVICE_ID: &str = "public-gateway-service";
pub const TENANT_SERVICE_PREFIX: &str = "tenant-";
pub const NAME_MAX_LENGTH: usize = 63;

const HTTP_PROTOCOL: &str = "http://";
const HTTPS_PROTOCOL: &str = "https://";

/// A bare host or a URL pointing at a tenant service.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The host component, tolerating scheme-less input. Empty string when
    /// the address does not parse.
    pub fn host(&self) -> String {
        match url::Url::parse(&self.with_scheme()) {
            Ok(parsed) => match parsed.host_str() {
                Some(host) => match parsed.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                },
                None => String::new(),
            },
            Err(_) => String::new(),
        }
    }

    /// The path component, `""` when the address does not parse.
    #[allow(dead_code)] // only hosts route; paths are informational
    pub fn path(&self) -> String {
        match url::Url::parse(&self.with_scheme()) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => String::new(),
        }
    }

    /// Hosts compare case-insensitively.
    pub fn host_matches(&self, host: &str) -> bool {
        self.host().to_lowercase() == host.to_lowercase()
    }

    fn with_scheme(&self) -> String {
        if self.0.starts_with(HTTP_PROTOCOL) || self.0.starts_with(HTTPS_PROTOCOL) {
            self.0.clone()
        } else {
            format!("{HTTPS_PROTOCOL}{}", self.0)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// `service name -> addresses`, ordered for stable output.
pub type Services = BTreeMap<String, Vec<Address>>;

/// `site name -> services`.
pub type Sites = BTreeMap<String, Services>;

/// The persisted scheme of one tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TenantDns {
    pub tenant_id: String,
    pub tenant_admin: String,
    pub sites: Sites,
    pub active: bool,
    pub namespaces: Vec<String>,
    pub domain_name: String,
    pub service_name: String,
    pub tenant_name: String,
    /// Tombstone: set by delete, consumed by the next reconciliation pass.
    #[serde(skip)]
    pub removed: bool,
}

impl TenantDns {
    /// The cluster route materialising one (service, address) pair of this
    /// tenant.
    pub fn to_route(&self, service: &str, address: &Address, mapper: &AnnotationMapper) -> Route {
        let mut route_annotations = std::collections::HashMap::new();
        route_annotations.insert(
            mapper.qualify(annotations::TENANT_ID),
            self.tenant_id.clone(),
        );
        Route {
            metadata: Metadata {
                name: self.route_name(service, address),
                namespace: String::new(),
                annotations: route_annotations,
            },
            spec: RouteSpec {
                host: address.host(),
                service: Target {
                    name: service.to_string(),
                },
                ..RouteSpec::default()
            },
        }
    }

    /// Stable unique route name: `{service}-{tenantId}-{crc32(address)}`.
    pub fn route_name(&self, service: &str, address: &Address) -> String {
        format!(
            "{service}-{}-{:08x}",
            self.tenant_id,
            crc32::checksum(address.as_str().as_bytes())
        )
    }

    /// Append one route per (service, address) of every site.
    pub fn append_to_routes(&self, routes: &mut Vec<Route>, mapper: &AnnotationMapper) {
        for services in self.sites.values() {
            for (service, addresses) in services {
                for address in addresses {
                    routes.push(self.to_route(service, address, mapper));
                }
            }
        }
    }

    /// Drop every site except `site`.
    pub fn filter_by_site(&mut self, site: &str) {
        self.sites.retain(|name, _| name == site);
    }

    /// Reduce every address to its bare host.
    pub fn flatten_addresses_to_hosts(&mut self) {
        for services in self.sites.values_mut() {
            for addresses in services.values_mut() {
                for address in addresses.iter_mut() {
                    *address = Address::new(address.host());
                }
            }
        }
    }

    /// The site (if any) that lists an address with this host. Prefers
    /// `"default"` when several match; hosts compare case-insensitively.
    pub fn site_for_host(&self, host: &str) -> String {
        let mut found = Vec::new();
        for (site, services) in &self.sites {
            let matches = services
                .values()
                .flatten()
                .any(|address| address.host_matches(host));
            if matches {
                found.push(site.clone());
            }
        }
        if found.iter().any(|site| site == DEFAULT_SITE) {
            return DEFAULT_SITE.to_string();
        }
        found.into_iter().next().unwrap_or_default()
    }

    pub fn has_host(&self, host: &str) -> bool {
        self.sites
            .values()
            .flat_map(|services| services.values())
            .flatten()
            .any(|address| address.host_matches(host))
    }
}

/// `host` or `host/suffix`.
pub fn concat_address(host: &str, suffix: &str) -> Address {
    if suffix.is_empty() {
        Address::new(host)
    } else {
        Address::new(format!("{host}/{suffix}"))
    }
}

/// Project cluster routes into tenant schemes, one per distinct tenant-id
/// annotation (GENERAL included). Used once at first boot.
pub fn from_routes(routes: &[Route], mapper: &AnnotationMapper) -> Vec<TenantDns> {
    let mut by_tenant: BTreeMap<String, TenantDns> = BTreeMap::new();
    for route in routes {
        let tenant_id = route.tenant_id(mapper).unwrap_or_default().to_string();
        let tenant = by_tenant.entry(tenant_id.clone()).or_insert_with(|| TenantDns {
            tenant_id,
            ..TenantDns::default()
        });
        let services = tenant.sites.entry(DEFAULT_SITE.to_string()).or_default();
        services
            .entry(route.spec.service.name.clone())
            .or_default()
            .push(concat_address(&route.spec.host, route.url_suffix(mapper)));
    }

    let mut tenants: Vec<TenantDns> = by_tenant
        .into_values()
        .map(|mut tenant| {
            tenant.active = true;
            tenant
        })
        .collect();
    sort_tenants(&mut tenants);
    tenants
}

/// Sort tenants by id and every address list ascending.
pub fn sort_tenants(tenants: &mut [TenantDns]) {
    tenants.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
    for tenant in tenants {
        for services in tenant.sites.values_mut() {
            for addresses in services.values_mut() {
                addresses.sort();
            }
        }
    }
}

/// Overlay the persisted scheme on top of the GENERAL routes: every site gets
/// the full general service set, then the tenant's own services win.
pub fn merge_scheme_with_general_routes(scheme: &TenantDns, general_routes: &[Route]) -> TenantDns {
    let general_services = routes_to_services(general_routes);
    let mut merged = scheme.clone();
    for services in merged.sites.values_mut() {
        let own = std::mem::take(services);
        *services = general_services.clone();
        for (service, addresses) in own {
            services.insert(service, addresses);
        }
    }
    merged
}

fn routes_to_services(routes: &[Route]) -> Services {
    let mut services = Services::new();
    for route in routes {
        services.insert(
            route.spec.service.name.clone(),
            vec![Address::new(route.spec.host.clone())],
        );
    }
    services
}

/// Per-(site, service) validation verdicts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationInfo {
    pub valid: bool,
    pub reason: String,
}

pub type ValidationResult = BTreeMap<String, BTreeMap<String, ValidationInfo>>;

/// Persisted first-boot marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Init {
    pub initialized: bool,
}

/// One tenant realm for the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Realm {
    #[serde(rename = "tenant")]
    pub realm_id: String,
    pub routes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Realms {
    pub tenants: Vec<Realm>,
    #[serde(rename = "cloud-common")]
    pub common_routes: Vec<String>,
}

/// Request/response envelope of the annotated-routes APIs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantData {
    #[serde(rename = "tenantId")]
    pub tenant_id: Option<String>,
    #[serde(rename = "name")]
    pub tenant_name: String,
    pub protocol: String,
    pub site: String,
    #[serde(rename = "ignoreMissing")]
    pub ignore_missing: bool,
    pub routes: Vec<CustomService>,
}

/// Virtual-service registration request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRegistration {
    #[serde(rename = "originalService")]
    pub original_service: String,
    pub port: RegistrationPort,
    #[serde(rename = "virtualService")]
    pub virtual_service: String,
    #[serde(rename = "virtualServiceAnnotations")]
    pub virtual_service_annotations: std::collections::HashMap<String, String>,
    pub hostname: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationPort {
    #[serde(rename = "originalServicePort")]
    pub service_port: i32,
    #[serde(rename = "originalServicePortName")]
    pub port_name: String,
}

impl ServiceRegistration {
    fn effective_port(&self) -> RegistrationPort {
        if self.port == RegistrationPort::default() {
            RegistrationPort {
                service_port: 8080,
                port_name: "web".to_string(),
            }
        } else {
            self.port.clone()
        }
    }

    pub fn to_service(&self, mapper: &AnnotationMapper) -> Service {
        let mut service_annotations = std::collections::HashMap::new();
        service_annotations.insert(
            mapper.qualify(annotations::ALIAS_PREFIX),
            self.virtual_service.clone(),
        );
        service_annotations.insert(
            mapper.qualify(annotations::SHOW_NAME),
            title_case(&self.virtual_service),
        );
        service_annotations.insert(
            mapper.qualify(annotations::SERVICE_TYPE),
            annotations::SERVICE_TYPE_VIRTUAL.to_string(),
        );
        for (key, value) in &self.virtual_service_annotations {
            service_annotations.insert(key.clone(), value.clone());
        }
        let port = self.effective_port();
        Service {
            metadata: Metadata {
                name: self.virtual_service.clone(),
                namespace: String::new(),
                annotations: service_annotations,
            },
            spec: ServiceSpec {
                selector: std::collections::HashMap::from([(
                    "name".to_string(),
                    self.original_service.clone(),
                )]),
                service_type: "ClusterIP".to_string(),
                ports: vec![paas_client::Port {
                    port: port.service_port,
                    name: port.port_name,
                    target_port: port.service_port,
                    protocol: "TCP".to_string(),
                    node_port: 0,
                }],
                ..ServiceSpec::default()
            },
        }
    }

    pub fn to_route(
        &self,
        platform_host: &str,
        namespace: &str,
        mapper: &AnnotationMapper,
    ) -> Route {
        let host = if self.hostname.is_empty() {
            Address::new(format!(
                "{}-{}.{}",
                self.virtual_service, namespace, platform_host
            ))
        } else {
            Address::new(self.hostname.clone())
        };
        let mut route_annotations = std::collections::HashMap::new();
        route_annotations.insert(
            mapper.qualify(annotations::TENANT_ID),
            paas_client::GENERAL_TENANT.to_string(),
        );
        route_annotations.insert(
            mapper.qualify(annotations::SHOW_NAME),
            title_case(&self.virtual_service),
        );
        route_annotations.insert(
            mapper.qualify(annotations::SERVICE_ID),
            self.virtual_service.clone(),
        );
        route_annotations.insert(
            mapper.qualify(annotations::SERVICE_TYPE),
            annotations::SERVICE_TYPE_VIRTUAL.to_string(),
        );
        Route {
            metadata: Metadata {
                name: self.virtual_service.clone(),
                namespace: String::new(),
                annotations: route_annotations,
            },
            spec: RouteSpec {
                host: host.host(),
                service: Target {
                    name: self.virtual_service.clone(),
                },
                port: paas_client::RoutePort {
                    target_port: self.effective_port().service_port,
                },
                path: String::new(),
            },
        }
    }

    /// Label-length checks: an empty host falls back to the generated
    /// `name + namespace` (<= 63); otherwise the first label must fit 63
    /// characters and the FQDN 255.
    pub fn validate_route(&self, route: &Route, namespace: &str) -> Result<(), String> {
        let fqdn = &route.spec.host;
        if fqdn.is_empty() {
            let name_with_namespace = format!("{}{}", route.metadata.name, namespace);
            if name_with_namespace.len() > NAME_MAX_LENGTH {
                return Err(format!(
                    "Hostname {name_with_namespace} is too long (more than 63 characters)"
                ));
            }
            return Ok(());
        }
        if let Some(dot) = fqdn.find('.') {
            let hostname = &fqdn[..dot];
            if hostname.len() > NAME_MAX_LENGTH {
                return Err(format!(
                    "Hostname {hostname} is too long (more than 63 characters)"
                ));
            }
            if fqdn.len() > 255 {
                return Err(format!("FQDN {fqdn} is too long (more than 255 characters)"));
            }
        }
        Ok(())
    }
}

/// `my-shop-front` -> `My Shop Front`.
pub fn title_case(name: &str) -> String {
    name.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub mod crc32 {
    //! CRC-32 with the Koopman polynomial, matching the checksum the route
    //! names in the cluster were historically generated with.

    use std::sync::LazyLock;

    const KOOPMAN_POLY: u32 = 0xD582_8281;

    static TABLE: LazyLock<[u32; 256]> = LazyLock::new(|| {
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut crc = i as u32;
            for _ in 0..8 {
                crc = if crc & 1 == 1 {
                    (crc >> 1) ^ KOOPMAN_POLY
                } else {
                    crc >> 1
                };
            }
            *entry = crc;
        }
        table
    });

    pub fn checksum(data: &[u8]) -> u32 {
        let mut crc = !0u32;
        for &byte in data {
            crc = TABLE[((crc ^ u32::from(byte)) & 0xff) as usize] ^ (crc >> 8);
        }
        !crc
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        /// Bit-by-bit reference without the lookup table.
        fn checksum_reference(data: &[u8]) -> u32 {
            let mut crc = !0u32;
            for &byte in data {
                crc ^= u32::from(byte);
                for _ in 0..8 {
                    crc = if crc & 1 == 1 {
                        (crc >> 1) ^ KOOPMAN_POLY
                    } else {
                        crc >> 1
                    };
                }
            }
            !crc
        }

        #[test]
        fn table_matches_bitwise_reference() {
            for input in [
                "".as_bytes(),
                b"a.example.org",
                b"b.example.org/welcome",
                b"shop.acme.example.org:8443",
            ] {
                assert_eq!(checksum(input), checksum_reference(input));
            }
        }

        #[test]
        fn distinct_addresses_yield_distinct_names() {
            assert_ne!(checksum(b"a.example.org"), checksum(b"b.example.org"));
        }
    }
}
