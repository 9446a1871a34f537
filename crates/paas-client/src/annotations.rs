//! Group-prefixed annotation lookup.
//!
//! Cluster annotations are qualified with a group prefix
//! (`qubership.cloud/tenant.service.id`). Lookups walk the configured
//! prefixes in order, the first hit wins; writes qualify with the preferred
//! (first) prefix.

use crate::models::{Metadata, Route, Service};
use crate::GENERAL_TENANT;
use std::collections::HashMap;

pub const TENANT_ID: &str = "tenant.service.tenant.id";
pub const SERVICE_ID: &str = "tenant.service.id";
pub const SHOW_NAME: &str = "tenant.service.show.name";
pub const SHOW_DESCRIPTION: &str = "tenant.service.show.description";
pub const URL_SUFFIX: &str = "tenant.service.url.suffix";
pub const ORDER: &str = "tenant.service.order";
pub const ALIAS_PREFIX: &str = "tenant.service.alias.prefix";
pub const SERVICE_TYPE: &str = "tenant.service.type";

pub const SERVICE_TYPE_VIRTUAL: &str = "virtual";

/// Resolves group-prefixed annotations.
#[derive(Debug, Clone)]
pub struct AnnotationMapper {
    groups: Vec<String>,
}

impl AnnotationMapper {
    pub fn new<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }

    /// Look `key` up under every configured group prefix, preferred prefix
    /// first.
    pub fn get<'a>(&self, annotations: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
        for group in &self.groups {
            if let Some(value) = annotations.get(&format!("{group}/{key}")) {
                return Some(value.as_str());
            }
        }
        None
    }

    /// Qualify `key` with the preferred group prefix for writes.
    pub fn qualify(&self, key: &str) -> String {
        format!("{}/{}", self.groups[0], key)
    }
}

impl Default for AnnotationMapper {
    fn default() -> Self {
        Self::new(["qubership.cloud"])
    }
}

impl Route {
    pub fn tenant_id(&self, mapper: &AnnotationMapper) -> Option<&str> {
        mapper.get(&self.metadata.annotations, TENANT_ID)
    }

    pub fn is_general(&self, mapper: &AnnotationMapper) -> bool {
        self.tenant_id(mapper) == Some(GENERAL_TENANT)
    }

    /// A route is manageable when it is bound to a concrete tenant, i.e. the
    /// tenant-id annotation is present with a non-GENERAL value.
    pub fn is_manageable(&self, mapper: &AnnotationMapper) -> bool {
        self.tenant_id(mapper)
            .is_some_and(|id| id != GENERAL_TENANT)
    }

    pub fn service_id<'a>(&'a self, mapper: &AnnotationMapper, default: &'a str) -> &'a str {
        mapper
            .get(&self.metadata.annotations, SERVICE_ID)
            .unwrap_or(default)
    }

    pub fn show_name(&self, mapper: &AnnotationMapper) -> &str {
        mapper
            .get(&self.metadata.annotations, SHOW_NAME)
            .unwrap_or("")
    }

    pub fn description(&self, mapper: &AnnotationMapper) -> &str {
        mapper
            .get(&self.metadata.annotations, SHOW_DESCRIPTION)
            .unwrap_or("")
    }

    pub fn url_suffix(&self, mapper: &AnnotationMapper) -> &str {
        mapper
            .get(&self.metadata.annotations, URL_SUFFIX)
            .unwrap_or("")
    }

    /// Ordering priority among routes sharing a service id. GENERAL routes
    /// always lose.
    pub fn priority(&self, mapper: &AnnotationMapper) -> i32 {
        if self.is_general(mapper) {
            return -1;
        }
        mapper
            .get(&self.metadata.annotations, ORDER)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

impl Service {
    pub fn service_id(&self, mapper: &AnnotationMapper) -> &str {
        mapper
            .get(&self.metadata.annotations, SERVICE_ID)
            .unwrap_or("")
    }

    pub fn show_name(&self, mapper: &AnnotationMapper) -> &str {
        mapper
            .get(&self.metadata.annotations, SHOW_NAME)
            .unwrap_or("")
    }

    pub fn description(&self, mapper: &AnnotationMapper) -> &str {
        mapper
            .get(&self.metadata.annotations, SHOW_DESCRIPTION)
            .unwrap_or("")
    }

    pub fn url_suffix(&self, mapper: &AnnotationMapper) -> &str {
        mapper
            .get(&self.metadata.annotations, URL_SUFFIX)
            .unwrap_or("")
    }

    /// The URL label marking a service as publicly exposable.
    pub fn alias_prefix(&self, mapper: &AnnotationMapper) -> Option<&str> {
        mapper.get(&self.metadata.annotations, ALIAS_PREFIX)
    }
}

/// Whether the metadata belongs to a service or route created by this system
/// on behalf of a registration.
pub fn is_virtual(metadata: &Metadata, mapper: &AnnotationMapper) -> bool {
    mapper.get(&metadata.annotations, SERVICE_TYPE) == Some(SERVICE_TYPE_VIRTUAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotated(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn preferred_prefix_wins() {
        let mapper = AnnotationMapper::new(["qubership.cloud", "legacy.cloud"]);
        let annotations = annotated(&[
            ("legacy.cloud/tenant.service.id", "old"),
            ("qubership.cloud/tenant.service.id", "new"),
        ]);
        assert_eq!(mapper.get(&annotations, SERVICE_ID), Some("new"));
    }

    #[test]
    fn falls_back_to_secondary_prefix() {
        let mapper = AnnotationMapper::new(["qubership.cloud", "legacy.cloud"]);
        let annotations = annotated(&[("legacy.cloud/tenant.service.id", "old")]);
        assert_eq!(mapper.get(&annotations, SERVICE_ID), Some("old"));
        assert!(mapper.get(&annotations, TENANT_ID).is_none());
    }

    #[test]
    fn route_priority_prefers_general_last() {
        let mapper = AnnotationMapper::default();
        let mut route = Route::default();
        route.metadata.annotations =
            annotated(&[("qubership.cloud/tenant.service.tenant.id", "GENERAL")]);
        assert_eq!(route.priority(&mapper), -1);

        route.metadata.annotations = annotated(&[
            ("qubership.cloud/tenant.service.tenant.id", "t1"),
            ("qubership.cloud/tenant.service.order", "7"),
        ]);
        assert_eq!(route.priority(&mapper), 7);

        route.metadata.annotations =
            annotated(&[("qubership.cloud/tenant.service.tenant.id", "t1")]);
        assert_eq!(route.priority(&mapper), 0);
    }

    #[test]
    fn manageable_requires_concrete_tenant() {
        let mapper = AnnotationMapper::default();
        let mut route = Route::default();
        assert!(!route.is_manageable(&mapper));

        route.metadata.annotations =
            annotated(&[("qubership.cloud/tenant.service.tenant.id", "GENERAL")]);
        assert!(!route.is_manageable(&mapper));
        assert!(route.is_general(&mapper));

        route.metadata.annotations =
            annotated(&[("qubership.cloud/tenant.service.tenant.id", "t1")]);
        assert!(route.is_manageable(&mapper));
    }
}
