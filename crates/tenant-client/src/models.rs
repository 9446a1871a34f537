//! Tenant-manager wire types.

use serde::{Deserialize, Serialize};

pub const STATUS_ACTIVE: &str = "ACTIVE";
pub const STATUS_SUSPENDED: &str = "SUSPENDED";

/// Tenant administrator account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admin {
    #[serde(default, rename = "login")]
    pub email: String,
}

/// A tenant as tenant-manager reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    #[serde(default, rename = "objectId")]
    pub object_id: String,
    #[serde(default, rename = "externalId")]
    pub external_id: String,
    #[serde(default, rename = "domainName")]
    pub domain_name: String,
    #[serde(default, rename = "serviceName")]
    pub service_name: String,
    #[serde(default, rename = "name")]
    pub tenant_name: String,
    #[serde(default)]
    pub status: String,
    /// Comma-separated namespace list in the legacy composite layout.
    #[serde(default)]
    pub namespace: String,
    #[serde(default, rename = "admin")]
    pub user: Admin,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    /// Namespaces the tenant spans, empty entries dropped.
    pub fn namespaces(&self) -> Vec<String> {
        self.namespace
            .split(',')
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_parses_tenant_manager_json() {
        let raw = r#"{
            "objectId": "6d2c3397",
            "externalId": "acme",
            "domainName": "acme.example.org",
            "serviceName": "",
            "name": "acme",
            "status": "ACTIVE",
            "namespace": "ns-a,ns-b",
            "admin": {"login": "admin@acme.example.org"}
        }"#;
        let tenant: Tenant = serde_json::from_str(raw).unwrap();
        assert!(tenant.is_active());
        assert_eq!(tenant.user.email, "admin@acme.example.org");
        assert_eq!(tenant.namespaces(), vec!["ns-a", "ns-b"]);
    }

    #[test]
    fn empty_namespace_yields_no_entries() {
        let tenant = Tenant::default();
        assert!(tenant.namespaces().is_empty());
    }
}
