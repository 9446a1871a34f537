//! Cluster resource models
//!
//! Wire types exchanged with paas-mediation. Field names follow the cluster
//! API JSON: a route targets a service through `to`, ports use `targetPort`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Object metadata shared by routes and services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

/// An externally visible host -> service binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: RouteSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, rename = "to")]
    pub service: Target,
    #[serde(default)]
    pub port: RoutePort,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePort {
    #[serde(default, rename = "targetPort")]
    pub target_port: i32,
}

/// A cluster service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub selector: HashMap<String, String>,
    #[serde(default, rename = "clusterIP")]
    pub cluster_ip: String,
    #[serde(default, rename = "type")]
    pub service_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub port: i32,
    #[serde(default, rename = "targetPort")]
    pub target_port: i32,
    #[serde(default, rename = "nodePort", skip_serializing_if = "is_zero")]
    pub node_port: i32,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

/// A configmap, reduced to the two entries site management reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMap {
    #[serde(default)]
    pub metadata: ConfigMapMetadata,
    #[serde(default)]
    pub data: ConfigMapData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMapMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMapData {
    /// Parent namespace of a composite child project.
    #[serde(default, rename = "baseline")]
    pub parent: String,
    /// JSON array of hostnames exposed outside the cluster.
    #[serde(default, rename = "common-external-routes.json")]
    pub external_routes: String,
}

/// Projection of a route enriched with the backing service annotations,
/// served by the annotated-routes API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomService {
    pub id: String,
    pub name: String,
    pub url: String,
    pub description: String,
}

/// Watch stream event kinds. `INIT` is synthesised locally after each
/// (re)connect to force a namespace re-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Init,
    Added,
    Created,
    Modified,
    Deleted,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Init => "INIT",
            EventType::Added => "ADDED",
            EventType::Created => "CREATED",
            EventType::Modified => "MODIFIED",
            EventType::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// A decoded watch frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEvent<T> {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub object: T,
}

pub type RouteEvent = ResourceEvent<Route>;
pub type ServiceEvent = ResourceEvent<Service>;
pub type ConfigMapEvent = ResourceEvent<ConfigMap>;

impl Route {
    pub fn merge_port(&mut self, other: &Route) {
        if self.spec.port != other.spec.port {
            self.spec.port = other.spec.port.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_round_trips_cluster_json() {
        let raw = r#"{
            "metadata": {
                "name": "shop-t1-0a1b2c3d",
                "namespace": "cloud-core",
                "annotations": {"qubership.cloud/tenant.service.tenant.id": "t1"}
            },
            "spec": {"host": "shop.example.org", "path": "", "to": {"name": "shop"}, "port": {"targetPort": 8080}}
        }"#;
        let route: Route = serde_json::from_str(raw).unwrap();
        assert_eq!(route.spec.service.name, "shop");
        assert_eq!(route.spec.port.target_port, 8080);

        let back = serde_json::to_value(&route).unwrap();
        assert_eq!(back["spec"]["to"]["name"], "shop");
    }

    #[test]
    fn config_map_reads_baseline_and_external_routes() {
        let raw = r#"{
            "metadata": {"name": "baseline-version", "namespace": "child-ns"},
            "data": {"baseline": "cloud-core", "common-external-routes.json": "[\"a.example.org\"]"}
        }"#;
        let cm: ConfigMap = serde_json::from_str(raw).unwrap();
        assert_eq!(cm.data.parent, "cloud-core");
        assert_eq!(cm.data.external_routes, r#"["a.example.org"]"#);
    }

    #[test]
    fn event_type_uses_upper_case_wire_names() {
        let event: RouteEvent =
            serde_json::from_str(r#"{"type": "DELETED", "object": {"metadata": {"name": "r"}}}"#)
                .unwrap();
        assert_eq!(event.event_type, EventType::Deleted);
        assert_eq!(event.object.metadata.name, "r");
    }

    #[test]
    fn init_event_parses_with_namespace_only() {
        let event: RouteEvent = serde_json::from_str(
            r#"{"type": "INIT", "object": {"metadata": {"namespace": "cloud-core"}}}"#,
        )
        .unwrap();
        assert_eq!(event.event_type, EventType::Init);
        assert_eq!(event.object.metadata.namespace, "cloud-core");
    }
}
