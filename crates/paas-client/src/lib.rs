//! paas-mediation client
//!
//! A client library for the paas-mediation facade that fronts the cluster
//! API. Keeps an in-process view of routes, services and the two configmaps
//! site management cares about, hydrated by an initial list and kept current
//! by per-namespace watch streams.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use paas_client::{HttpPaasApi, HttpWatchConnector, PaasClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let api = Arc::new(HttpPaasApi::new("http://internal-gateway-service:8080".to_string())?);
//! let connector = Arc::new(HttpWatchConnector::new("http://internal-gateway-service:8080".to_string())?);
//! let client = PaasClient::new(api, connector, "cloud-core".to_string());
//! client.start().await?;
//!
//! let routes = client.get_routes("").await?;
//! # Ok(())
//! # }
//! ```

pub mod annotations;
pub mod cache;
pub mod client;
pub mod error;
pub mod models;
pub mod rest;
pub mod watch;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use annotations::AnnotationMapper;
pub use client::{PaasClient, RouteCallback};
pub use error::PaasError;
pub use models::*;
pub use rest::{HttpPaasApi, PaasApi};
pub use watch::{HttpWatchConnector, WatchConnector};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{ChannelWatchConnector, MockPaasApi};

/// Configmap carrying the `baseline` (parent namespace) entry of a composite
/// deployment.
pub const PROJECT_TYPE_CONFIG_MAP: &str = "baseline-version";
/// Configmap published by tenant-manager with the external route list.
pub const TM_CONFIGS_CONFIG_MAP: &str = "tenant-manager-configs";
/// Tenant-id annotation value marking a route as cluster-wide common.
pub const GENERAL_TENANT: &str = "GENERAL";
