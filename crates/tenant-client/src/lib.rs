//! tenant-manager client
//!
//! REST lookups against tenant-manager, a reconnecting watch-event reader
//! with per-event-type callback dispatch, and the actively maintained index
//! of ACTIVE tenants keyed by external id.

pub mod backoff;
pub mod client;
pub mod error;
pub mod models;
pub mod watch;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use backoff::RetryBackoff;
pub use client::{HttpTenantManagerApi, TenantManagerApi, TenantManagerClient};
pub use error::TenantManagerError;
pub use models::{Admin, Tenant, STATUS_ACTIVE, STATUS_SUSPENDED};
pub use watch::{
    HttpTenantWatchConnector, TenantWatchConnector, TenantWatchEvent, TenantWatchEventType,
};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{ChannelTenantWatchConnector, MockTenantManagerApi};
