//! identity-provider client
//!
//! Publishes the redirect URI set (per-tenant plus cloud-common) to the
//! identity provider. Publications are deduplicated by an order-insensitive
//! request hash and retried in the background until they land; a newer
//! publication cancels the one in flight.

pub mod error;
pub mod facade;
pub mod rest;
pub mod retry;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use error::IdpError;
pub use facade::{CloudCommon, IdpFacade, TenantUris, UriRequest};
pub use rest::{force_frontend_cache_refresh, HttpIdpApi, IdpApi};
pub use retry::RetryingIdpClient;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockIdpApi;
