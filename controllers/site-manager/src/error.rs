//! Service-level error types.
//!
//! Error kinds map one-to-one onto the REST error contract: bad input and
//! inactive tenants surface as 400, cluster permission refusals as 403,
//! missing tenants and resources as 404, everything else as 500.

use idp_client::IdpError;
use paas_client::PaasError;
use tenant_client::TenantManagerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("Tenant {0} is not present in database")]
    TenantNotFound(String),

    #[error("Tenant {0} is not in active state")]
    TenantNotActive(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Timeout for synchronization was exceeded")]
    SyncTimeout,

    #[error(transparent)]
    Paas(#[from] PaasError),

    #[error(transparent)]
    TenantManager(#[from] TenantManagerError),

    #[error(transparent)]
    Idp(#[from] IdpError),

    #[error("{0}")]
    Internal(String),
}

impl SiteError {
    /// Whether the error denotes a missing tenant, whichever layer noticed.
    pub fn is_tenant_not_found(&self) -> bool {
        matches!(
            self,
            SiteError::TenantNotFound(_)
                | SiteError::TenantManager(TenantManagerError::TenantNotFound)
        )
    }
}
