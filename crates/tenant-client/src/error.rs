//! tenant-manager client errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TenantManagerError {
    /// Tenant-manager does not know the tenant
    #[error("tenant not found in tenant-manager")]
    TenantNotFound,

    /// Transport failure
    #[error("tenant-manager request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Unexpected status code from tenant-manager
    #[error("unexpected status {status} from tenant-manager: {message}")]
    UnexpectedStatus { status: u16, message: String },

    /// Response body could not be decoded
    #[error("failed to decode tenant-manager response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TenantManagerError {
    /// Transport failures and 5xx answers are worth retrying; the lookups
    /// are idempotent.
    pub fn is_transient(&self) -> bool {
        match self {
            TenantManagerError::Http(_) => true,
            TenantManagerError::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
