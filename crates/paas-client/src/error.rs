//! paas-mediation client errors.

use thiserror::Error;

/// Errors surfaced by the paas-mediation client.
#[derive(Debug, Error)]
pub enum PaasError {
    /// Transport failure
    #[error("paas-mediation request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The upstream cluster forbade the operation
    #[error("permission denied by cluster: {0}")]
    Permission(String),

    /// Unexpected status code from paas-mediation
    #[error("unexpected status {status} from paas-mediation: {message}")]
    UnexpectedStatus { status: u16, message: String },

    /// Response body could not be decoded
    #[error("failed to decode paas-mediation response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A namespace never showed up in the cache
    #[error("namespace {namespace} was not found in {kind} cache after {attempts} attempts")]
    NamespaceUnavailable {
        namespace: String,
        kind: &'static str,
        attempts: usize,
    },

    /// Malformed request parameters
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
