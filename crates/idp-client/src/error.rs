//! identity-provider client errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdpError {
    /// Transport failure
    #[error("identity-provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx answer where one was required
    #[error("got response with unexpected code from identity-provider '{0}'")]
    UnexpectedStatus(u16),
}
