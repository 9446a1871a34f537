//! REST transport towards the identity provider.

use crate::error::IdpError;
use crate::facade::UriRequest;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

const POST_URI_PATH: &str = "/auth/actions/urls";
const FRONTEND_CACHE_PATH: &str = "/auth/actions/frontend";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The two identity-provider operations the publisher needs.
#[async_trait]
pub trait IdpApi: Send + Sync {
    /// Probe whether the URL registration endpoint exists. `Ok(true)` on 200,
    /// `Ok(false)` on 404, error otherwise.
    async fn check_post_uri_feature(&self) -> Result<bool, IdpError>;

    /// Push the redirect URI set; any non-2xx answer is an error.
    async fn post_uri(&self, request: &UriRequest) -> Result<(), IdpError>;
}

/// reqwest-backed [`IdpApi`].
pub struct HttpIdpApi {
    client: Client,
    idp_url: String,
}

impl std::fmt::Debug for HttpIdpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIdpApi")
            .field("idp_url", &self.idp_url)
            .finish()
    }
}

impl HttpIdpApi {
    pub fn new(idp_url: String) -> Result<Self, IdpError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            idp_url: idp_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl IdpApi for HttpIdpApi {
    async fn check_post_uri_feature(&self) -> Result<bool, IdpError> {
        let url = format!("{}{}", self.idp_url, POST_URI_PATH);
        debug!("Probing identity-provider endpoint: OPTIONS {url}");
        let response = self
            .client
            .request(reqwest::Method::OPTIONS, &url)
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(IdpError::UnexpectedStatus(status.as_u16())),
        }
    }

    async fn post_uri(&self, request: &UriRequest) -> Result<(), IdpError> {
        let url = format!("{}{}", self.idp_url, POST_URI_PATH);
        info!(
            "Sending redirect URIs to identity provider: {} tenants, {} common",
            request.tenants.len(),
            request.cloud_common.urls.len()
        );
        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IdpError::UnexpectedStatus(status.as_u16()));
        }
        Ok(())
    }
}

/// Ask the identity provider to rebuild its frontend route cache. A 204
/// answer is the expected fast path.
pub async fn force_frontend_cache_refresh(idp_url: &str) -> Result<(), IdpError> {
    let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    let url = format!("{}{}", idp_url.trim_end_matches('/'), FRONTEND_CACHE_PATH);
    debug!("Sending request to update idp route cache: {url}");
    let response = client.post(&url).send().await?;
    let status = response.status();
    if !status.is_success() && status != StatusCode::NO_CONTENT {
        return Err(IdpError::UnexpectedStatus(status.as_u16()));
    }
    Ok(())
}
