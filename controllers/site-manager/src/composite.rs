//! Composite-platform baseline access.
//!
//! In satellite mode, tenant authority lives with the baseline site-manager;
//! identity-provider route lookups are proxied there.

use crate::error::SiteError;
use async_trait::async_trait;
use paas_client::CustomService;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The one call site-management makes against its baseline.
#[async_trait]
pub trait BaselineSmApi: Send + Sync {
    async fn get_idp_route(
        &self,
        tenant_id: &str,
        protocol: &str,
        site: &str,
        ignore_missing: bool,
    ) -> Result<Vec<CustomService>, SiteError>;
}

/// reqwest-backed baseline client.
pub struct HttpBaselineSm {
    client: Client,
    base_url: String,
}

impl std::fmt::Debug for HttpBaselineSm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBaselineSm")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpBaselineSm {
    pub fn new(base_url: String) -> Result<Self, SiteError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(paas_client::PaasError::Http)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn idp_route_url(
        &self,
        tenant_id: &str,
        protocol: &str,
        site: &str,
        ignore_missing: bool,
    ) -> String {
        let mut params: Vec<String> = Vec::new();
        if !tenant_id.is_empty() {
            params.push(format!("tenantId={}", urlencoding::encode(tenant_id)));
        }
        if !protocol.is_empty() {
            params.push(format!("protocol={}", urlencoding::encode(protocol)));
        }
        if !site.is_empty() {
            params.push(format!("site={}", urlencoding::encode(site)));
        }
        if ignore_missing {
            params.push("ignoreMissing=true".to_string());
        }
        let mut url = format!("{}/api/v1/identity-provider-route", self.base_url);
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }
}

#[async_trait]
impl BaselineSmApi for HttpBaselineSm {
    async fn get_idp_route(
        &self,
        tenant_id: &str,
        protocol: &str,
        site: &str,
        ignore_missing: bool,
    ) -> Result<Vec<CustomService>, SiteError> {
        let url = self.idp_route_url(tenant_id, protocol, site, ignore_missing);
        debug!("Requesting identity-provider route from baseline: {url}");
        let response = self.client.get(&url).send().await.map_err(|err| {
            error!("Failed to get identity-provider route from baseline: {err}");
            SiteError::Internal(format!("request to baseline SM failed: {err}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Baseline SM returned status {status}: {body}");
            return Err(SiteError::Internal(format!(
                "baseline SM returned unexpected status: {status}"
            )));
        }
        response.json().await.map_err(|err| {
            SiteError::Internal(format!("failed to parse response body from baseline SM: {err}"))
        })
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Canned baseline responses plus call recording.
    #[derive(Debug, Default)]
    pub struct MockBaselineSm {
        pub response: Mutex<Vec<CustomService>>,
        pub calls: Mutex<Vec<(String, String, String, bool)>>,
    }

    #[async_trait]
    impl BaselineSmApi for MockBaselineSm {
        async fn get_idp_route(
            &self,
            tenant_id: &str,
            protocol: &str,
            site: &str,
            ignore_missing: bool,
        ) -> Result<Vec<CustomService>, SiteError> {
            self.calls.lock().unwrap_or_else(|e| e.into_inner()).push((
                tenant_id.to_string(),
                protocol.to_string(),
                site.to_string(),
                ignore_missing,
            ));
            Ok(self
                .response
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone())
        }
    }
}
