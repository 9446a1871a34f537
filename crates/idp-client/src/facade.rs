//! Redirect-URI request assembly.

use crate::retry::RetryingIdpClient;
use crate::IdpError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Redirect URIs of a single tenant realm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantUris {
    pub id: String,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudCommon {
    pub urls: Vec<String>,
}

/// The POST body of the identity-provider URL registration endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriRequest {
    pub namespace: String,
    pub tenants: Vec<TenantUris>,
    #[serde(rename = "cloud-common")]
    pub cloud_common: CloudCommon,
}

impl UriRequest {
    /// Assemble a request, dropping empty URL strings and keeping every list
    /// present even when empty.
    pub fn build(
        namespace: &str,
        tenant_uris: &HashMap<String, Vec<String>>,
        common_uris: &[String],
    ) -> Self {
        let mut tenants: Vec<TenantUris> = tenant_uris
            .iter()
            .map(|(id, urls)| TenantUris {
                id: id.clone(),
                urls: non_empty(urls),
            })
            .collect();
        tenants.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            namespace: namespace.to_string(),
            tenants,
            cloud_common: CloudCommon {
                urls: non_empty(common_uris),
            },
        }
    }
}

fn non_empty(urls: &[String]) -> Vec<String> {
    urls.iter().filter(|u| !u.is_empty()).cloned().collect()
}

/// Site-management's view of the identity provider.
pub struct IdpFacade {
    namespace: String,
    client: Arc<RetryingIdpClient>,
}

impl std::fmt::Debug for IdpFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdpFacade")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl IdpFacade {
    pub fn new(namespace: String, client: Arc<RetryingIdpClient>) -> Self {
        Self { namespace, client }
    }

    /// Publish the redirect URI set. Returns as soon as the request is
    /// accepted for (possibly deferred) delivery.
    pub async fn set_redirect_uris(
        &self,
        tenant_uris: &HashMap<String, Vec<String>>,
        common_uris: &[String],
    ) -> Result<(), IdpError> {
        let request = UriRequest::build(&self.namespace, tenant_uris, common_uris);
        debug!("Prepared request to POST URIs: {request:?}");
        self.client.post_uri(request).await
    }

    pub async fn check_post_uri_feature(&self) -> Result<bool, IdpError> {
        self.client.check_post_uri_feature().await
    }

    /// Force the next publication to be sent irrespective of the dedup hash.
    pub fn reset(&self) {
        self.client.reset();
    }
}
