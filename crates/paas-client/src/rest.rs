//! REST transport towards paas-mediation.
//!
//! URLs follow `{gateway}/api/v2/paas-mediation/namespaces/{ns}/{kind}` with
//! an optional `/{name}` suffix. List calls retry on transient failures;
//! mutations surface the cluster verdict to the caller.

use crate::cache::CacheEntry;
use crate::error::PaasError;
use crate::models::{ConfigMap, Route, Service};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

const LIST_ATTEMPTS: usize = 12;
const LIST_RETRY_DELAY: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// REST operations the cache engine needs from paas-mediation.
#[async_trait]
pub trait PaasApi: Send + Sync {
    async fn list_routes(&self, namespace: &str) -> Result<Vec<Route>, PaasError>;
    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, PaasError>;
    async fn list_config_maps(&self, namespace: &str) -> Result<Vec<ConfigMap>, PaasError>;

    async fn create_route(&self, namespace: &str, route: &Route) -> Result<Route, PaasError>;
    async fn update_route(&self, namespace: &str, route: &Route) -> Result<Route, PaasError>;
    async fn delete_route(&self, namespace: &str, name: &str) -> Result<(), PaasError>;

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, PaasError>;
    async fn update_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, PaasError>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), PaasError>;
}

/// reqwest-backed [`PaasApi`] implementation.
pub struct HttpPaasApi {
    client: Client,
    base_url: String,
}

impl std::fmt::Debug for HttpPaasApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPaasApi")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpPaasApi {
    pub fn new(base_url: String) -> Result<Self, PaasError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn build_url(&self, namespace: &str, kind: &str, name: &str) -> Result<String, PaasError> {
        if namespace.is_empty() || kind.is_empty() {
            return Err(PaasError::InvalidRequest(
                "namespace and resource kind can not be empty".to_string(),
            ));
        }
        let mut url = format!(
            "{}/api/v2/paas-mediation/namespaces/{}/{}",
            self.base_url, namespace, kind
        );
        if !name.is_empty() {
            url.push('/');
            url.push_str(name);
        }
        Ok(url)
    }

    async fn perform<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        expected: StatusCode,
    ) -> Result<R, PaasError> {
        debug!("Perform {method} request to paas-mediation: {url}");
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if status == StatusCode::FORBIDDEN {
            return Err(PaasError::Permission(text));
        }
        if status != expected {
            return Err(PaasError::UnexpectedStatus {
                status: status.as_u16(),
                message: format!(
                    "found {status} instead of {expected} while performing paas-mediation request: {text}"
                ),
            });
        }
        if text.is_empty() {
            // DELETE responses may carry no body
            return Ok(serde_json::from_str("null")?);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn list_with_retry<R: DeserializeOwned>(&self, url: &str) -> Result<Vec<R>, PaasError> {
        let mut last_error = None;
        for attempt in 1..=LIST_ATTEMPTS {
            match self
                .perform::<(), Vec<R>>(Method::GET, url, None, StatusCode::OK)
                .await
            {
                Ok(items) => return Ok(items),
                Err(err) => {
                    error!(
                        "Error occurred getting resource {url}, attempt {attempt}/{LIST_ATTEMPTS}: {err}"
                    );
                    last_error = Some(err);
                }
            }
            tokio::time::sleep(LIST_RETRY_DELAY).await;
        }
        Err(last_error.unwrap_or_else(|| PaasError::InvalidRequest("no attempts made".into())))
    }
}

#[async_trait]
impl PaasApi for HttpPaasApi {
    async fn list_routes(&self, namespace: &str) -> Result<Vec<Route>, PaasError> {
        let url = self.build_url(namespace, Route::KIND, "")?;
        self.list_with_retry(&url).await
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, PaasError> {
        let url = self.build_url(namespace, Service::KIND, "")?;
        self.list_with_retry(&url).await
    }

    async fn list_config_maps(&self, namespace: &str) -> Result<Vec<ConfigMap>, PaasError> {
        let url = self.build_url(namespace, ConfigMap::KIND, "")?;
        self.list_with_retry(&url).await
    }

    async fn create_route(&self, namespace: &str, route: &Route) -> Result<Route, PaasError> {
        let url = self.build_url(namespace, Route::KIND, "")?;
        self.perform(Method::POST, &url, Some(route), StatusCode::CREATED)
            .await
    }

    async fn update_route(&self, namespace: &str, route: &Route) -> Result<Route, PaasError> {
        let url = self.build_url(namespace, Route::KIND, "")?;
        self.perform(Method::PUT, &url, Some(route), StatusCode::OK)
            .await
    }

    async fn delete_route(&self, namespace: &str, name: &str) -> Result<(), PaasError> {
        let url = self.build_url(namespace, Route::KIND, name)?;
        let _: serde_json::Value = self
            .perform::<(), _>(Method::DELETE, &url, None, StatusCode::OK)
            .await?;
        Ok(())
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, PaasError> {
        let url = self.build_url(namespace, Service::KIND, "")?;
        self.perform(Method::POST, &url, Some(service), StatusCode::CREATED)
            .await
    }

    async fn update_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, PaasError> {
        let url = self.build_url(namespace, Service::KIND, "")?;
        self.perform(Method::PUT, &url, Some(service), StatusCode::OK)
            .await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), PaasError> {
        let url = self.build_url(namespace, Service::KIND, name)?;
        let _: serde_json::Value = self
            .perform::<(), _>(Method::DELETE, &url, None, StatusCode::OK)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_requires_namespace_and_kind() {
        let api = HttpPaasApi::new("http://gateway:8080".to_string()).unwrap();
        assert!(api.build_url("", "routes", "").is_err());
        assert_eq!(
            api.build_url("ns", "routes", "").unwrap(),
            "http://gateway:8080/api/v2/paas-mediation/namespaces/ns/routes"
        );
        assert_eq!(
            api.build_url("ns", "routes", "r1").unwrap(),
            "http://gateway:8080/api/v2/paas-mediation/namespaces/ns/routes/r1"
        );
    }
}
