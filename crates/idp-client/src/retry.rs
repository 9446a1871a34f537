//! Deduplicating, retrying publisher.
//!
//! Every request is hashed treating the URL lists as sets; a request equal to
//! the previously sent one is skipped. A changed request cancels any
//! publication still in flight and starts a new background task that retries
//! every five seconds until it lands.

use crate::error::IdpError;
use crate::facade::UriRequest;
use crate::rest::IdpApi;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, warn};

const RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct RetryingIdpClient {
    api: Arc<dyn IdpApi>,
    last_hash: Mutex<u64>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RetryingIdpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingIdpClient").finish_non_exhaustive()
    }
}

impl RetryingIdpClient {
    pub fn new(api: Arc<dyn IdpApi>) -> Arc<Self> {
        Arc::new(Self {
            api,
            last_hash: Mutex::new(0),
            in_flight: Mutex::new(None),
        })
    }

    /// Infinite retries: the service must not come up without knowing whether
    /// the registration endpoint is supported.
    pub async fn check_post_uri_feature(&self) -> Result<bool, IdpError> {
        loop {
            match self.api.check_post_uri_feature().await {
                Ok(supported) => return Ok(supported),
                Err(err) => {
                    error!("Failed to send request to IDP {err}. Trying again...");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    /// Accept a request for publication. Returns immediately; delivery is
    /// retried in the background until success or supersession.
    pub async fn post_uri(&self, request: UriRequest) -> Result<(), IdpError> {
        let hash = request_hash(&request);
        {
            let mut last = self.last_hash.lock().unwrap_or_else(|e| e.into_inner());
            if *last == hash {
                warn!("Request with the same data was already sent. Skipping...");
                return Ok(());
            }
            *last = hash;
        }

        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = in_flight.take() {
            previous.abort();
        }
        let api = Arc::clone(&self.api);
        *in_flight = Some(tokio::spawn(async move {
            loop {
                match api.post_uri(&request).await {
                    Ok(()) => return,
                    Err(err) => {
                        error!("Failed to send request to IDP {err}. Trying again...");
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }));
        Ok(())
    }

    /// Force the next `post_uri` to send irrespective of the stored hash.
    pub fn reset(&self) {
        *self.last_hash.lock().unwrap_or_else(|e| e.into_inner()) = 0;
    }
}

/// Order-insensitive request hash: URL lists and the tenant list are sorted
/// before hashing, so set-equal requests collide on purpose.
fn request_hash(request: &UriRequest) -> u64 {
    let mut tenants: Vec<(String, Vec<String>)> = request
        .tenants
        .iter()
        .map(|t| {
            let mut urls = t.urls.clone();
            urls.sort();
            (t.id.clone(), urls)
        })
        .collect();
    tenants.sort();
    let mut common = request.cloud_common.urls.clone();
    common.sort();

    let mut hasher = DefaultHasher::new();
    request.namespace.hash(&mut hasher);
    tenants.hash(&mut hasher);
    common.hash(&mut hasher);
    let hash = hasher.finish();
    // 0 is the "never sent" sentinel
    if hash == 0 {
        1
    } else {
        hash
    }
}
