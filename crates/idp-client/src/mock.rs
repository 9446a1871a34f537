//! Mock identity-provider transport for unit testing.

use crate::error::IdpError;
use crate::facade::UriRequest;
use crate::rest::IdpApi;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Records publications and can be told to fail the next N attempts.
#[derive(Default)]
pub struct MockIdpApi {
    posted: Mutex<Vec<UriRequest>>,
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
    feature_supported: std::sync::atomic::AtomicBool,
}

impl std::fmt::Debug for MockIdpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockIdpApi").finish_non_exhaustive()
    }
}

impl MockIdpApi {
    pub fn new() -> Self {
        let mock = Self::default();
        mock.feature_supported.store(true, Ordering::SeqCst);
        mock
    }

    /// Make the next `count` post attempts fail with a 503.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn set_feature_supported(&self, supported: bool) {
        self.feature_supported.store(supported, Ordering::SeqCst);
    }

    /// Successful publications only.
    pub fn post_count(&self) -> usize {
        self.posted.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// All attempts, including failed ones.
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<UriRequest> {
        self.posted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    pub fn requests(&self) -> Vec<UriRequest> {
        self.posted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl IdpApi for MockIdpApi {
    async fn check_post_uri_feature(&self) -> Result<bool, IdpError> {
        Ok(self.feature_supported.load(Ordering::SeqCst))
    }

    async fn post_uri(&self, request: &UriRequest) -> Result<(), IdpError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(IdpError::UnexpectedStatus(503));
        }
        self.posted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        Ok(())
    }
}
