//! Tenant watch events.
//!
//! Tenant-manager publishes lifecycle events on a watch channel. The client
//! reads raw frames from a connector, decodes them and dispatches to the
//! callbacks registered per event type.

use crate::models::Tenant;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Channel capacity of the tenant watch stream.
pub const TENANT_WATCH_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TenantWatchEventType {
    Subscribed,
    Created,
    Modified,
    Deleted,
}

impl TenantWatchEventType {
    pub const ALL: [TenantWatchEventType; 4] = [
        TenantWatchEventType::Subscribed,
        TenantWatchEventType::Created,
        TenantWatchEventType::Modified,
        TenantWatchEventType::Deleted,
    ];
}

impl std::fmt::Display for TenantWatchEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TenantWatchEventType::Subscribed => "SUBSCRIBED",
            TenantWatchEventType::Created => "CREATED",
            TenantWatchEventType::Modified => "MODIFIED",
            TenantWatchEventType::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantWatchEvent {
    #[serde(rename = "type")]
    pub event_type: TenantWatchEventType,
    #[serde(default)]
    pub tenants: Vec<Tenant>,
}

/// Produces raw tenant watch frames. A returned stream ends when the
/// underlying connection closes; the client reconnects by subscribing again.
#[async_trait]
pub trait TenantWatchConnector: Send + Sync {
    async fn subscribe(&self) -> mpsc::Receiver<Vec<u8>>;
}

/// Streams newline-delimited tenant watch frames over chunked HTTP. The
/// stream ends on any transport error; reconnection is the reader's job.
pub struct HttpTenantWatchConnector {
    client: reqwest::Client,
    watch_url: String,
}

impl std::fmt::Debug for HttpTenantWatchConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTenantWatchConnector")
            .field("watch_url", &self.watch_url)
            .finish()
    }
}

impl HttpTenantWatchConnector {
    /// `base_url` points at the tenant-manager API root; the watch channel
    /// lives under `/watch`.
    pub fn new(base_url: String) -> Result<Self, crate::TenantManagerError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            watch_url: format!("{}/watch", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl TenantWatchConnector for HttpTenantWatchConnector {
    async fn subscribe(&self) -> mpsc::Receiver<Vec<u8>> {
        use futures::StreamExt;

        let (tx, rx) = mpsc::channel(TENANT_WATCH_CHANNEL_CAPACITY);
        let client = self.client.clone();
        let url = self.watch_url.clone();
        tokio::spawn(async move {
            let response = match client.get(&url).send().await {
                Ok(response) if response.status().is_success() => response,
                Ok(response) => {
                    tracing::error!(
                        "Tenant watch connect to {url} returned status {}",
                        response.status()
                    );
                    return;
                }
                Err(err) => {
                    tracing::error!("Tenant watch connect to {url} failed: {err}");
                    return;
                }
            };
            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = stream.next().await {
                let Ok(chunk) = chunk else {
                    tracing::error!("Tenant watch read from {url} failed");
                    return;
                };
                buffer.extend_from_slice(&chunk);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let frame: Vec<u8> = buffer.drain(..=pos).collect();
                    let frame = &frame[..frame.len() - 1];
                    if frame.is_empty() {
                        continue;
                    }
                    if tx.send(frame.to_vec()).await.is_err() {
                        return;
                    }
                }
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_parses_with_tenants() {
        let raw = r#"{"type": "MODIFIED", "tenants": [{"objectId": "t1", "status": "ACTIVE"}]}"#;
        let event: TenantWatchEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_type, TenantWatchEventType::Modified);
        assert_eq!(event.tenants.len(), 1);
    }

    #[test]
    fn event_without_tenants_defaults_to_empty() {
        let event: TenantWatchEvent = serde_json::from_str(r#"{"type": "DELETED"}"#).unwrap();
        assert!(event.tenants.is_empty());
    }
}
