//! Watch stream transport.
//!
//! The cache engine consumes opaque JSON frames from a byte channel; this
//! module provides the connector that fills those channels. The production
//! connector streams newline-delimited frames from the paas-mediation watch
//! endpoint and reconnects forever, pushing a locally synthesised `INIT`
//! frame after every (re)connect so the cache re-lists the namespace.

use crate::models::{EventType, Metadata, ResourceEvent, Route};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Channel capacity of a single watch stream.
pub const WATCH_CHANNEL_CAPACITY: usize = 50;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Produces raw watch frames for a (namespace, resource kind) pair.
#[async_trait]
pub trait WatchConnector: Send + Sync {
    /// Open a watch stream. The returned receiver yields one JSON frame per
    /// event; the sender side lives for the process lifetime.
    async fn subscribe(&self, namespace: &str, resource: &str) -> mpsc::Receiver<Vec<u8>>;
}

/// Serialised `INIT` sentinel for `namespace`, valid for every resource kind
/// since only `object.metadata.namespace` is read.
pub fn init_frame(namespace: &str) -> Vec<u8> {
    let event = ResourceEvent {
        event_type: EventType::Init,
        object: Route {
            metadata: Metadata {
                namespace: namespace.to_string(),
                ..Metadata::default()
            },
            ..Route::default()
        },
    };
    // Static shape, serialisation cannot fail
    serde_json::to_vec(&event).unwrap_or_default()
}

/// Streams watch frames over chunked HTTP from paas-mediation.
pub struct HttpWatchConnector {
    client: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for HttpWatchConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpWatchConnector")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpWatchConnector {
    pub fn new(base_url: String) -> Result<Self, crate::PaasError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn watch_url(&self, namespace: &str, resource: &str) -> String {
        format!(
            "{}/watchapi/v2/paas-mediation/namespaces/{}/{}",
            self.base_url, namespace, resource
        )
    }
}

#[async_trait]
impl WatchConnector for HttpWatchConnector {
    async fn subscribe(&self, namespace: &str, resource: &str) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let url = self.watch_url(namespace, resource);
        let client = self.client.clone();
        let namespace = namespace.to_string();
        info!("Opening watch stream {url}");

        tokio::spawn(async move {
            loop {
                let response = match client.get(&url).send().await {
                    Ok(response) if response.status().is_success() => response,
                    Ok(response) => {
                        error!(
                            "Watch connect to {url} returned status {}, reconnecting",
                            response.status()
                        );
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                    Err(err) => {
                        error!("Watch connect to {url} failed: {err}, reconnecting");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                };

                // Snapshot signal: have the cache re-list this namespace
                // before applying incremental events.
                if tx.send(init_frame(&namespace)).await.is_err() {
                    debug!("Watch consumer for {url} dropped, stopping stream");
                    return;
                }

                let mut stream = response.bytes_stream();
                let mut buffer: Vec<u8> = Vec::new();
                loop {
                    match stream.next().await {
                        Some(Ok(chunk)) => {
                            buffer.extend_from_slice(&chunk);
                            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                                let frame: Vec<u8> = buffer.drain(..=pos).collect();
                                let frame = &frame[..frame.len() - 1];
                                if frame.is_empty() {
                                    continue;
                                }
                                if tx.send(frame.to_vec()).await.is_err() {
                                    debug!("Watch consumer for {url} dropped, stopping stream");
                                    return;
                                }
                            }
                        }
                        Some(Err(err)) => {
                            error!("Watch read from {url} failed: {err}, reconnecting");
                            break;
                        }
                        None => {
                            error!("Watch stream {url} closed by server, reconnecting");
                            break;
                        }
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
    use crate::models::RouteEvent;

    #[test]
    fn init_frame_carries_namespace() {
        let frame = init_frame("cloud-core");
        let event: RouteEvent = serde_json::from_slice(&frame).unwrap();
        assert_eq!(event.event_type, EventType::Init);
        assert_eq!(event.object.metadata.namespace, "cloud-core");
    }
}
