//! HTTP transfer channel backed by `reqwest`.
//!
//! Downloads stream the response body chunk by chunk and report cumulative
//! byte progress; uploads post a zero-filled payload and report only the
//! final outcome, matching the capability limit documented on
//! [`TransferChannel`].

use crate::channel::{TransferChannel, TransferEvent, TransferHandle};
use crate::Result;
use log::debug;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// [`TransferChannel`] implementation over HTTP(S).
pub struct HttpChannel {
    client: reqwest::Client,
}

impl HttpChannel {
    /// Builds a channel with a default HTTP client.
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
        })
    }

    /// Builds a channel over a caller-supplied client, for custom proxy or
    /// TLS settings.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl TransferChannel for HttpChannel {
    fn open_download(&self, url: &str, timeout: Duration) -> TransferHandle {
        let (handle, events, cancel) = TransferHandle::new();
        let client = self.client.clone();
        let url = url.to_string();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("download transfer cancelled");
                }
                timed_out = tokio::time::timeout(timeout, stream_download(client, url, events.clone())) => {
                    if timed_out.is_err() {
                        let _ = events.send(TransferEvent::TimedOut);
                    }
                }
            }
        });

        handle
    }

    fn open_upload(&self, url: &str, payload_bytes: u64) -> TransferHandle {
        let (handle, events, cancel) = TransferHandle::new();
        let client = self.client.clone();
        let url = url.to_string();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("upload transfer cancelled");
                }
                _ = post_payload(client, url, payload_bytes, events.clone()) => {}
            }
        });

        handle
    }
}

async fn stream_download(
    client: reqwest::Client,
    url: String,
    events: UnboundedSender<TransferEvent>,
) {
    let mut response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(err) => {
            let _ = events.send(TransferEvent::Failed {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            });
            return;
        }
    };

    let status = response.status().as_u16();
    if !response.status().is_success() {
        // Non-success statuses are terminal for this attempt; the engine
        // classifies them for its fallback decision.
        let _ = events.send(TransferEvent::Completed { status, bytes: 0 });
        return;
    }

    let total = response.content_length();
    let mut loaded = 0u64;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                loaded += chunk.len() as u64;
                if events
                    .send(TransferEvent::Progress { loaded, total })
                    .is_err()
                {
                    // Receiver gone: the engine dropped the handle.
                    return;
                }
            }
            Ok(None) => {
                let _ = events.send(TransferEvent::Completed {
                    status,
                    bytes: loaded,
                });
                return;
            }
            Err(err) => {
                let _ = events.send(TransferEvent::Failed {
                    status: Some(0),
                    message: err.to_string(),
                });
                return;
            }
        }
    }
}

async fn post_payload(
    client: reqwest::Client,
    url: String,
    payload_bytes: u64,
    events: UnboundedSender<TransferEvent>,
) {
    let payload = vec![0u8; payload_bytes as usize];

    match client
        .post(&url)
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
        .body(payload)
        .send()
        .await
    {
        Ok(response) => {
            let _ = events.send(TransferEvent::Completed {
                status: response.status().as_u16(),
                bytes: payload_bytes,
            });
        }
        Err(err) => {
            let _ = events.send(TransferEvent::Failed {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            });
        }
    }
}
