//! The transfer channel boundary.
//!
//! The engine never touches sockets directly. A [`TransferChannel`]
//! implementation performs the actual byte transfer and reports back through
//! a uniform event stream, which keeps the two-stage sequencing and the
//! endpoint fallback loop testable without a real network.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outcome and progress notifications from one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Bytes received so far, plus the expected total when the transport
    /// knows it. Downloads only; uploads cannot report byte progress.
    Progress { loaded: u64, total: Option<u64> },
    /// The transfer ran to completion. `status` is the HTTP-level status
    /// code (0 when the transport could not produce one) and `bytes` the
    /// final byte count.
    Completed { status: u16, bytes: u64 },
    /// The transfer failed before completion. A status of `Some(0)` or
    /// `None` indicates a transport-level (possibly CORS-like) failure.
    Failed {
        status: Option<u16>,
        message: String,
    },
    /// No completion within the allotted time.
    TimedOut,
}

/// Abstraction over the transport performing byte transfers.
///
/// Implementations must deliver the completion, failure, or timeout event
/// as the last event of a transfer, and must stop sending once the
/// handle's cancellation token fires (best effort: one final in-flight
/// event may still arrive and is ignored by the engine).
pub trait TransferChannel: Send + Sync {
    /// Opens a GET-style transfer and streams progress for it.
    fn open_download(&self, url: &str, timeout: Duration) -> TransferHandle;

    /// Opens a POST-style transfer carrying `payload_bytes` of synthetic
    /// data. Reports only success or failure; no `Progress` events.
    fn open_upload(&self, url: &str, payload_bytes: u64) -> TransferHandle;
}

/// Engine-side handle to one in-flight transfer.
pub struct TransferHandle {
    events: mpsc::UnboundedReceiver<TransferEvent>,
    cancel: CancellationToken,
}

impl TransferHandle {
    /// Creates a handle plus the implementation-side sender and
    /// cancellation token feeding it.
    pub fn new() -> (
        Self,
        mpsc::UnboundedSender<TransferEvent>,
        CancellationToken,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        (
            Self {
                events: rx,
                cancel: cancel.clone(),
            },
            tx,
            cancel,
        )
    }

    /// Waits for the next transfer event. `None` means the implementation
    /// dropped its sender without delivering a terminal event.
    pub async fn recv(&mut self) -> Option<TransferEvent> {
        self.events.recv().await
    }

    /// Requests cancellation of the underlying transfer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
