//! Transfer client trait and the per-session signal sender.
//!
//! The orchestrator implements no transport of its own. A client receives a
//! [`TransferRequest`] per session and reports lifecycle signals through the
//! [`SignalSender`] handed to it alongside the request.

use std::sync::Arc;

use parcel_protocol::{Destination, Item, SessionKey, SignalKind, TransferSignal, UploadParams};
use tokio::sync::mpsc;
use tracing::trace;

/// Where a session's bytes go.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadTarget {
    /// Create a new object for the item inside `container`.
    NewObject {
        container: Destination,
        params: UploadParams,
    },
    /// Replace the content of an existing object.
    ReplaceContents { target: Destination },
}

impl UploadTarget {
    /// The destination this target points into.
    pub fn destination(&self) -> &Destination {
        match self {
            Self::NewObject { container, .. } => container,
            Self::ReplaceContents { target } => target,
        }
    }
}

/// Everything a client needs to upload one item.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub session: SessionKey,
    pub item: Item,
    pub target: UploadTarget,
}

/// A remote transfer client.
///
/// Implementations must not block: `begin` starts the work and returns, and
/// every outcome is reported through the [`SignalSender`]. `resume` continues
/// a session that reported [`SignalKind::Error`]; `abort` discards a session
/// together with any partial remote state.
pub trait TransferClient: Send + Sync {
    /// Starts uploading `request.item`.
    fn begin(&self, request: TransferRequest, signals: SignalSender);

    /// Continues an interrupted session from its last confirmed byte.
    fn resume(&self, session: SessionKey);

    /// Abandons a session.
    fn abort(&self, session: SessionKey);
}

impl<T: TransferClient + ?Sized> TransferClient for Arc<T> {
    fn begin(&self, request: TransferRequest, signals: SignalSender) {
        (**self).begin(request, signals)
    }

    fn resume(&self, session: SessionKey) {
        (**self).resume(session)
    }

    fn abort(&self, session: SessionKey) {
        (**self).abort(session)
    }
}

/// Sends signals for one session back to the orchestrator.
#[derive(Debug, Clone)]
pub struct SignalSender {
    session: SessionKey,
    tx: mpsc::UnboundedSender<TransferSignal>,
}

impl SignalSender {
    pub fn new(session: SessionKey, tx: mpsc::UnboundedSender<TransferSignal>) -> Self {
        Self { session, tx }
    }

    /// The session these signals belong to.
    pub fn session(&self) -> SessionKey {
        self.session
    }

    /// Sends a raw signal. Returns `false` once the orchestrator is gone.
    pub fn send(&self, kind: SignalKind) -> bool {
        trace!(session = %self.session, signal = kind.name(), "transfer signal");
        self.tx.send(TransferSignal::new(self.session, kind)).is_ok()
    }

    pub fn chunk_sent(&self, bytes: u64) -> bool {
        self.send(SignalKind::ChunkSent { bytes })
    }

    pub fn progress(&self, start_byte: u64, loaded: u64, total: u64) -> bool {
        self.send(SignalKind::Progress {
            start_byte,
            loaded,
            total,
        })
    }

    pub fn completed(&self, remote_id: impl Into<String>) -> bool {
        self.send(SignalKind::Completed {
            remote_id: remote_id.into(),
        })
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.send(SignalKind::Error {
            message: message.into(),
        })
    }

    pub fn error_starting(&self, message: impl Into<String>) -> bool {
        self.send(SignalKind::ErrorStarting {
            message: message.into(),
        })
    }

    /// Returns `true` if the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
