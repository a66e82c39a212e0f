//! Lifecycle signals emitted by a transfer client for one session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one transfer session: the item index and the attempt number.
///
/// The attempt number grows every time a session is begun, so signals from a
/// session that was abandoned by a restart never match the current key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub index: usize,
    pub attempt: u32,
}

impl SessionKey {
    pub fn new(index: usize, attempt: u32) -> Self {
        Self { index, attempt }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item {} attempt {}", self.index, self.attempt)
    }
}

/// What happened in a transfer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalKind {
    /// `bytes` were durably accepted by the remote side.
    #[serde(rename_all = "camelCase")]
    ChunkSent { bytes: u64 },
    /// Local send progress within the chunk starting at `start_byte`.
    #[serde(rename_all = "camelCase")]
    Progress {
        start_byte: u64,
        loaded: u64,
        total: u64,
    },
    /// The item is fully stored remotely.
    #[serde(rename_all = "camelCase")]
    Completed { remote_id: String },
    /// Transient fault after the session was established.
    Error { message: String },
    /// The session could not be established at all.
    ErrorStarting { message: String },
}

impl SignalKind {
    /// Short name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChunkSent { .. } => "chunk_sent",
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
            Self::ErrorStarting { .. } => "error_starting",
        }
    }
}

/// A signal tagged with the session it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSignal {
    pub session: SessionKey,
    #[serde(flatten)]
    pub kind: SignalKind,
}

impl TransferSignal {
    pub fn new(session: SessionKey, kind: SignalKind) -> Self {
        Self { session, kind }
    }
}
