//! Upload error types.

use crate::types::UploadState;

/// Errors returned by orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("cannot {op} while {state}")]
    InvalidState {
        op: &'static str,
        state: UploadState,
    },

    #[error("no destination set")]
    NoDestination,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload service stopped")]
    ServiceStopped,
}
