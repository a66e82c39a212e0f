//! Sequential batch upload orchestrator.
//!
//! This crate implements the **state machine** that drives a batch of items
//! through a remote upload protocol one item at a time. It has no transport
//! of its own: a [`TransferClient`](parcel_transfer::TransferClient) moves
//! the bytes and reports lifecycle signals, and the orchestrator turns those
//! into progress, error and completion events for its caller.
//!
//! # Lifecycle
//!
//! 1. **Select**: `set_batch` freezes the ordered items and their total size
//! 2. **Start**: `start` emits `Started` and begins item 0 (or waits for
//!    `advance` when start is deferred)
//! 3. **Transfer**: signals update per-item and overall progress
//! 4. **Recover**: resumable errors wait for `resume_current`, start errors
//!    wait for `restart_current`
//! 5. **Finish**: after the last item completes, `Finished` is emitted once
//!
//! [`UploadService`] runs an orchestrator on a tokio task and exposes the
//! same operations through a cloneable [`UploadHandle`].

pub mod batch;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod scanner;
pub mod service;
pub mod session;
pub mod types;

// Re-export primary types for convenience.
pub use batch::Batch;
pub use error::UploadError;
pub use orchestrator::UploadOrchestrator;
pub use progress::percent_ceil;
pub use scanner::scan_items;
pub use service::{UploadHandle, UploadService};
pub use session::{SessionStatus, TransferSession};
pub use types::{
    BatchParams, ErrorKind, OrchestratorConfig, UploadEvent, UploadProgress, UploadSnapshot,
    UploadState,
};
