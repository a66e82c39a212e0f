//! Data types for the upload flow.

use std::fmt;
use std::sync::Arc;

use parcel_protocol::{Destination, Item, UploadParams};
use serde::Serialize;

/// Callback producing per-batch upload parameters from the batch items.
pub type ParamsCallback = Arc<dyn Fn(&[Item]) -> UploadParams + Send + Sync>;

/// Auxiliary parameters passed along when objects are created in a
/// container. Resolved once per batch start.
#[derive(Clone)]
pub enum BatchParams {
    Static(UploadParams),
    Dynamic(ParamsCallback),
}

impl Default for BatchParams {
    fn default() -> Self {
        Self::Static(UploadParams::new())
    }
}

impl fmt::Debug for BatchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(params) => f.debug_tuple("Static").field(params).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl BatchParams {
    /// Wraps a closure invoked at each batch start.
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&[Item]) -> UploadParams + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(f))
    }

    /// Produces the parameters for a batch.
    pub fn resolve(&self, items: &[Item]) -> UploadParams {
        match self {
            Self::Static(params) => params.clone(),
            Self::Dynamic(callback) => callback(items),
        }
    }
}

/// Config passed to the upload orchestrator.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Upload destination; may be supplied later via `set_destination`.
    pub destination: Option<Destination>,
    /// Whether a batch may hold more than one item. `None` allows multiple
    /// items for containers and a single item for single targets.
    pub allow_multiple_items: Option<bool>,
    /// When set, `start` only emits `Started` and the caller must call
    /// `advance` to begin the first transfer.
    pub defer_start: bool,
    pub params: BatchParams,
}

impl OrchestratorConfig {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination: Some(destination),
            ..Self::default()
        }
    }

    pub fn with_defer_start(mut self, defer_start: bool) -> Self {
        self.defer_start = defer_start;
        self
    }

    pub fn with_allow_multiple_items(mut self, allow: bool) -> Self {
        self.allow_multiple_items = Some(allow);
        self
    }

    pub fn with_params(mut self, params: BatchParams) -> Self {
        self.params = params;
        self
    }
}

/// Which recovery a halted session needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// The session exists; `resume_current` continues it.
    Resumable,
    /// The session was never established; `restart_current` begins anew.
    Fatal,
}

/// Orchestrator state for one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum UploadState {
    /// No batch started yet.
    Idle,
    /// Started with deferred start; waiting for `advance`.
    AwaitingAdvance,
    /// A transfer session for `index` is active.
    Uploading { index: usize },
    /// The session for `index` halted and awaits a caller decision.
    Errored { index: usize, kind: ErrorKind },
    /// Every item completed.
    Finished,
    /// The caller abandoned the batch.
    Aborted,
}

impl UploadState {
    /// `Finished` and `Aborted` accept no further transfers.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Aborted)
    }

    /// Returns `true` while a batch has started and not reached a terminal state.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::AwaitingAdvance | Self::Uploading { .. } | Self::Errored { .. }
        )
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::AwaitingAdvance => f.write_str("awaiting advance"),
            Self::Uploading { index } => write!(f, "uploading item {index}"),
            Self::Errored {
                index,
                kind: ErrorKind::Resumable,
            } => write!(f, "errored on item {index} (resumable)"),
            Self::Errored {
                index,
                kind: ErrorKind::Fatal,
            } => write!(f, "errored on item {index} (restart required)"),
            Self::Finished => f.write_str("finished"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Progress of the current item and of the whole batch.
///
/// Percentages are rounded up so any non-zero transfer shows at least 1%.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub current_percent: u8,
    pub overall_percent: u8,
    pub item_name: String,
    pub index: usize,
    pub item_count: usize,
    pub item_bytes: u64,
    pub item_total: u64,
    pub overall_bytes: u64,
    pub total_bytes: u64,
}

/// Event emitted to the orchestrator's caller.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// The selected items changed.
    BatchSelected { items: Vec<Item> },
    /// Items were dropped because the batch accepts a single item.
    SelectionTruncated { kept: usize, dropped: usize },
    /// `start` was called.
    Started,
    /// Progress update.
    Progress(UploadProgress),
    /// One item is stored remotely.
    ItemCompleted { index: usize, remote_id: String },
    /// Resumable transfer fault; the caller may `resume_current`.
    ItemError { index: usize, message: String },
    /// The session could not be established; the caller may `restart_current`.
    ItemErrorStarting { index: usize, message: String },
    /// Every item completed.
    Finished { items: Vec<Item>, total_bytes: u64 },
    /// The batch was abandoned while `index` was current.
    Aborted { index: usize },
}

/// Point-in-time view of an orchestrator, for callers that poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSnapshot {
    pub state: UploadState,
    pub index: usize,
    pub item_count: usize,
    pub overall_bytes: u64,
    pub total_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_params_see_items() {
        let params = BatchParams::dynamic(|items| {
            let mut map = UploadParams::new();
            map.insert("count".into(), items.len().into());
            map
        });
        let items = vec![Item::inline("a", vec![1]), Item::inline("b", vec![2])];
        let resolved = params.resolve(&items);
        assert_eq!(resolved["count"], 2);
        assert_eq!(format!("{params:?}"), "Dynamic(..)");
    }

    #[test]
    fn state_display_and_flags() {
        let state = UploadState::Errored {
            index: 1,
            kind: ErrorKind::Fatal,
        };
        assert_eq!(state.to_string(), "errored on item 1 (restart required)");
        assert!(state.is_running());
        assert!(!state.is_terminal());
        assert!(UploadState::Aborted.is_terminal());
        assert!(!UploadState::Idle.is_running());
    }

    #[test]
    fn progress_field_names() {
        let progress = UploadProgress {
            current_percent: 50,
            overall_percent: 10,
            item_name: "a.txt".into(),
            index: 0,
            item_count: 3,
            item_bytes: 5,
            item_total: 10,
            overall_bytes: 5,
            total_bytes: 60,
        };
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["currentPercent"], 50);
        assert_eq!(json["itemCount"], 3);
        assert_eq!(json["totalBytes"], 60);
    }
}
