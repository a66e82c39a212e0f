//! Upload orchestrator for sequential batch transfers.
//!
//! Owns the batch, the cursor and the single transfer session, and turns
//! transfer-client signals into caller events. Every transition happens
//! synchronously inside a method call; nothing here blocks or spawns.

use parcel_protocol::{Destination, DestinationKind, Item, SessionKey, SignalKind, TransferSignal, UploadParams};
use parcel_transfer::{SignalSender, TransferClient, TransferRequest, UploadTarget};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::batch::Batch;
use crate::error::UploadError;
use crate::progress::percent_ceil;
use crate::session::TransferSession;
use crate::types::{
    BatchParams, ErrorKind, OrchestratorConfig, UploadEvent, UploadProgress, UploadSnapshot,
    UploadState,
};

/// Drives a batch of items through a [`TransferClient`], one at a time.
pub struct UploadOrchestrator<C: TransferClient> {
    client: C,
    destination: Option<Destination>,
    allow_multiple_items: Option<bool>,
    defer_start: bool,
    params: BatchParams,
    resolved_params: UploadParams,
    batch: Batch,
    state: UploadState,
    index: usize,
    session: Option<TransferSession>,
    attempts: u32,
    signals_tx: mpsc::UnboundedSender<TransferSignal>,
    signals_rx: Option<mpsc::UnboundedReceiver<TransferSignal>>,
    events_tx: mpsc::UnboundedSender<UploadEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<UploadEvent>>,
}

impl<C: TransferClient> UploadOrchestrator<C> {
    /// Creates an idle orchestrator.
    pub fn new(client: C, config: OrchestratorConfig) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            client,
            destination: config.destination,
            allow_multiple_items: config.allow_multiple_items,
            defer_start: config.defer_start,
            params: config.params,
            resolved_params: UploadParams::new(),
            batch: Batch::default(),
            state: UploadState::Idle,
            index: 0,
            session: None,
            attempts: 0,
            signals_tx,
            signals_rx: Some(signals_rx),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Takes the receiver of transfer-client signals so an async driver can
    /// await them. Can only be called once; afterwards
    /// [`process_pending_signals`](Self::process_pending_signals) is a no-op.
    pub fn take_signals(&mut self) -> Option<mpsc::UnboundedReceiver<TransferSignal>> {
        self.signals_rx.take()
    }

    /// Applies every signal the transfer client has queued so far.
    ///
    /// Returns the number of signals processed.
    pub fn process_pending_signals(&mut self) -> usize {
        let Some(mut rx) = self.signals_rx.take() else {
            return 0;
        };
        let mut processed = 0;
        while let Ok(signal) = rx.try_recv() {
            self.handle_signal(signal);
            processed += 1;
        }
        self.signals_rx = Some(rx);
        processed
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn items(&self) -> &[Item] {
        self.batch.items()
    }

    pub fn total_size(&self) -> u64 {
        self.batch.total_size()
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn session(&self) -> Option<&TransferSession> {
        self.session.as_ref()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Bytes counted as sent: completed items plus the active session.
    pub fn overall_bytes(&self) -> u64 {
        let in_flight = self.session.as_ref().map_or(0, TransferSession::counted);
        self.batch
            .bytes_before(self.index)
            .saturating_add(in_flight)
            .min(self.batch.total_size())
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        UploadSnapshot {
            state: self.state,
            index: self.index,
            item_count: self.batch.len(),
            overall_bytes: self.overall_bytes(),
            total_bytes: self.batch.total_size(),
        }
    }

    fn allows_multiple_items(&self) -> bool {
        self.allow_multiple_items.unwrap_or_else(|| {
            self.destination
                .as_ref()
                .is_none_or(|d| d.kind == DestinationKind::Container)
        })
    }

    // -----------------------------------------------------------------------
    // Caller operations
    // -----------------------------------------------------------------------

    /// Supplies the destination once it is resolved.
    ///
    /// Allowed before any transfer has begun: while idle, or while a
    /// deferred start waits for [`advance`](Self::advance).
    pub fn set_destination(&mut self, destination: Destination) -> Result<(), UploadError> {
        if !matches!(self.state, UploadState::Idle | UploadState::AwaitingAdvance) {
            return Err(self.invalid("set destination"));
        }
        info!(destination = %destination.id, kind = %destination.kind, "destination resolved");
        self.destination = Some(destination);
        Ok(())
    }

    /// Replaces the selected items and freezes their total size.
    ///
    /// When the batch accepts a single item, extra items are dropped and
    /// [`UploadEvent::SelectionTruncated`] is emitted.
    pub fn set_batch(&mut self, mut items: Vec<Item>) -> Result<(), UploadError> {
        if self.state != UploadState::Idle {
            return Err(self.invalid("set batch"));
        }

        if !self.allows_multiple_items() && items.len() > 1 {
            let dropped = items.len() - 1;
            items.truncate(1);
            warn!(dropped, "batch accepts a single item, extra items dropped");
            self.emit(UploadEvent::SelectionTruncated { kept: 1, dropped });
        }

        self.batch = Batch::new(items);
        self.index = 0;
        info!(
            items = self.batch.len(),
            total_bytes = self.batch.total_size(),
            "batch selected"
        );
        self.emit(UploadEvent::BatchSelected {
            items: self.batch.items().to_vec(),
        });
        Ok(())
    }

    /// Starts the batch.
    ///
    /// An empty batch finishes immediately. Otherwise per-batch parameters
    /// are resolved and the first transfer begins, unless start is deferred,
    /// in which case the orchestrator waits for [`advance`](Self::advance).
    pub fn start(&mut self) -> Result<(), UploadError> {
        if self.state != UploadState::Idle {
            return Err(self.invalid("start"));
        }

        if self.batch.is_empty() {
            self.emit(UploadEvent::Started);
            self.finish();
            return Ok(());
        }

        if !self.defer_start && self.destination.is_none() {
            return Err(UploadError::NoDestination);
        }

        self.index = 0;
        self.resolved_params = self.params.resolve(self.batch.items());
        info!(
            items = self.batch.len(),
            total_bytes = self.batch.total_size(),
            deferred = self.defer_start,
            "batch started"
        );
        self.emit(UploadEvent::Started);

        if self.defer_start {
            self.state = UploadState::AwaitingAdvance;
            Ok(())
        } else {
            self.begin_current()
        }
    }

    /// Begins the first transfer after a deferred start.
    pub fn advance(&mut self) -> Result<(), UploadError> {
        if self.state != UploadState::AwaitingAdvance {
            return Err(self.invalid("advance"));
        }
        self.begin_current()
    }

    /// Continues the current session after a resumable error.
    ///
    /// The transfer client resumes the same session, so bytes already
    /// confirmed are kept.
    pub fn resume_current(&mut self) -> Result<(), UploadError> {
        let UploadState::Errored {
            index,
            kind: ErrorKind::Resumable,
        } = self.state
        else {
            return Err(self.invalid("resume"));
        };
        let Some(session) = self.session.as_mut() else {
            return Err(self.invalid("resume"));
        };

        session.resume();
        let key = session.key();
        let confirmed = session.confirmed();
        self.state = UploadState::Uploading { index };
        info!(session = %key, confirmed, "resuming transfer");
        self.client.resume(key);
        Ok(())
    }

    /// Discards the current session after a start error and begins a new
    /// one for the same item. Bytes sent for this item start from zero.
    pub fn restart_current(&mut self) -> Result<(), UploadError> {
        if !matches!(
            self.state,
            UploadState::Errored {
                kind: ErrorKind::Fatal,
                ..
            }
        ) {
            return Err(self.invalid("restart"));
        }

        if let Some(session) = self.session.take() {
            info!(
                session = %session.key(),
                discarded = session.confirmed(),
                "restarting transfer"
            );
        }
        self.begin_current()
    }

    /// Abandons the batch.
    ///
    /// A session that is active or paused on a resumable error is aborted at
    /// the transfer client. Completed items are left as they are and
    /// `Finished` is never emitted for this run. No-op when idle or already
    /// terminal.
    pub fn abort_batch(&mut self) {
        if !self.state.is_running() {
            return;
        }

        if let Some(session) = self.session.take()
            && session.needs_abort()
        {
            info!(session = %session.key(), "aborting transfer");
            self.client.abort(session.key());
        }

        warn!(index = self.index, state = %self.state, "batch aborted");
        self.state = UploadState::Aborted;
        self.emit(UploadEvent::Aborted { index: self.index });
    }

    /// Returns a finished or aborted orchestrator to idle with no batch.
    pub fn reset(&mut self) -> Result<(), UploadError> {
        if !self.state.is_terminal() {
            return Err(self.invalid("reset"));
        }
        self.batch = Batch::default();
        self.index = 0;
        self.session = None;
        self.resolved_params = UploadParams::new();
        self.state = UploadState::Idle;
        debug!("orchestrator reset");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transfer signals
    // -----------------------------------------------------------------------

    /// Applies one signal from the transfer client.
    ///
    /// Signals for any session other than the current one are ignored, as
    /// are signals the current state cannot accept.
    pub fn handle_signal(&mut self, signal: TransferSignal) {
        let current = self.session.as_ref().map(TransferSession::key);
        if current != Some(signal.session) {
            debug!(
                session = %signal.session,
                signal = signal.kind.name(),
                "ignoring signal for inactive session"
            );
            return;
        }

        let UploadState::Uploading { index } = self.state else {
            warn!(
                session = %signal.session,
                signal = signal.kind.name(),
                state = %self.state,
                "ignoring signal while not uploading"
            );
            return;
        };

        match signal.kind {
            SignalKind::ChunkSent { bytes } => {
                if let Some(session) = self.session.as_mut() {
                    session.add_confirmed(bytes);
                }
            }
            SignalKind::Progress {
                start_byte,
                loaded,
                total,
            } => self.report_progress(start_byte, loaded, total),
            SignalKind::Completed { remote_id } => self.complete_current(remote_id),
            SignalKind::Error { message } => self.halt(index, ErrorKind::Resumable, message),
            SignalKind::ErrorStarting { message } => self.halt(index, ErrorKind::Fatal, message),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn begin_current(&mut self) -> Result<(), UploadError> {
        let Some(destination) = self.destination.clone() else {
            return Err(UploadError::NoDestination);
        };
        let Some(item) = self.batch.get(self.index).cloned() else {
            return Err(self.invalid("begin transfer"));
        };

        self.attempts += 1;
        let key = SessionKey::new(self.index, self.attempts);
        let target = match destination.kind {
            DestinationKind::SingleTarget => UploadTarget::ReplaceContents {
                target: destination,
            },
            DestinationKind::Container => UploadTarget::NewObject {
                container: destination,
                params: self.resolved_params.clone(),
            },
        };

        info!(
            session = %key,
            item = %item.name,
            size = item.size,
            "starting transfer"
        );
        self.session = Some(TransferSession::new(key, item.size));
        self.state = UploadState::Uploading { index: self.index };

        let signals = SignalSender::new(key, self.signals_tx.clone());
        self.client.begin(
            TransferRequest {
                session: key,
                item,
                target,
            },
            signals,
        );
        Ok(())
    }

    fn report_progress(&mut self, start_byte: u64, loaded: u64, total: u64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let counted = session.record_progress(loaded);
        let item_bytes = start_byte.saturating_add(loaded).min(total);

        let total_bytes = self.batch.total_size();
        let overall_bytes = self
            .batch
            .bytes_before(self.index)
            .saturating_add(counted)
            .min(total_bytes);

        let item_name = self
            .batch
            .get(self.index)
            .map(|item| item.name.clone())
            .unwrap_or_default();

        self.emit(UploadEvent::Progress(UploadProgress {
            current_percent: percent_ceil(item_bytes, total),
            overall_percent: percent_ceil(overall_bytes, total_bytes),
            item_name,
            index: self.index,
            item_count: self.batch.len(),
            item_bytes,
            item_total: total,
            overall_bytes,
            total_bytes,
        }));
    }

    fn complete_current(&mut self, remote_id: String) {
        let index = self.index;
        if let Some(mut session) = self.session.take() {
            session.complete();
            info!(session = %session.key(), remote_id = %remote_id, "transfer complete");
        }
        self.batch.assign_remote_id(index, remote_id.clone());
        self.emit(UploadEvent::ItemCompleted { index, remote_id });

        self.index += 1;
        if self.index < self.batch.len() {
            if let Err(e) = self.begin_current() {
                error!(index = self.index, error = %e, "could not begin next transfer");
            }
        } else {
            self.finish();
        }
    }

    fn halt(&mut self, index: usize, kind: ErrorKind, message: String) {
        if let Some(session) = self.session.as_mut() {
            session.fail(kind, &message);
            warn!(
                session = %session.key(),
                confirmed = session.confirmed(),
                kind = ?kind,
                error = %message,
                "transfer halted"
            );
        }
        self.state = UploadState::Errored { index, kind };
        self.emit(match kind {
            ErrorKind::Resumable => UploadEvent::ItemError { index, message },
            ErrorKind::Fatal => UploadEvent::ItemErrorStarting { index, message },
        });
    }

    fn finish(&mut self) {
        self.state = UploadState::Finished;
        info!(
            items = self.batch.len(),
            total_bytes = self.batch.total_size(),
            "batch finished"
        );
        self.emit(UploadEvent::Finished {
            items: self.batch.items().to_vec(),
            total_bytes: self.batch.total_size(),
        });
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events_tx.send(event);
    }

    fn invalid(&self, op: &'static str) -> UploadError {
        UploadError::InvalidState {
            op,
            state: self.state,
        }
    }
}

impl<C: TransferClient> Drop for UploadOrchestrator<C> {
    fn drop(&mut self) {
        // Partial remote state for the current item is released on teardown.
        self.abort_batch();
    }
}
