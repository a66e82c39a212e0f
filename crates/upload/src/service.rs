//! Async driver for an [`UploadOrchestrator`].
//!
//! The orchestrator is a plain state machine. [`UploadService`] owns it on a
//! tokio task, feeds it transfer signals as they arrive and serializes caller
//! operations arriving through an [`UploadHandle`].

use parcel_protocol::{Destination, Item, TransferSignal};
use parcel_transfer::TransferClient;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::UploadError;
use crate::orchestrator::UploadOrchestrator;
use crate::types::{UploadEvent, UploadSnapshot};

enum Op {
    SetBatch(Vec<Item>),
    SetDestination(Destination),
    Start,
    Advance,
    ResumeCurrent,
    RestartCurrent,
    AbortBatch,
    Reset,
}

impl Op {
    fn name(&self) -> &'static str {
        match self {
            Self::SetBatch(_) => "set_batch",
            Self::SetDestination(_) => "set_destination",
            Self::Start => "start",
            Self::Advance => "advance",
            Self::ResumeCurrent => "resume_current",
            Self::RestartCurrent => "restart_current",
            Self::AbortBatch => "abort_batch",
            Self::Reset => "reset",
        }
    }
}

enum Command {
    Op(Op, oneshot::Sender<Result<(), UploadError>>),
    Snapshot(oneshot::Sender<UploadSnapshot>),
}

/// Runs an orchestrator on a background task.
pub struct UploadService;

impl UploadService {
    /// Spawns the driver task and returns a handle plus the event stream.
    ///
    /// The task stops when every handle is dropped or the handle's cancel
    /// token fires; either way a running batch is aborted first.
    pub fn spawn<C>(
        mut orchestrator: UploadOrchestrator<C>,
    ) -> (UploadHandle, mpsc::UnboundedReceiver<UploadEvent>)
    where
        C: TransferClient + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();

        let (events, signals) = match (orchestrator.take_events(), orchestrator.take_signals()) {
            (Some(events), Some(signals)) => (events, signals),
            _ => {
                // Receivers already taken by the caller: nothing to drive.
                let (_, events) = mpsc::unbounded_channel();
                cancel.cancel();
                return (
                    UploadHandle {
                        tx: cmd_tx,
                        cancel,
                    },
                    events,
                );
            }
        };

        tokio::spawn(run(orchestrator, signals, cmd_rx, cancel.clone()));

        (UploadHandle { tx: cmd_tx, cancel }, events)
    }
}

async fn run<C: TransferClient>(
    mut orchestrator: UploadOrchestrator<C>,
    mut signals: mpsc::UnboundedReceiver<TransferSignal>,
    mut commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
) {
    info!("upload service started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                orchestrator.abort_batch();
                break;
            }
            Some(signal) = signals.recv() => {
                orchestrator.handle_signal(signal);
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("all upload handles dropped");
                    break;
                };
                match command {
                    Command::Op(op, reply) => {
                        let name = op.name();
                        let result = apply(&mut orchestrator, op);
                        if let Err(e) = &result {
                            debug!(op = name, error = %e, "operation rejected");
                        }
                        let _ = reply.send(result);
                    }
                    Command::Snapshot(reply) => {
                        let _ = reply.send(orchestrator.snapshot());
                    }
                }
            }
        }
    }
    // Dropping the orchestrator aborts a batch that is still running.
    drop(orchestrator);
    info!("upload service stopped");
}

fn apply<C: TransferClient>(
    orchestrator: &mut UploadOrchestrator<C>,
    op: Op,
) -> Result<(), UploadError> {
    match op {
        Op::SetBatch(items) => orchestrator.set_batch(items),
        Op::SetDestination(destination) => orchestrator.set_destination(destination),
        Op::Start => orchestrator.start(),
        Op::Advance => orchestrator.advance(),
        Op::ResumeCurrent => orchestrator.resume_current(),
        Op::RestartCurrent => orchestrator.restart_current(),
        Op::AbortBatch => {
            orchestrator.abort_batch();
            Ok(())
        }
        Op::Reset => orchestrator.reset(),
    }
}

/// Cloneable handle to a running [`UploadService`].
#[derive(Clone)]
pub struct UploadHandle {
    tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl UploadHandle {
    async fn call(&self, op: Op) -> Result<(), UploadError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Op(op, reply_tx))
            .await
            .map_err(|_| UploadError::ServiceStopped)?;
        reply_rx.await.map_err(|_| UploadError::ServiceStopped)?
    }

    pub async fn set_batch(&self, items: Vec<Item>) -> Result<(), UploadError> {
        self.call(Op::SetBatch(items)).await
    }

    pub async fn set_destination(&self, destination: Destination) -> Result<(), UploadError> {
        self.call(Op::SetDestination(destination)).await
    }

    pub async fn start(&self) -> Result<(), UploadError> {
        self.call(Op::Start).await
    }

    pub async fn advance(&self) -> Result<(), UploadError> {
        self.call(Op::Advance).await
    }

    pub async fn resume_current(&self) -> Result<(), UploadError> {
        self.call(Op::ResumeCurrent).await
    }

    pub async fn restart_current(&self) -> Result<(), UploadError> {
        self.call(Op::RestartCurrent).await
    }

    pub async fn abort_batch(&self) -> Result<(), UploadError> {
        self.call(Op::AbortBatch).await
    }

    pub async fn reset(&self) -> Result<(), UploadError> {
        self.call(Op::Reset).await
    }

    pub async fn snapshot(&self) -> Result<UploadSnapshot, UploadError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot(reply_tx))
            .await
            .map_err(|_| UploadError::ServiceStopped)?;
        reply_rx.await.map_err(|_| UploadError::ServiceStopped)
    }

    /// Token that stops the service when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops the service, aborting a running batch.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once the service task has exited.
    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use parcel_protocol::SessionKey;
    use parcel_transfer::{SignalSender, TransferRequest};

    use super::*;
    use crate::types::{OrchestratorConfig, UploadState};

    /// Client that keeps the signal senders so tests can drive sessions.
    #[derive(Default)]
    struct ScriptedClient {
        senders: Mutex<Vec<SignalSender>>,
        aborted: Mutex<Vec<SessionKey>>,
        resumed: Mutex<Vec<SessionKey>>,
    }

    impl ScriptedClient {
        fn last(&self) -> SignalSender {
            self.senders.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl TransferClient for ScriptedClient {
        fn begin(&self, _request: TransferRequest, signals: SignalSender) {
            self.senders.lock().unwrap().push(signals);
        }

        fn resume(&self, session: SessionKey) {
            self.resumed.lock().unwrap().push(session);
        }

        fn abort(&self, session: SessionKey) {
            self.aborted.lock().unwrap().push(session);
        }
    }

    fn spawn_service() -> (
        UploadHandle,
        mpsc::UnboundedReceiver<UploadEvent>,
        Arc<ScriptedClient>,
    ) {
        let client = Arc::new(ScriptedClient::default());
        let orch = UploadOrchestrator::new(
            Arc::clone(&client),
            OrchestratorConfig::new(Destination::container("dir")),
        );
        let (handle, events) = UploadService::spawn(orch);
        (handle, events, client)
    }

    async fn next_matching(
        events: &mut mpsc::UnboundedReceiver<UploadEvent>,
        pred: impl Fn(&UploadEvent) -> bool,
    ) -> UploadEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.expect("event stream closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn drives_batch_to_finish() {
        let (handle, mut events, client) = spawn_service();
        handle
            .set_batch(vec![Item::inline("a", vec![1; 4]), Item::inline("b", vec![2; 6])])
            .await
            .unwrap();
        handle.start().await.unwrap();

        client.last().chunk_sent(4);
        client.last().completed("id-a");
        next_matching(&mut events, |e| {
            matches!(e, UploadEvent::ItemCompleted { index: 0, .. })
        })
        .await;

        // The next session only exists once the service processed completion.
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, UploadState::Uploading { index: 1 });
        client.last().completed("id-b");

        let finished =
            next_matching(&mut events, |e| matches!(e, UploadEvent::Finished { .. })).await;
        let UploadEvent::Finished { items, total_bytes } = finished else {
            unreachable!();
        };
        assert_eq!(total_bytes, 10);
        assert_eq!(items[1].remote_id.as_deref(), Some("id-b"));
    }

    #[tokio::test]
    async fn resume_through_handle() {
        let (handle, mut events, client) = spawn_service();
        handle
            .set_batch(vec![Item::inline("a", vec![0; 8])])
            .await
            .unwrap();
        handle.start().await.unwrap();

        let sender = client.last();
        sender.chunk_sent(3);
        sender.error("socket closed");
        next_matching(&mut events, |e| matches!(e, UploadEvent::ItemError { .. })).await;

        handle.resume_current().await.unwrap();
        assert_eq!(*client.resumed.lock().unwrap(), [sender.session()]);
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.overall_bytes, 3);
    }

    #[tokio::test]
    async fn rejected_operation_returns_error() {
        let (handle, _events, _client) = spawn_service();
        let err = handle.advance().await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidState { op: "advance", .. }));
    }

    #[tokio::test]
    async fn cancel_aborts_running_batch() {
        let (handle, mut events, client) = spawn_service();
        handle
            .set_batch(vec![Item::inline("a", vec![0; 8])])
            .await
            .unwrap();
        handle.start().await.unwrap();
        let session = client.last().session();

        handle.cancel();
        next_matching(&mut events, |e| matches!(e, UploadEvent::Aborted { index: 0 })).await;
        assert_eq!(*client.aborted.lock().unwrap(), [session]);

        // The task has exited, so operations fail.
        let err = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match handle.snapshot().await {
                    Err(e) => return e,
                    Ok(_) => tokio::task::yield_now().await,
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(err, UploadError::ServiceStopped));
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn dropping_handles_stops_service() {
        let (handle, mut events, client) = spawn_service();
        handle
            .set_batch(vec![Item::inline("a", vec![0; 8])])
            .await
            .unwrap();
        handle.start().await.unwrap();
        drop(handle);

        next_matching(&mut events, |e| matches!(e, UploadEvent::Aborted { .. })).await;
        assert_eq!(client.aborted.lock().unwrap().len(), 1);
    }
}
