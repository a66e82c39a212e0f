//! Transfer client backed by the local filesystem.
//!
//! A container destination is a directory and each item becomes a file
//! inside it; a single-target destination is an existing file whose content
//! is replaced. Bytes are copied chunk by chunk into a `.part` file that is
//! renamed into place once the last chunk is written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use parcel_protocol::SessionKey;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunked::{ChunkReader, ChunkWriter, SourceRead};
use crate::client::{SignalSender, TransferClient, TransferRequest, UploadTarget};
use crate::{DEFAULT_CHUNK_SIZE, TransferError, validate_upload_path};

/// Configuration for [`LocalDirClient`].
#[derive(Debug, Clone)]
pub struct LocalClientConfig {
    /// Bytes per chunk; 0 selects [`DEFAULT_CHUNK_SIZE`].
    pub chunk_size: usize,
}

impl Default for LocalClientConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

struct SessionControl {
    cancel: CancellationToken,
    resume_tx: mpsc::UnboundedSender<()>,
}

type Sessions = Arc<Mutex<HashMap<SessionKey, SessionControl>>>;

/// Copies items into local directories, one tokio task per session.
pub struct LocalDirClient {
    config: LocalClientConfig,
    sessions: Sessions,
}

impl Default for LocalDirClient {
    fn default() -> Self {
        Self::new(LocalClientConfig::default())
    }
}

impl LocalDirClient {
    pub fn new(config: LocalClientConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn register(&self, key: SessionKey) -> (CancellationToken, mpsc::UnboundedReceiver<()>) {
        let cancel = CancellationToken::new();
        let (resume_tx, resume_rx) = mpsc::unbounded_channel();
        self.sessions.lock().unwrap().insert(
            key,
            SessionControl {
                cancel: cancel.clone(),
                resume_tx,
            },
        );
        (cancel, resume_rx)
    }

    /// Number of sessions that have not completed or been aborted.
    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

impl TransferClient for LocalDirClient {
    /// Spawns the session task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    fn begin(&self, request: TransferRequest, signals: SignalSender) {
        let key = request.session;
        let (cancel, resume_rx) = self.register(key);

        info!(
            session = %key,
            item = %request.item.name,
            destination = %request.target.destination().id,
            "local transfer starting"
        );

        let job = SessionJob {
            request,
            signals,
            chunk_size: self.config.chunk_size,
            cancel,
            resume_rx,
            sessions: Arc::clone(&self.sessions),
        };
        tokio::spawn(job.run());
    }

    fn resume(&self, session: SessionKey) {
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(&session) {
            Some(control) => {
                let _ = control.resume_tx.send(());
            }
            None => warn!(session = %session, "resume requested for unknown session"),
        }
    }

    fn abort(&self, session: SessionKey) {
        let control = self.sessions.lock().unwrap().remove(&session);
        match control {
            Some(control) => {
                info!(session = %session, "aborting local transfer");
                control.cancel.cancel();
            }
            None => debug!(session = %session, "abort requested for unknown session"),
        }
    }
}

type SourceReader = ChunkReader<Box<dyn SourceRead>>;

struct Prepared {
    reader: SourceReader,
    writer: ChunkWriter,
    final_path: PathBuf,
    remote_id: String,
}

struct SessionJob {
    request: TransferRequest,
    signals: SignalSender,
    chunk_size: usize,
    cancel: CancellationToken,
    resume_rx: mpsc::UnboundedReceiver<()>,
    sessions: Sessions,
}

impl SessionJob {
    async fn run(self) {
        let key = self.signals.session();
        let request = self.request.clone();
        let chunk_size = self.chunk_size;

        let prepared = match tokio::task::spawn_blocking(move || prepare(&request, chunk_size))
            .await
        {
            Ok(Ok(prepared)) => prepared,
            Ok(Err(e)) => {
                warn!(session = %key, error = %e, "could not start local transfer");
                self.signals.error_starting(e.to_string());
                self.unregister();
                return;
            }
            Err(e) => {
                self.signals
                    .error_starting(format!("task join error: {e}"));
                self.unregister();
                return;
            }
        };

        self.transfer(prepared).await;
    }

    /// Copies chunks until the item is stored, the session is aborted, or
    /// the orchestrator goes away while waiting for a resume.
    async fn transfer(mut self, prepared: Prepared) {
        let key = self.signals.session();
        let Prepared {
            mut reader,
            mut writer,
            final_path,
            remote_id,
        } = prepared;
        let part_path = writer.path().to_path_buf();
        let total = reader.size();
        if total != self.request.item.size {
            warn!(
                session = %key,
                expected = self.request.item.size,
                actual = total,
                "item size differs from source size"
            );
        }

        loop {
            if self.cancel.is_cancelled() {
                remove_file_quietly(&part_path).await;
                return;
            }

            let outcome =
                match copy_next(reader, writer, final_path.clone(), self.cancel.clone()).await {
                    Ok((r, w, outcome)) => {
                        reader = r;
                        writer = w;
                        outcome
                    }
                    Err(e) => {
                        // Reader and writer were lost with the task.
                        self.signals
                            .error_starting(format!("task join error: {e}"));
                        remove_file_quietly(&part_path).await;
                        self.unregister();
                        return;
                    }
                };

            match outcome {
                Ok(Step::Chunk { offset, len }) => {
                    self.signals.progress(offset, len, total);
                    self.signals.chunk_sent(len);
                }
                Ok(Step::Cancelled) => {
                    remove_file_quietly(&part_path).await;
                    return;
                }
                Ok(Step::Stored) => {
                    if !self.claim_completion() {
                        self.discard_stored(&final_path).await;
                        return;
                    }
                    info!(session = %key, path = %final_path.display(), bytes = total, "local transfer complete");
                    self.signals.completed(remote_id);
                    return;
                }
                Err(e) => {
                    warn!(session = %key, error = %e, confirmed = writer.written(), "local transfer interrupted");
                    while self.resume_rx.try_recv().is_ok() {}
                    self.signals.error(e.to_string());

                    if !self.wait_for_resume(&mut reader, writer.written()).await {
                        remove_file_quietly(&part_path).await;
                        return;
                    }
                    debug!(session = %key, offset = writer.written(), "local transfer resumed");
                }
            }
        }
    }

    /// Waits until the session is resumed (true) or aborted (false), then
    /// rewinds the reader to the last confirmed byte.
    async fn wait_for_resume(&mut self, reader: &mut SourceReader, confirmed: u64) -> bool {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                resumed = self.resume_rx.recv() => {
                    if resumed.is_none() {
                        return false;
                    }
                }
            }

            match reader.seek_to(confirmed) {
                Ok(()) => return true,
                Err(e) => {
                    self.signals.error(e.to_string());
                }
            }
        }
    }

    fn unregister(&self) {
        self.sessions
            .lock()
            .unwrap()
            .remove(&self.signals.session());
    }

    /// Takes the session out of the registry. Returns `false` when an abort
    /// got there first.
    fn claim_completion(&self) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .remove(&self.signals.session())
            .is_some()
    }

    /// Undoes a store that raced with an abort.
    async fn discard_stored(&self, final_path: &Path) {
        let key = self.signals.session();
        match &self.request.target {
            UploadTarget::NewObject { .. } => {
                info!(session = %key, path = %final_path.display(), "aborted after store, removing object");
                remove_file_quietly(final_path).await;
            }
            UploadTarget::ReplaceContents { .. } => {
                warn!(session = %key, path = %final_path.display(), "aborted after target contents were replaced");
            }
        }
    }
}

enum Step {
    Chunk { offset: u64, len: u64 },
    Stored,
    Cancelled,
}

/// Copies the next chunk on a blocking thread, or moves the finished file
/// into place when the source is exhausted. The move is skipped once
/// `cancel` has fired.
async fn copy_next(
    mut reader: SourceReader,
    mut writer: ChunkWriter,
    final_path: PathBuf,
    cancel: CancellationToken,
) -> Result<(SourceReader, ChunkWriter, Result<Step, TransferError>), tokio::task::JoinError> {
    tokio::task::spawn_blocking(move || {
        let outcome = match reader.next_chunk() {
            Ok(Some(chunk)) => writer.write_chunk(&chunk).map(|()| Step::Chunk {
                offset: chunk.offset,
                len: chunk.len() as u64,
            }),
            Ok(None) => writer.sync().and_then(|()| {
                if cancel.is_cancelled() {
                    return Ok(Step::Cancelled);
                }
                std::fs::rename(writer.path(), &final_path)?;
                Ok(Step::Stored)
            }),
            Err(e) => Err(e),
        };
        (reader, writer, outcome)
    })
    .await
}

fn prepare(request: &TransferRequest, chunk_size: usize) -> Result<Prepared, TransferError> {
    let (final_path, remote_id) = match &request.target {
        UploadTarget::NewObject { container, params } => {
            let dir = PathBuf::from(&container.id);
            if !dir.is_dir() {
                return Err(TransferError::Destination(format!(
                    "container not found: {}",
                    container.id
                )));
            }
            validate_upload_path(&request.item.name)?;

            let path = dir.join(&request.item.name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            debug!(params = params.len(), path = %path.display(), "creating object in container");
            (path, uuid::Uuid::new_v4().to_string())
        }
        UploadTarget::ReplaceContents { target } => {
            let path = PathBuf::from(&target.id);
            if !path.is_file() {
                return Err(TransferError::Destination(format!(
                    "target not found: {}",
                    target.id
                )));
            }
            (path, target.id.clone())
        }
    };

    let reader = ChunkReader::for_source(&request.item.source, chunk_size)?;
    let writer = ChunkWriter::create(&partial_path(&final_path))?;
    Ok(Prepared {
        reader,
        writer,
        final_path,
        remote_id,
    })
}

fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn remove_file_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed abandoned upload"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove abandoned upload"),
    }
}
