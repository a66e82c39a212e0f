//! Drives one batch through the upload service and applies the recovery
//! policy from [`CliConfig`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use parcel_protocol::{Destination, Item};
use parcel_transfer::{LocalClientConfig, LocalDirClient};
use parcel_upload::{
    BatchParams, OrchestratorConfig, UploadEvent, UploadHandle, UploadOrchestrator, UploadService,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::CliConfig;

/// Where the batch goes.
pub enum Target {
    /// Upload into this container directory.
    Container(PathBuf),
    /// Create the container after the batch starts, then upload into it.
    CreateContainer(PathBuf),
    /// Replace the contents of this file.
    File(PathBuf),
}

/// Uploads `items` and returns them with their remote identifiers.
pub async fn run_batch(
    config: &CliConfig,
    items: Vec<Item>,
    target: Target,
) -> anyhow::Result<Vec<Item>> {
    let client = Arc::new(LocalDirClient::new(LocalClientConfig {
        chunk_size: config.chunk_size,
    }));

    let orch_config = match &target {
        Target::Container(dir) => OrchestratorConfig::new(Destination::container(path_id(dir))),
        Target::CreateContainer(_) => OrchestratorConfig::default().with_defer_start(true),
        Target::File(file) => OrchestratorConfig::new(Destination::single_target(path_id(file))),
    }
    .with_params(BatchParams::Static(config.params.clone()));

    let (handle, mut events) = UploadService::spawn(UploadOrchestrator::new(client, orch_config));

    handle.set_batch(items).await?;
    handle.start().await?;

    let result = drive(config, &handle, &mut events, &target).await;
    if result.is_err() {
        handle.cancel();
    }
    result
}

async fn drive(
    config: &CliConfig,
    handle: &UploadHandle,
    events: &mut mpsc::UnboundedReceiver<UploadEvent>,
    target: &Target,
) -> anyhow::Result<Vec<Item>> {
    let mut resumes = 0;
    let mut restarts = 0;
    let mut last_percent = None;

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, aborting batch");
                handle.abort_batch().await?;
                bail!("upload interrupted");
            }
        };
        let Some(event) = event else {
            bail!("upload service stopped unexpectedly");
        };

        match event {
            UploadEvent::BatchSelected { items } => {
                let bytes: u64 = items.iter().map(|i| i.size).sum();
                info!(items = items.len(), bytes, "batch selected");
            }
            UploadEvent::SelectionTruncated { kept, dropped } => {
                warn!(kept, dropped, "target accepts a single item, extra items skipped");
            }
            UploadEvent::Started => {
                if let Target::CreateContainer(dir) = target {
                    tokio::fs::create_dir_all(dir)
                        .await
                        .with_context(|| format!("creating {}", dir.display()))?;
                    info!(container = %dir.display(), "container created");
                    handle
                        .set_destination(Destination::container(path_id(dir)))
                        .await?;
                    handle.advance().await?;
                }
            }
            UploadEvent::Progress(p) => {
                if last_percent != Some(p.overall_percent) {
                    last_percent = Some(p.overall_percent);
                    info!(
                        item = %p.item_name,
                        item_percent = p.current_percent,
                        overall_percent = p.overall_percent,
                        "{}/{}",
                        p.index + 1,
                        p.item_count
                    );
                }
            }
            UploadEvent::ItemCompleted { index, remote_id } => {
                info!(index, remote_id = %remote_id, "item uploaded");
                resumes = 0;
                restarts = 0;
            }
            UploadEvent::ItemError { index, message } => {
                if resumes >= config.max_resumes {
                    handle.abort_batch().await?;
                    bail!("item {index} failed after {resumes} resumes: {message}");
                }
                resumes += 1;
                warn!(index, attempt = resumes, error = %message, "resuming item");
                handle.resume_current().await?;
            }
            UploadEvent::ItemErrorStarting { index, message } => {
                if restarts >= config.max_restarts {
                    handle.abort_batch().await?;
                    bail!("item {index} could not start: {message}");
                }
                restarts += 1;
                warn!(index, attempt = restarts, error = %message, "restarting item");
                handle.restart_current().await?;
            }
            UploadEvent::Finished { items, total_bytes } => {
                info!(items = items.len(), total_bytes, "upload finished");
                return Ok(items);
            }
            UploadEvent::Aborted { index } => {
                bail!("batch aborted at item {index}");
            }
        }
    }
}

fn path_id(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}
