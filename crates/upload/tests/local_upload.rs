//! End-to-end uploads into local directories through the upload service.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parcel_protocol::{Destination, Item};
use parcel_transfer::{LocalClientConfig, LocalDirClient};
use parcel_upload::{
    OrchestratorConfig, UploadEvent, UploadHandle, UploadOrchestrator, UploadService, UploadState,
    scan_items,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

fn local_client() -> Arc<LocalDirClient> {
    Arc::new(LocalDirClient::new(LocalClientConfig { chunk_size: 4 }))
}

fn spawn(
    client: &Arc<LocalDirClient>,
    config: OrchestratorConfig,
) -> (UploadHandle, mpsc::UnboundedReceiver<UploadEvent>) {
    UploadService::spawn(UploadOrchestrator::new(Arc::clone(client), config))
}

fn container(dir: &Path) -> Destination {
    Destination::container(dir.to_string_lossy())
}

/// Receives events until `stop` matches, returning everything seen.
async fn events_until(
    events: &mut mpsc::UnboundedReceiver<UploadEvent>,
    stop: impl Fn(&UploadEvent) -> bool,
) -> Vec<UploadEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            let done = stop(&event);
            seen.push(event);
            if done {
                return;
            }
        }
    })
    .await
    .expect("timed out waiting for upload events");
    seen
}

fn is_finished(event: &UploadEvent) -> bool {
    matches!(event, UploadEvent::Finished { .. })
}

#[tokio::test]
async fn uploads_scanned_directory_into_container() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    let root = src.path().join("album");
    fs::create_dir_all(root.join("raw")).unwrap();
    fs::write(root.join("a.txt"), b"alpha").unwrap();
    fs::write(root.join("raw").join("b.bin"), b"bravo-bravo").unwrap();

    let items = scan_items(&[root]).unwrap();
    let client = local_client();
    let (handle, mut events) = spawn(&client, OrchestratorConfig::new(container(dst.path())));

    handle.set_batch(items).await.unwrap();
    handle.start().await.unwrap();
    let seen = events_until(&mut events, is_finished).await;

    assert_eq!(
        fs::read(dst.path().join("album").join("a.txt")).unwrap(),
        b"alpha"
    );
    assert_eq!(
        fs::read(dst.path().join("album").join("raw").join("b.bin")).unwrap(),
        b"bravo-bravo"
    );

    let Some(UploadEvent::Finished { items, total_bytes }) = seen.last() else {
        panic!("expected finished, got {seen:?}");
    };
    assert_eq!(*total_bytes, 16);
    assert!(items.iter().all(Item::is_uploaded));

    let overall: Vec<u8> = seen
        .iter()
        .filter_map(|e| match e {
            UploadEvent::Progress(p) => Some(p.overall_percent),
            _ => None,
        })
        .collect();
    assert!(overall.windows(2).all(|w| w[0] <= w[1]), "{overall:?}");
    assert_eq!(overall.last(), Some(&100));

    assert_eq!(
        handle.snapshot().await.unwrap().state,
        UploadState::Finished
    );
    assert_eq!(client.active_sessions(), 0);
}

#[tokio::test]
async fn replaces_single_target_contents() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("notes.md");
    fs::write(&target, b"old notes that are longer").unwrap();

    let client = local_client();
    let config = OrchestratorConfig::new(Destination::single_target(target.to_string_lossy()));
    let (handle, mut events) = spawn(&client, config);

    handle
        .set_batch(vec![
            Item::inline("notes.md", b"new notes".to_vec()),
            Item::inline("ignored.md", b"dropped".to_vec()),
        ])
        .await
        .unwrap();
    handle.start().await.unwrap();
    let seen = events_until(&mut events, is_finished).await;

    assert!(seen.contains(&UploadEvent::SelectionTruncated {
        kept: 1,
        dropped: 1
    }));
    assert_eq!(fs::read(&target).unwrap(), b"new notes");
    assert!(seen.contains(&UploadEvent::ItemCompleted {
        index: 0,
        remote_id: target.to_string_lossy().into_owned()
    }));
}

#[tokio::test]
async fn restarts_after_missing_container_is_created() {
    let dir = TempDir::new().unwrap();
    let dst = dir.path().join("later");

    let client = local_client();
    let (handle, mut events) = spawn(&client, OrchestratorConfig::new(container(&dst)));
    handle
        .set_batch(vec![
            Item::inline("one.txt", b"1111".to_vec()),
            Item::inline("two.txt", b"22".to_vec()),
        ])
        .await
        .unwrap();
    handle.start().await.unwrap();

    let seen = events_until(&mut events, |e| {
        matches!(e, UploadEvent::ItemErrorStarting { .. })
    })
    .await;
    assert!(matches!(
        seen.last(),
        Some(UploadEvent::ItemErrorStarting { index: 0, .. })
    ));
    assert!(handle.resume_current().await.is_err());

    fs::create_dir_all(&dst).unwrap();
    handle.restart_current().await.unwrap();
    events_until(&mut events, is_finished).await;

    assert_eq!(fs::read(dst.join("one.txt")).unwrap(), b"1111");
    assert_eq!(fs::read(dst.join("two.txt")).unwrap(), b"22");
}

#[tokio::test]
async fn deferred_start_with_late_destination() {
    let dst = TempDir::new().unwrap();
    let client = local_client();
    let (handle, mut events) = spawn(
        &client,
        OrchestratorConfig::default().with_defer_start(true),
    );

    handle
        .set_batch(vec![Item::inline("late.txt", b"hello".to_vec())])
        .await
        .unwrap();
    handle.start().await.unwrap();
    assert_eq!(
        handle.snapshot().await.unwrap().state,
        UploadState::AwaitingAdvance
    );

    handle.set_destination(container(dst.path())).await.unwrap();
    handle.advance().await.unwrap();
    events_until(&mut events, is_finished).await;

    assert_eq!(fs::read(dst.path().join("late.txt")).unwrap(), b"hello");
}

#[tokio::test]
async fn abort_leaves_no_partial_files() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    let big = src.path().join("big.bin");
    fs::write(&big, vec![7u8; 64 * 1024]).unwrap();

    let client = local_client();
    let (handle, mut events) = spawn(&client, OrchestratorConfig::new(container(dst.path())));
    handle.set_batch(scan_items(&[big]).unwrap()).await.unwrap();
    handle.start().await.unwrap();
    handle.abort_batch().await.unwrap();

    let seen = events_until(&mut events, |e| matches!(e, UploadEvent::Aborted { .. })).await;
    assert!(!seen.iter().any(is_finished));
    assert_eq!(
        handle.snapshot().await.unwrap().state,
        UploadState::Aborted
    );

    // The session task notices cancellation between chunks.
    tokio::time::timeout(Duration::from_secs(10), async {
        while dst.path().join("big.bin.part").exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("partial file was not removed");
    assert!(!dst.path().join("big.bin").exists());
    assert_eq!(client.active_sessions(), 0);
}
