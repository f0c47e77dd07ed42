//! End-to-end transfer tests over a scripted relay and an in-memory file
//! channel. No network, no real file server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use charasync_client::transfer::{
    BatchOutcome, DownloadManager, DownloadStatus, FetchResult, FileChannel, TransferConfig,
    TransferError, UploadManager,
};
use charasync_net::{ConnectionCommand, HubClient};
use charasync_shared::protocol::{CallReply, ClientCall, DownloadFileDto, UploadFileDto};
use charasync_shared::types::FileHash;
use charasync_store::ContentStore;

// --- Test doubles -------------------------------------------------------

/// Spawn a relay responder task and hand back a hub wired to it.
fn scripted_relay(
    responder: impl Fn(ClientCall) -> CallReply + Send + 'static,
) -> HubClient {
    let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            if let ConnectionCommand::Call(call) = cmd {
                let _ = call.reply.send(Ok(responder(call.call)));
            }
        }
    });
    HubClient::new(cmd_tx, Duration::from_secs(5))
}

/// A relay that must never be called.
fn silent_relay() -> HubClient {
    scripted_relay(|call| panic!("unexpected relay call: {:?}", call))
}

fn file_url(hash: &FileHash) -> String {
    format!("https://files.test/files/{}", hash)
}

fn download_dto(hash: &FileHash, size: u64) -> DownloadFileDto {
    DownloadFileDto {
        file_exists: true,
        hash: hash.clone(),
        url: file_url(hash),
        size,
        is_forbidden: false,
        forbidden_by: String::new(),
    }
}

/// One scripted response for a URL; past the end of the script, fetches
/// fall back to the last `Payload` step.
#[derive(Clone)]
enum Step {
    Payload(Vec<u8>),
    Queued(Option<Duration>),
    Transient,
    /// Park until `MockChannel::release` is called.
    Gated(Vec<u8>),
}

struct MockChannel {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    gate: Semaphore,
    fetches: AtomicUsize,
    pushes: Mutex<Vec<(String, Vec<u8>)>>,
    push_failures: Mutex<HashMap<String, u32>>,
    push_attempts: AtomicUsize,
}

impl MockChannel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            gate: Semaphore::new(0),
            fetches: AtomicUsize::new(0),
            pushes: Mutex::new(Vec::new()),
            push_failures: Mutex::new(HashMap::new()),
            push_attempts: AtomicUsize::new(0),
        })
    }

    fn script(&self, url: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), steps.into());
    }

    fn serve(&self, hash: &FileHash, payload: Vec<u8>) {
        self.script(&file_url(hash), vec![Step::Payload(payload)]);
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Next `n` pushes to this URL fail transiently.
    fn fail_pushes(&self, url: &str, n: u32) {
        self.push_failures
            .lock()
            .unwrap()
            .insert(url.to_string(), n);
    }

    fn push_attempts(&self) -> usize {
        self.push_attempts.load(Ordering::SeqCst)
    }

    fn next_step(&self, url: &str) -> Step {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts
            .get_mut(url)
            .unwrap_or_else(|| panic!("fetch for unscripted url {url}"));
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().expect("script exhausted")
        }
    }
}

impl FileChannel for MockChannel {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FetchResult, TransferError>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match self.next_step(url) {
                Step::Payload(bytes) => Ok(FetchResult::Payload(bytes)),
                Step::Queued(retry_after) => Ok(FetchResult::Queued { retry_after }),
                Step::Transient => Err(TransferError::Http("connection reset".into())),
                Step::Gated(bytes) => {
                    let permit = self.gate.acquire().await.expect("gate closed");
                    permit.forget();
                    Ok(FetchResult::Payload(bytes))
                }
            }
        })
    }

    fn push<'a>(
        &'a self,
        url: &'a str,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), TransferError>> {
        Box::pin(async move {
            self.push_attempts.fetch_add(1, Ordering::SeqCst);
            {
                let mut failures = self.push_failures.lock().unwrap();
                if let Some(remaining) = failures.get_mut(url) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(TransferError::Http("connection reset".into()));
                    }
                }
            }
            self.pushes.lock().unwrap().push((url.to_string(), payload));
            Ok(())
        })
    }
}

async fn temp_store() -> (tempfile::TempDir, ContentStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path().to_path_buf()).await.unwrap();
    (dir, store)
}

fn small_config() -> TransferConfig {
    TransferConfig {
        download_slots: 2,
        upload_slots: 2,
        retry_limit: 3,
        queue_poll: Duration::from_secs(5),
    }
}

fn assert_completed(outcome: &BatchOutcome, hashes: &[&FileHash]) {
    assert_eq!(outcome.completed.len(), hashes.len());
    for hash in hashes {
        assert!(outcome.completed.contains(hash), "missing {hash}");
    }
}

// --- Downloads ----------------------------------------------------------

#[tokio::test]
async fn test_download_batch_commits_files() {
    let (_dir, store) = temp_store().await;
    let channel = MockChannel::new();

    let a = FileHash::of_bytes(b"body a");
    let b = FileHash::of_bytes(b"body b");
    channel.serve(&a, b"body a".to_vec());
    // Compressed on the wire, stored decompressed.
    channel.serve(&b, zstd::encode_all(&b"body b"[..], 0).unwrap());

    let dtos = vec![download_dto(&a, 6), download_dto(&b, 6)];
    let hub = scripted_relay(move |call| match call {
        ClientCall::RequestDownloadFiles { .. } => CallReply::DownloadFiles(dtos.clone()),
        other => panic!("unexpected call: {:?}", other),
    });

    let manager = DownloadManager::new(hub, store.clone(), channel.clone(), small_config());
    let outcome = manager
        .start_batch(vec![a.clone(), b.clone()])
        .wait()
        .await
        .unwrap();

    assert_completed(&outcome, &[&a, &b]);
    assert!(outcome.is_success());
    assert_eq!(store.get(&a).await.unwrap(), b"body a");
    assert_eq!(store.get(&b).await.unwrap(), b"body b");
}

#[tokio::test]
async fn test_cached_files_skip_the_relay() {
    let (_dir, store) = temp_store().await;
    let channel = MockChannel::new();
    let hash = store.import(b"already here").await.unwrap();

    let manager = DownloadManager::new(silent_relay(), store, channel.clone(), small_config());
    let outcome = manager.start_batch(vec![hash.clone()]).wait().await.unwrap();

    assert_completed(&outcome, &[&hash]);
    assert_eq!(channel.fetch_count(), 0);
}

#[tokio::test]
async fn test_slot_limit_holds_third_file_back() {
    let (_dir, store) = temp_store().await;
    let channel = MockChannel::new();

    let bodies: Vec<&[u8]> = vec![b"one", b"two", b"three"];
    let hashes: Vec<FileHash> = bodies.iter().map(|b| FileHash::of_bytes(b)).collect();
    for (hash, body) in hashes.iter().zip(&bodies) {
        channel.script(&file_url(hash), vec![Step::Gated(body.to_vec())]);
    }

    let dtos: Vec<_> = hashes.iter().map(|h| download_dto(h, 8)).collect();
    let hub = scripted_relay(move |_| CallReply::DownloadFiles(dtos.clone()));

    let manager = DownloadManager::new(hub, store.clone(), channel.clone(), small_config());
    let batch = manager.start_batch(hashes.clone());

    // Two slots fill, the third file queues locally.
    let mut statuses = Vec::new();
    for _ in 0..200 {
        tokio::task::yield_now().await;
        statuses = hashes
            .iter()
            .filter_map(|h| batch.file_status(h))
            .collect();
        if statuses.len() == 3 && channel.fetch_count() == 2 {
            break;
        }
    }
    let downloading = statuses
        .iter()
        .filter(|s| **s == DownloadStatus::Downloading)
        .count();
    let waiting = statuses
        .iter()
        .filter(|s| **s == DownloadStatus::WaitingForSlot)
        .count();
    assert_eq!(downloading, 2);
    assert_eq!(waiting, 1);
    assert_eq!(batch.status().status, DownloadStatus::Downloading);
    assert_eq!(batch.status().total_files, 3);

    channel.release(3);
    let outcome = batch.wait().await.unwrap();
    assert_eq!(outcome.completed.len(), 3);
    for hash in &hashes {
        assert!(store.contains(hash));
    }
}

#[tokio::test]
async fn test_same_hash_fetched_once_across_batches() {
    let (_dir, store) = temp_store().await;
    let channel = MockChannel::new();

    let hash = FileHash::of_bytes(b"shared body");
    channel.script(&file_url(&hash), vec![Step::Gated(b"shared body".to_vec())]);

    let dto = download_dto(&hash, 11);
    let hub = scripted_relay(move |_| CallReply::DownloadFiles(vec![dto.clone()]));

    let manager = DownloadManager::new(hub, store.clone(), channel.clone(), small_config());
    let first = manager.start_batch(vec![hash.clone()]);
    let second = manager.start_batch(vec![hash.clone()]);

    // Let the first batch reach its gated fetch and the second batch
    // park on the in-flight entry.
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    channel.release(1);

    let first = first.wait().await.unwrap();
    let second = second.wait().await.unwrap();
    assert_completed(&first, &[&hash]);
    assert_completed(&second, &[&hash]);
    assert_eq!(channel.fetch_count(), 1);
    assert_eq!(store.get(&hash).await.unwrap(), b"shared body");
}

#[tokio::test]
async fn test_forbidden_file_is_excluded_with_attribution() {
    let (_dir, store) = temp_store().await;
    let channel = MockChannel::new();

    let allowed = FileHash::of_bytes(b"allowed");
    let blocked = FileHash::of_bytes(b"blocked");
    channel.serve(&allowed, b"allowed".to_vec());

    let dtos = vec![
        download_dto(&allowed, 7),
        DownloadFileDto {
            is_forbidden: true,
            forbidden_by: "Mod Author".into(),
            ..download_dto(&blocked, 7)
        },
    ];
    let hub = scripted_relay(move |_| CallReply::DownloadFiles(dtos.clone()));

    let manager = DownloadManager::new(hub, store.clone(), channel.clone(), small_config());
    let outcome = manager
        .start_batch(vec![allowed.clone(), blocked.clone()])
        .wait()
        .await
        .unwrap();

    assert_completed(&outcome, &[&allowed]);
    assert_eq!(outcome.forbidden.len(), 1);
    assert_eq!(outcome.forbidden[0].0, blocked);
    assert_eq!(outcome.forbidden[0].1, "Mod Author");
    // Forbidden is not a failure.
    assert!(outcome.is_success());
    assert!(!store.contains(&blocked));
    assert_eq!(channel.fetch_count(), 1);
}

#[tokio::test]
async fn test_hash_mismatch_fails_only_that_file() {
    let (_dir, store) = temp_store().await;
    let channel = MockChannel::new();

    let good = FileHash::of_bytes(b"good body");
    let bad = FileHash::of_bytes(b"expected body");
    channel.serve(&good, b"good body".to_vec());
    channel.serve(&bad, b"tampered body".to_vec());

    let dtos = vec![download_dto(&good, 9), download_dto(&bad, 13)];
    let hub = scripted_relay(move |_| CallReply::DownloadFiles(dtos.clone()));

    let manager = DownloadManager::new(hub, store.clone(), channel.clone(), small_config());
    let outcome = manager
        .start_batch(vec![good.clone(), bad.clone()])
        .wait()
        .await
        .unwrap();

    assert_completed(&outcome, &[&good]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, bad);
    assert!(matches!(outcome.failed[0].1, TransferError::HashMismatch));
    assert!(!store.contains(&bad));
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_retry_then_exhaust() {
    let (_dir, store) = temp_store().await;
    let channel = MockChannel::new();

    let recovers = FileHash::of_bytes(b"recovers");
    let doomed = FileHash::of_bytes(b"doomed");
    channel.script(
        &file_url(&recovers),
        vec![Step::Transient, Step::Payload(b"recovers".to_vec())],
    );
    channel.script(
        &file_url(&doomed),
        vec![Step::Transient, Step::Transient, Step::Transient],
    );

    let dtos = vec![download_dto(&recovers, 8), download_dto(&doomed, 6)];
    let hub = scripted_relay(move |_| CallReply::DownloadFiles(dtos.clone()));

    let manager = DownloadManager::new(hub, store.clone(), channel.clone(), small_config());
    let outcome = manager
        .start_batch(vec![recovers.clone(), doomed.clone()])
        .wait()
        .await
        .unwrap();

    assert_completed(&outcome, &[&recovers]);
    assert_eq!(outcome.failed.len(), 1);
    assert!(matches!(
        outcome.failed[0].1,
        TransferError::RetriesExhausted
    ));
    assert!(store.contains(&recovers));
}

#[tokio::test(start_paused = true)]
async fn test_server_queue_is_polled_until_payload_arrives() {
    let (_dir, store) = temp_store().await;
    let channel = MockChannel::new();

    let hash = FileHash::of_bytes(b"queued body");
    channel.script(
        &file_url(&hash),
        vec![
            Step::Queued(Some(Duration::from_secs(2))),
            Step::Queued(None),
            Step::Payload(b"queued body".to_vec()),
        ],
    );

    let dto = download_dto(&hash, 11);
    let hub = scripted_relay(move |_| CallReply::DownloadFiles(vec![dto.clone()]));

    let manager = DownloadManager::new(hub, store.clone(), channel.clone(), small_config());
    let outcome = manager.start_batch(vec![hash.clone()]).wait().await.unwrap();

    assert_completed(&outcome, &[&hash]);
    // Queue waits do not burn retries.
    assert_eq!(channel.fetch_count(), 3);
    assert!(store.contains(&hash));
}

#[tokio::test]
async fn test_cancel_aborts_batch_and_leaves_store_clean() {
    let (dir, store) = temp_store().await;
    let channel = MockChannel::new();

    let hash = FileHash::of_bytes(b"never lands");
    channel.script(&file_url(&hash), vec![Step::Gated(b"never lands".to_vec())]);

    let dto = download_dto(&hash, 11);
    let hub = scripted_relay(move |_| CallReply::DownloadFiles(vec![dto.clone()]));

    let manager = DownloadManager::new(hub, store.clone(), channel.clone(), small_config());
    let batch = manager.start_batch(vec![hash.clone()]);

    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    batch.cancel();
    let result = batch.wait().await;
    assert!(matches!(result, Err(TransferError::Cancelled)));

    assert!(!store.contains(&hash));
    let scratch: Vec<_> = std::fs::read_dir(dir.path().join("tmp"))
        .unwrap()
        .collect();
    assert!(scratch.is_empty(), "scratch dir not cleaned: {scratch:?}");
}

#[tokio::test]
async fn test_cancel_leaves_sibling_batch_untouched() {
    let (_dir, store) = temp_store().await;
    let channel = MockChannel::new();

    let doomed = FileHash::of_bytes(b"doomed body");
    let survivor = FileHash::of_bytes(b"survivor body");
    channel.script(&file_url(&doomed), vec![Step::Gated(b"doomed body".to_vec())]);
    channel.script(
        &file_url(&survivor),
        vec![Step::Gated(b"survivor body".to_vec())],
    );

    let doomed_dto = download_dto(&doomed, 11);
    let survivor_dto = download_dto(&survivor, 13);
    let hub = scripted_relay(move |call| match call {
        ClientCall::RequestDownloadFiles { hashes } => CallReply::DownloadFiles(
            hashes
                .iter()
                .map(|h| {
                    if *h == doomed_dto.hash {
                        doomed_dto.clone()
                    } else {
                        survivor_dto.clone()
                    }
                })
                .collect(),
        ),
        other => panic!("unexpected call: {:?}", other),
    });

    // Both batches draw from the same slot pool.
    let manager = DownloadManager::new(hub, store.clone(), channel.clone(), small_config());
    let first = manager.start_batch(vec![doomed.clone()]);
    let second = manager.start_batch(vec![survivor.clone()]);

    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    first.cancel();
    channel.release(2);

    assert!(matches!(first.wait().await, Err(TransferError::Cancelled)));
    let outcome = second.wait().await.unwrap();
    assert_completed(&outcome, &[&survivor]);
    assert!(store.contains(&survivor));
    assert!(!store.contains(&doomed));
}

// --- Uploads ------------------------------------------------------------

#[tokio::test]
async fn test_upload_pushes_only_what_the_relay_asks_for() {
    let (_dir, store) = temp_store().await;
    let channel = MockChannel::new();

    let wanted = store.import(b"new content").await.unwrap();
    let present = store.import(b"old content").await.unwrap();

    let wanted_dto = UploadFileDto {
        hash: wanted.clone(),
        is_forbidden: false,
        forbidden_by: String::new(),
    };
    let hub = scripted_relay(move |call| match call {
        ClientCall::DeclareUploadFiles(dto) => {
            assert_eq!(dto.file_hashes.len(), 2);
            assert_eq!(dto.uids, vec!["recipient-uid".to_string()]);
            CallReply::UploadFiles(vec![wanted_dto.clone()])
        }
        other => panic!("unexpected call: {:?}", other),
    });

    let manager = UploadManager::new(hub, store, channel.clone(), small_config());
    let outcome = manager
        .upload_batch(
            vec![wanted.clone(), present.clone()],
            vec!["recipient-uid".into()],
            "https://files.test/",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.uploaded, vec![wanted.clone()]);
    assert_eq!(outcome.skipped, vec![present]);
    assert!(outcome.is_success());

    let pushes = channel.pushes.lock().unwrap();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].0, format!("https://files.test/files/{}", wanted));
    // Payload goes up compressed.
    assert_eq!(
        zstd::decode_all(&pushes[0].1[..]).unwrap(),
        b"new content"
    );
}

#[tokio::test]
async fn test_upload_forbidden_hash_is_not_pushed() {
    let (_dir, store) = temp_store().await;
    let channel = MockChannel::new();

    let hash = store.import(b"contested").await.unwrap();
    let reply = UploadFileDto {
        hash: hash.clone(),
        is_forbidden: true,
        forbidden_by: "Mod Author".into(),
    };
    let hub = scripted_relay(move |_| CallReply::UploadFiles(vec![reply.clone()]));

    let manager = UploadManager::new(hub, store, channel.clone(), small_config());
    let outcome = manager
        .upload_batch(
            vec![hash.clone()],
            vec!["recipient-uid".into()],
            "https://files.test",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.uploaded.is_empty());
    assert_eq!(outcome.forbidden, vec![(hash, "Mod Author".to_string())]);
    assert!(channel.pushes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_transient_push_rejoins_slot_queue() {
    let (_dir, store) = temp_store().await;
    let channel = MockChannel::new();

    let hash = store.import(b"flaky upload").await.unwrap();
    let url = format!("https://files.test/files/{}", hash);
    channel.fail_pushes(&url, 2);

    let reply = UploadFileDto {
        hash: hash.clone(),
        is_forbidden: false,
        forbidden_by: String::new(),
    };
    let hub = scripted_relay(move |_| CallReply::UploadFiles(vec![reply.clone()]));

    let manager = UploadManager::new(hub, store, channel.clone(), small_config());
    let outcome = manager
        .upload_batch(
            vec![hash.clone()],
            vec!["recipient-uid".into()],
            "https://files.test",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.uploaded, vec![hash]);
    assert!(outcome.is_success());
    // Two transient failures, then the re-acquired slot succeeds.
    assert_eq!(channel.push_attempts(), 3);
    assert_eq!(channel.pushes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_upload_missing_local_file_fails_without_declaring() {
    let (_dir, store) = temp_store().await;
    let channel = MockChannel::new();
    let absent = FileHash::of_bytes(b"not imported");

    let manager = UploadManager::new(silent_relay(), store, channel.clone(), small_config());
    let outcome = manager
        .upload_batch(
            vec![absent.clone()],
            vec!["recipient-uid".into()],
            "https://files.test",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.uploaded.is_empty());
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, absent);
    assert!(channel.pushes.lock().unwrap().is_empty());
}
