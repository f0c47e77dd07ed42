//! Download orchestration.
//!
//! A batch resolves a set of needed hashes into committed local content:
//! already-cached hashes complete immediately, forbidden hashes are
//! excluded with attribution, and the rest flow through a FIFO slot queue
//! with per-file retry, hash verification on commit, and a shared
//! in-flight table so the same hash is never fetched twice concurrently,
//! even across batches.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use charasync_net::HubClient;
use charasync_shared::protocol::DownloadFileDto;
use charasync_shared::types::FileHash;
use charasync_store::{ContentStore, StoreError};

use super::http::{is_zstd, FetchResult, FileChannel};
use super::{BatchOutcome, DownloadStatus, FileDownloadStatus, TransferConfig, TransferError};

type InFlightTable = Arc<Mutex<HashMap<FileHash, watch::Receiver<bool>>>>;

/// Aggregated and per-file progress for one batch.
struct BatchProgress {
    files: Mutex<HashMap<FileHash, DownloadStatus>>,
    totals: Mutex<(u64, usize)>,
    done: Mutex<(u64, usize)>,
    status_tx: watch::Sender<FileDownloadStatus>,
}

impl BatchProgress {
    fn new() -> (Arc<Self>, watch::Receiver<FileDownloadStatus>) {
        let (status_tx, status_rx) = watch::channel(FileDownloadStatus::empty());
        (
            Arc::new(Self {
                files: Mutex::new(HashMap::new()),
                totals: Mutex::new((0, 0)),
                done: Mutex::new((0, 0)),
                status_tx,
            }),
            status_rx,
        )
    }

    fn set_totals(&self, total_bytes: u64, total_files: usize) {
        *self.totals.lock().expect("progress lock poisoned") = (total_bytes, total_files);
        self.push();
    }

    fn set_file(&self, hash: &FileHash, status: DownloadStatus) {
        self.files
            .lock()
            .expect("progress lock poisoned")
            .insert(hash.clone(), status);
        self.push();
    }

    fn file_done(&self, hash: &FileHash, bytes: u64) {
        self.files
            .lock()
            .expect("progress lock poisoned")
            .remove(hash);
        {
            let mut done = self.done.lock().expect("progress lock poisoned");
            done.0 += bytes;
            done.1 += 1;
        }
        self.push();
    }

    fn file_failed(&self, hash: &FileHash) {
        self.files
            .lock()
            .expect("progress lock poisoned")
            .remove(hash);
        self.push();
    }

    fn file_status(&self, hash: &FileHash) -> Option<DownloadStatus> {
        self.files
            .lock()
            .expect("progress lock poisoned")
            .get(hash)
            .copied()
    }

    fn push(&self) {
        let status = {
            let files = self.files.lock().expect("progress lock poisoned");
            aggregate_status(files.values())
        };
        let (total_bytes, total_files) = *self.totals.lock().expect("progress lock poisoned");
        let (transferred_bytes, transferred_files) =
            *self.done.lock().expect("progress lock poisoned");

        let _ = self.status_tx.send(FileDownloadStatus {
            status,
            total_bytes,
            total_files,
            transferred_bytes,
            transferred_files,
        });
    }
}

/// The most active stage wins; an idle batch reports `Initializing`.
fn aggregate_status<'a>(statuses: impl Iterator<Item = &'a DownloadStatus>) -> DownloadStatus {
    let mut aggregate = DownloadStatus::Initializing;
    for status in statuses {
        let rank = stage_rank(*status);
        if rank > stage_rank(aggregate) {
            aggregate = *status;
        }
    }
    aggregate
}

fn stage_rank(status: DownloadStatus) -> u8 {
    match status {
        DownloadStatus::Initializing => 0,
        DownloadStatus::WaitingForSlot => 1,
        DownloadStatus::WaitingForQueue => 2,
        DownloadStatus::Downloading => 3,
        DownloadStatus::Decompressing => 4,
    }
}

struct BatchCtx {
    store: ContentStore,
    channel: Arc<dyn FileChannel>,
    slots: Arc<Semaphore>,
    in_flight: InFlightTable,
    progress: Arc<BatchProgress>,
    cancel: CancellationToken,
    retry_limit: u32,
    queue_poll: Duration,
}

/// Orchestrates download batches over a shared slot pool.
pub struct DownloadManager {
    hub: HubClient,
    store: ContentStore,
    channel: Arc<dyn FileChannel>,
    slots: Arc<Semaphore>,
    in_flight: InFlightTable,
    config: TransferConfig,
}

impl DownloadManager {
    pub fn new(
        hub: HubClient,
        store: ContentStore,
        channel: Arc<dyn FileChannel>,
        config: TransferConfig,
    ) -> Self {
        Self {
            hub,
            store,
            channel,
            slots: Arc::new(Semaphore::new(config.download_slots)),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Start resolving a set of hashes. The returned handle observes
    /// progress and can cancel the whole batch without touching others.
    pub fn start_batch(&self, hashes: Vec<FileHash>) -> DownloadBatch {
        let (progress, status_rx) = BatchProgress::new();
        let cancel = CancellationToken::new();

        let ctx = Arc::new(BatchCtx {
            store: self.store.clone(),
            channel: Arc::clone(&self.channel),
            slots: Arc::clone(&self.slots),
            in_flight: Arc::clone(&self.in_flight),
            progress: Arc::clone(&progress),
            cancel: cancel.clone(),
            retry_limit: self.config.retry_limit,
            queue_poll: self.config.queue_poll,
        });
        let hub = self.hub.clone();

        let join = tokio::spawn(run_batch(hub, ctx, hashes));

        DownloadBatch {
            status_rx,
            progress,
            cancel,
            join,
        }
    }
}

/// Handle to one running download batch.
pub struct DownloadBatch {
    status_rx: watch::Receiver<FileDownloadStatus>,
    progress: Arc<BatchProgress>,
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<Result<BatchOutcome, TransferError>>,
}

impl DownloadBatch {
    /// Current batch aggregate.
    pub fn status(&self) -> FileDownloadStatus {
        *self.status_rx.borrow()
    }

    pub fn status_watch(&self) -> watch::Receiver<FileDownloadStatus> {
        self.status_rx.clone()
    }

    /// Pipeline stage of one in-progress file, `None` once it settled.
    pub fn file_status(&self, hash: &FileHash) -> Option<DownloadStatus> {
        self.progress.file_status(hash)
    }

    /// Abort the batch: in-flight fetches stop, partial data is
    /// discarded, nothing further is committed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> Result<BatchOutcome, TransferError> {
        self.join.await.unwrap_or(Err(TransferError::Cancelled))
    }
}

async fn run_batch(
    hub: HubClient,
    ctx: Arc<BatchCtx>,
    hashes: Vec<FileHash>,
) -> Result<BatchOutcome, TransferError> {
    let mut outcome = BatchOutcome::default();

    // Dedup the request while keeping request order for the FIFO queue.
    let mut seen = HashSet::new();
    let mut requested = Vec::new();
    for hash in hashes {
        if seen.insert(hash.clone()) {
            requested.push(hash);
        }
    }

    let mut missing = Vec::new();
    for hash in requested {
        if ctx.store.contains(&hash) {
            outcome.completed.push(hash);
        } else {
            missing.push(hash);
        }
    }
    if missing.is_empty() {
        debug!("Download batch fully cache-resolved");
        return Ok(outcome);
    }

    let descriptors = hub.request_download_files(missing.clone()).await?;
    let mut by_hash: HashMap<FileHash, DownloadFileDto> = descriptors
        .into_iter()
        .map(|dto| (dto.hash.clone(), dto))
        .collect();

    let mut to_fetch = Vec::new();
    for hash in missing {
        match by_hash.remove(&hash) {
            None => outcome.failed.push((hash, TransferError::NotOnServer)),
            Some(dto) if dto.is_forbidden => {
                info!(hash = %hash.short(), by = %dto.forbidden_by, "File forbidden, excluded");
                outcome.forbidden.push((hash, dto.forbidden_by));
            }
            Some(dto) if !dto.file_exists => {
                outcome.failed.push((hash, TransferError::NotOnServer));
            }
            Some(dto) => to_fetch.push(dto),
        }
    }

    ctx.progress.set_totals(
        to_fetch.iter().map(|dto| dto.size).sum(),
        to_fetch.len(),
    );
    for dto in &to_fetch {
        ctx.progress.set_file(&dto.hash, DownloadStatus::WaitingForSlot);
    }

    info!(files = to_fetch.len(), "Download batch starting");

    let mut workers = JoinSet::new();
    let mut cancelled = false;
    for dto in to_fetch {
        // Slots are granted in request order.
        let permit = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                cancelled = true;
                break;
            }
            permit = Arc::clone(&ctx.slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    cancelled = true;
                    break;
                }
            },
        };

        let ctx = Arc::clone(&ctx);
        workers.spawn(async move {
            let hash = dto.hash.clone();
            let result = fetch_one(ctx, dto, Some(permit)).await;
            (hash, result)
        });
    }

    while let Some(joined) = workers.join_next().await {
        let Ok((hash, result)) = joined else {
            continue;
        };
        match result {
            Ok(()) => outcome.completed.push(hash),
            Err(TransferError::Cancelled) => cancelled = true,
            Err(e) => {
                warn!(hash = %hash.short(), error = %e, "File download failed");
                outcome.failed.push((hash, e));
            }
        }
    }

    if cancelled || ctx.cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    debug!(
        completed = outcome.completed.len(),
        failed = outcome.failed.len(),
        forbidden = outcome.forbidden.len(),
        "Download batch finished"
    );
    Ok(outcome)
}

/// Resolve a single file, coordinating with any concurrent request for
/// the same hash through the in-flight table.
async fn fetch_one(
    ctx: Arc<BatchCtx>,
    dto: DownloadFileDto,
    mut permit: Option<OwnedSemaphorePermit>,
) -> Result<(), TransferError> {
    enum Role {
        Fetch(watch::Sender<bool>),
        Wait(watch::Receiver<bool>),
    }

    let hash = dto.hash.clone();
    loop {
        if ctx.store.contains(&hash) {
            ctx.progress.file_done(&hash, dto.size);
            return Ok(());
        }

        let role = {
            let mut in_flight = ctx.in_flight.lock().expect("in-flight lock poisoned");
            match in_flight.get(&hash) {
                Some(rx) => Role::Wait(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(false);
                    in_flight.insert(hash.clone(), rx);
                    Role::Fetch(tx)
                }
            }
        };

        match role {
            Role::Wait(mut rx) => {
                debug!(hash = %hash.short(), "Hash already in flight, waiting");
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
                    _ = rx.changed() => {}
                }
                // Loop around: success shows up in the store; a failed
                // fetcher leaves us to try ourselves.
            }
            Role::Fetch(tx) => {
                let result = fetch_bytes(&ctx, &dto, &mut permit).await;
                ctx.in_flight
                    .lock()
                    .expect("in-flight lock poisoned")
                    .remove(&hash);
                let _ = tx.send(true);

                return match result {
                    Ok(()) => {
                        ctx.progress.file_done(&hash, dto.size);
                        Ok(())
                    }
                    Err(e) => {
                        ctx.progress.file_failed(&hash);
                        Err(e)
                    }
                };
            }
        }
    }
}

/// The fetch/verify/commit pipeline for one file, with transient retries.
async fn fetch_bytes(
    ctx: &BatchCtx,
    dto: &DownloadFileDto,
    permit: &mut Option<OwnedSemaphorePermit>,
) -> Result<(), TransferError> {
    let hash = &dto.hash;
    let mut attempt = 0u32;

    loop {
        if permit.is_none() {
            ctx.progress.set_file(hash, DownloadStatus::WaitingForSlot);
            let acquired = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
                permit = Arc::clone(&ctx.slots).acquire_owned() => {
                    permit.map_err(|_| TransferError::Cancelled)?
                }
            };
            *permit = Some(acquired);
        }

        ctx.progress.set_file(hash, DownloadStatus::Downloading);
        let fetched = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
            result = ctx.channel.fetch(&dto.url) => result,
        };

        match fetched {
            Ok(FetchResult::Queued { retry_after }) => {
                // The server-side queue gate is upstream of our slot; the
                // slot stays held while we wait it out.
                ctx.progress.set_file(hash, DownloadStatus::WaitingForQueue);
                let delay = retry_after.unwrap_or(ctx.queue_poll);
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Ok(FetchResult::Payload(payload)) => {
                // A cancel racing the payload must not commit anything.
                if ctx.cancel.is_cancelled() {
                    return Err(TransferError::Cancelled);
                }
                let raw = if is_zstd(&payload) {
                    ctx.progress.set_file(hash, DownloadStatus::Decompressing);
                    zstd::decode_all(&payload[..])
                        .map_err(|e| TransferError::Decompress(e.to_string()))?
                } else {
                    payload
                };

                let mut staged = ctx.store.begin_staged(hash.clone()).await?;
                staged.write_chunk(&raw).await?;
                return match staged.commit().await {
                    Ok(()) => Ok(()),
                    Err(StoreError::HashMismatch { .. }) => Err(TransferError::HashMismatch),
                    Err(e) => Err(e.into()),
                };
            }
            Err(e) if e.is_transient() => {
                attempt += 1;
                if attempt >= ctx.retry_limit {
                    return Err(TransferError::RetriesExhausted);
                }
                debug!(hash = %hash.short(), attempt, error = %e, "Transient fetch error, requeueing");
                // No backoff beyond rejoining the slot queue.
                *permit = None;
            }
            Err(e) => return Err(e),
        }
    }
}
