//! Upload orchestration.
//!
//! Upload intent is declared to the relay first; the reply names only the
//! hashes the file server actually needs bytes for, so content other
//! clients already pushed is skipped without touching the network.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use charasync_net::HubClient;
use charasync_shared::protocol::FilesSendDto;
use charasync_shared::types::FileHash;
use charasync_store::ContentStore;

use super::http::FileChannel;
use super::{TransferConfig, TransferError};

/// zstd level used for upload payloads.
const UPLOAD_COMPRESSION_LEVEL: i32 = 3;

/// Per-hash results of one upload batch.
#[derive(Debug, Default)]
pub struct UploadOutcome {
    /// Bytes were pushed to the file server.
    pub uploaded: Vec<FileHash>,
    /// Already present server-side; no bytes moved.
    pub skipped: Vec<FileHash>,
    pub forbidden: Vec<(FileHash, String)>,
    pub failed: Vec<(FileHash, TransferError)>,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Pushes locally stored content to the file server on behalf of the
/// recipients named in the declaration.
pub struct UploadManager {
    hub: HubClient,
    store: ContentStore,
    channel: Arc<dyn FileChannel>,
    slots: Arc<Semaphore>,
    config: TransferConfig,
}

impl UploadManager {
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
            slots: Arc::new(Semaphore::new(config.upload_slots)),
            config,
        }
    }

    /// Declare `hashes` for `recipients` and push whatever the relay asks
    /// for. Hashes missing from the local store fail up front without
    /// being declared.
    pub async fn upload_batch(
        &self,
        hashes: Vec<FileHash>,
        recipients: Vec<String>,
        file_server: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, TransferError> {
        let mut outcome = UploadOutcome::default();

        let mut declarable = Vec::new();
        for hash in hashes {
            if declarable.contains(&hash) {
                continue;
            }
            if self.store.contains(&hash) {
                declarable.push(hash);
            } else {
                let missing = charasync_store::StoreError::NotFound(hash.clone());
                outcome.failed.push((hash, TransferError::Store(missing)));
            }
        }
        if declarable.is_empty() {
            return Ok(outcome);
        }

        let needed = self
            .hub
            .declare_upload_files(FilesSendDto {
                file_hashes: declarable.clone(),
                uids: recipients,
            })
            .await?;

        let mut to_push = Vec::new();
        for dto in needed {
            if dto.is_forbidden {
                info!(hash = %dto.hash.short(), by = %dto.forbidden_by, "Upload forbidden, excluded");
                declarable.retain(|h| h != &dto.hash);
                outcome.forbidden.push((dto.hash, dto.forbidden_by));
            } else {
                declarable.retain(|h| h != &dto.hash);
                to_push.push(dto.hash);
            }
        }
        // Anything the relay did not ask bytes for is already server-side.
        outcome.skipped.extend(declarable);

        if to_push.is_empty() {
            debug!(skipped = outcome.skipped.len(), "Upload batch fully deduplicated");
            return Ok(outcome);
        }

        info!(files = to_push.len(), "Upload batch starting");
        let base = file_server.trim_end_matches('/').to_string();

        let mut workers = JoinSet::new();
        let mut cancelled = false;
        for hash in to_push {
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        cancelled = true;
                        break;
                    }
                },
            };

            let ctx = PushCtx {
                store: self.store.clone(),
                channel: Arc::clone(&self.channel),
                slots: Arc::clone(&self.slots),
                cancel: cancel.clone(),
                retry_limit: self.config.retry_limit,
            };
            let url = format!("{}/files/{}", base, hash);
            workers.spawn(async move {
                let result = push_one(&ctx, permit, &hash, &url).await;
                (hash, result)
            });
        }

        while let Some(joined) = workers.join_next().await {
            let Ok((hash, result)) = joined else {
                continue;
            };
            match result {
                Ok(()) => outcome.uploaded.push(hash),
                Err(TransferError::Cancelled) => cancelled = true,
                Err(e) => {
                    warn!(hash = %hash.short(), error = %e, "File upload failed");
                    outcome.failed.push((hash, e));
                }
            }
        }

        if cancelled || cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        Ok(outcome)
    }
}

struct PushCtx {
    store: ContentStore,
    channel: Arc<dyn FileChannel>,
    slots: Arc<Semaphore>,
    cancel: CancellationToken,
    retry_limit: u32,
}

async fn push_one(
    ctx: &PushCtx,
    permit: OwnedSemaphorePermit,
    hash: &FileHash,
    url: &str,
) -> Result<(), TransferError> {
    let raw = ctx.store.get(hash).await?;
    let payload = zstd::encode_all(&raw[..], UPLOAD_COMPRESSION_LEVEL)
        .map_err(|e| TransferError::Decompress(e.to_string()))?;
    debug!(
        hash = %hash.short(),
        raw = raw.len(),
        compressed = payload.len(),
        "Pushing file"
    );

    let mut permit = Some(permit);
    let mut attempt = 0u32;
    loop {
        if permit.is_none() {
            let acquired = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
                permit = Arc::clone(&ctx.slots).acquire_owned() => {
                    permit.map_err(|_| TransferError::Cancelled)?
                }
            };
            permit = Some(acquired);
        }

        let pushed = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
            result = ctx.channel.push(url, payload.clone()) => result,
        };
        match pushed {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() => {
                attempt += 1;
                if attempt >= ctx.retry_limit {
                    return Err(TransferError::RetriesExhausted);
                }
                debug!(hash = %hash.short(), attempt, error = %e, "Transient push error, requeueing");
                // Back of the slot queue, same as the download path.
                permit = None;
            }
            Err(e) => return Err(e),
        }
    }
}
