//! Local content-addressed file store.
//!
//! Maps a BLAKE3 [`FileHash`] to bytes on disk. The store is append-only:
//! entries are never updated in place, only added. Writes go through a
//! staged scratch file whose bytes are hashed as they arrive; the entry
//! only becomes visible under its hash after the computed hash matches the
//! expected one and the scratch file is renamed into place. A second
//! writer committing an existing hash detects it and discards its scratch.

pub mod error;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use charasync_shared::types::FileHash;

pub use error::StoreError;

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Directory-backed hash → bytes store.
#[derive(Debug, Clone)]
pub struct ContentStore {
    base_path: PathBuf,
    scratch_path: PathBuf,
}

impl ContentStore {
    pub async fn new(base_path: PathBuf) -> Result<Self, StoreError> {
        let scratch_path = base_path.join("tmp");
        fs::create_dir_all(&scratch_path).await.map_err(|e| {
            StoreError::Storage(format!(
                "Failed to create content directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Content store initialized");

        Ok(Self {
            base_path,
            scratch_path,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Whether the store holds committed content for this hash.
    pub fn contains(&self, hash: &FileHash) -> bool {
        self.entry_path(hash).exists()
    }

    /// Of the given hashes, those not yet present locally.
    pub fn missing_of(&self, hashes: &[FileHash]) -> Vec<FileHash> {
        hashes
            .iter()
            .filter(|h| !self.contains(h))
            .cloned()
            .collect()
    }

    /// Read committed content.
    pub async fn get(&self, hash: &FileHash) -> Result<Vec<u8>, StoreError> {
        let path = self.entry_path(hash);
        if !path.exists() {
            return Err(StoreError::NotFound(hash.clone()));
        }

        let data = fs::read(&path).await?;
        debug!(hash = %hash.short(), size = data.len(), "Read content");
        Ok(data)
    }

    /// Hash and commit local bytes, returning the content hash.
    pub async fn import(&self, data: &[u8]) -> Result<FileHash, StoreError> {
        if data.is_empty() {
            return Err(StoreError::Empty);
        }
        let hash = FileHash::of_bytes(data);

        let mut staged = self.begin_staged(hash.clone()).await?;
        staged.write_chunk(data).await?;
        staged.commit().await?;
        Ok(hash)
    }

    /// Hash and commit a local file.
    pub async fn import_file(&self, path: &Path) -> Result<FileHash, StoreError> {
        let data = fs::read(path).await?;
        self.import(&data).await
    }

    /// Open a staged write for content expected to hash to `expected`.
    ///
    /// The entry becomes visible only after [`StagedWrite::commit`]
    /// verifies the hash. Dropping the handle without committing removes
    /// the scratch file.
    pub async fn begin_staged(&self, expected: FileHash) -> Result<StagedWrite, StoreError> {
        let scratch_id = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        let scratch = self
            .scratch_path
            .join(format!("{}.{}.part", expected.as_str(), scratch_id));
        let file = fs::File::create(&scratch).await?;

        Ok(StagedWrite {
            store: self.clone(),
            expected,
            scratch,
            file: Some(file),
            hasher: blake3::Hasher::new(),
            written: 0,
        })
    }

    fn entry_path(&self, hash: &FileHash) -> PathBuf {
        // FileHash is validated lowercase hex, so the join cannot traverse.
        self.base_path.join(hash.as_str())
    }
}

/// An in-progress write to the store. Bytes are hashed incrementally as
/// they are written.
pub struct StagedWrite {
    store: ContentStore,
    expected: FileHash,
    scratch: PathBuf,
    file: Option<fs::File>,
    hasher: blake3::Hasher,
    written: u64,
}

impl StagedWrite {
    pub fn expected_hash(&self) -> &FileHash {
        &self.expected
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StoreError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StoreError::Storage("Write after finalize".to_string()))?;
        file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Verify the computed hash and rename the scratch file into place.
    ///
    /// Committing a hash that already exists is a no-op: the scratch is
    /// discarded and the existing entry wins.
    pub async fn commit(mut self) -> Result<(), StoreError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| StoreError::Storage("Double commit".to_string()))?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let computed = FileHash::parse(&self.hasher.finalize().to_hex().to_string())
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        if computed != self.expected {
            let _ = fs::remove_file(&self.scratch).await;
            warn!(
                expected = %self.expected.short(),
                computed = %computed.short(),
                "Staged content failed hash verification"
            );
            return Err(StoreError::HashMismatch {
                expected: self.expected.clone(),
                computed,
            });
        }

        let target = self.store.entry_path(&self.expected);
        if target.exists() {
            // Another writer got here first; identical content by hash.
            let _ = fs::remove_file(&self.scratch).await;
            debug!(hash = %self.expected.short(), "Content already present, discarding scratch");
            return Ok(());
        }

        fs::rename(&self.scratch, &target).await?;
        debug!(hash = %self.expected.short(), size = self.written, "Committed content");
        Ok(())
    }

    /// Abandon the write and remove the scratch file.
    pub async fn discard(mut self) -> Result<(), StoreError> {
        self.file.take();
        fs::remove_file(&self.scratch).await?;
        debug!(hash = %self.expected.short(), "Discarded staged content");
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            // Not committed or discarded explicitly; best-effort cleanup.
            let _ = std::fs::remove_file(&self.scratch);
        }
    }
}
