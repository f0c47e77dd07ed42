//! File transfer orchestration: bounded, deduplicated, resumable movement
//! of content-addressed files between the local store and the file server.

pub mod download;
pub mod http;
pub mod upload;

use std::time::Duration;

use thiserror::Error;

use charasync_net::NetError;
use charasync_shared::constants::{
    DEFAULT_DOWNLOAD_SLOTS, DEFAULT_UPLOAD_SLOTS, FILE_RETRY_LIMIT, SERVER_QUEUE_POLL_SECS,
};
use charasync_shared::types::FileHash;
use charasync_store::StoreError;

pub use download::{DownloadBatch, DownloadManager};
pub use http::{FetchResult, FileChannel, HttpFileChannel};
pub use upload::{UploadManager, UploadOutcome};

/// Where a file currently sits in the download pipeline.
///
/// `WaitingForSlot` is local backpressure (all slots busy);
/// `WaitingForQueue` is the file server's own queue gate holding the
/// request upstream. They are distinct states on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Initializing,
    WaitingForSlot,
    WaitingForQueue,
    Downloading,
    Decompressing,
}

/// Batch-level progress aggregate. Created when a batch starts, updated
/// monotonically, torn down when the batch finishes or is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDownloadStatus {
    pub status: DownloadStatus,
    pub total_bytes: u64,
    pub total_files: usize,
    pub transferred_bytes: u64,
    pub transferred_files: usize,
}

impl FileDownloadStatus {
    pub(crate) fn empty() -> Self {
        Self {
            status: DownloadStatus::Initializing,
            total_bytes: 0,
            total_files: 0,
            transferred_bytes: 0,
            transferred_files: 0,
        }
    }
}

/// Tunables for both transfer directions.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub download_slots: usize,
    pub upload_slots: usize,
    /// Transient per-file retries within a batch.
    pub retry_limit: u32,
    /// Poll interval while the file server queues a request upstream.
    pub queue_poll: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_slots: DEFAULT_DOWNLOAD_SLOTS,
            upload_slots: DEFAULT_UPLOAD_SLOTS,
            retry_limit: FILE_RETRY_LIMIT,
            queue_poll: Duration::from_secs(SERVER_QUEUE_POLL_SECS),
        }
    }
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("File forbidden by {0}")]
    Forbidden(String),

    #[error("Received content does not match requested hash")]
    HashMismatch,

    #[error("File does not exist on the server")]
    NotOnServer,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("zstd codec error: {0}")]
    Decompress(String),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Retries exhausted")]
    RetriesExhausted,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Relay error: {0}")]
    Net(#[from] NetError),
}

impl TransferError {
    /// Timeouts and resets are worth another slot; integrity and policy
    /// failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransferError::Http(_))
    }
}

/// Per-hash results of one finished batch. Completion order is not
/// request order; callers key by hash.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub completed: Vec<FileHash>,
    pub forbidden: Vec<(FileHash, String)>,
    pub failed: Vec<(FileHash, TransferError)>,
}

impl BatchOutcome {
    /// A batch succeeds when every requested, non-forbidden hash resolved.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}
