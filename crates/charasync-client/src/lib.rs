//! Client-side projection and transfer logic for the charasync engine.

pub mod registry;
pub mod transfer;

pub use registry::{Group, Pair, SyncRegistry};
pub use transfer::{
    BatchOutcome, DownloadManager, DownloadStatus, FileDownloadStatus, TransferConfig,
    TransferError, UploadManager,
};
