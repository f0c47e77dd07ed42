use charasync_shared::types::FileHash;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Content hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch {
        expected: FileHash,
        computed: FileHash,
    },

    #[error("Content not found: {0}")]
    NotFound(FileHash),

    #[error("Empty content rejected")]
    Empty,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
