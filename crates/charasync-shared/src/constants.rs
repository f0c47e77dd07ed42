/// Protocol version string exchanged during authentication
pub const CLIENT_VERSION: &str = "charasync/1.0.0";

/// Timeout for a single relay round-trip call
pub const CALL_TIMEOUT_SECS: u64 = 30;

/// Default number of concurrent download slots
pub const DEFAULT_DOWNLOAD_SLOTS: usize = 3;

/// Default number of concurrent upload slots
pub const DEFAULT_UPLOAD_SLOTS: usize = 2;

/// Transient per-file retries within a transfer batch
pub const FILE_RETRY_LIMIT: u32 = 3;

/// Poll interval while the file server holds a request in its queue
pub const SERVER_QUEUE_POLL_SECS: u64 = 5;

/// Maximum character appearance payload size in bytes (16 MiB)
pub const MAX_CHARA_DATA_SIZE: usize = 16 * 1024 * 1024;

/// Maximum single asset file size in bytes (512 MiB)
pub const MAX_FILE_SIZE: u64 = 512 * 1024 * 1024;

/// Reconnect delay for the first failed attempt
pub const RECONNECT_DELAY_FIRST_SECS: u64 = 3;

/// Reconnect delay for the second failed attempt
pub const RECONNECT_DELAY_SECOND_SECS: u64 = 5;

/// Floor of the randomized reconnect delay from the third attempt on
pub const RECONNECT_DELAY_FLOOR_SECS: u64 = 10;

/// Exclusive ceiling of the randomized reconnect delay
pub const RECONNECT_DELAY_CEILING_SECS: u64 = 20;
