//! HTTP channel to the file server, behind a trait so tests can swap in
//! an in-memory fake.

use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use super::TransferError;

/// zstd frame magic; payloads starting with it get a decompression pass.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

pub fn is_zstd(payload: &[u8]) -> bool {
    payload.len() >= 4 && payload[..4] == ZSTD_MAGIC
}

/// Result of one fetch attempt against the file server.
#[derive(Debug)]
pub enum FetchResult {
    /// The body, possibly zstd-compressed.
    Payload(Vec<u8>),
    /// The server queued the request upstream; try again after the hint.
    Queued { retry_after: Option<Duration> },
}

/// Moves bytes to and from the file server.
pub trait FileChannel: Send + Sync + 'static {
    /// Fetch a file by its pre-declared URL.
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FetchResult, TransferError>>;

    /// Push an (already compressed) payload to the given URL.
    fn push<'a>(&'a self, url: &'a str, payload: Vec<u8>) -> BoxFuture<'a, Result<(), TransferError>>;
}

/// Production channel over reqwest with optional bearer auth.
pub struct HttpFileChannel {
    client: reqwest::Client,
    token: Option<String>,
}

impl HttpFileChannel {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            token: None,
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: Some(token.into()),
        }
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

impl Default for HttpFileChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl FileChannel for HttpFileChannel {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FetchResult, TransferError>> {
        Box::pin(async move {
            let response = self
                .authorize(self.client.get(url))
                .send()
                .await
                .map_err(|e| TransferError::Http(e.to_string()))?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                debug!(url, ?retry_after, "File server queued the request");
                return Ok(FetchResult::Queued { retry_after });
            }

            let response = response
                .error_for_status()
                .map_err(|e| TransferError::Http(e.to_string()))?;
            let body = response
                .bytes()
                .await
                .map_err(|e| TransferError::Http(e.to_string()))?;

            debug!(url, size = body.len(), "Fetched file payload");
            Ok(FetchResult::Payload(body.to_vec()))
        })
    }

    fn push<'a>(&'a self, url: &'a str, payload: Vec<u8>) -> BoxFuture<'a, Result<(), TransferError>> {
        Box::pin(async move {
            let size = payload.len();
            self.authorize(self.client.post(url))
                .body(payload)
                .send()
                .await
                .map_err(|e| TransferError::Http(e.to_string()))?
                .error_for_status()
                .map_err(|e| TransferError::Http(e.to_string()))?;

            debug!(url, size, "Pushed file payload");
            Ok(())
        })
    }
}
