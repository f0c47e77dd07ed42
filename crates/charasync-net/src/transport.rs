//! The seam between the connection manager and whatever actually carries
//! bytes to the relay.
//!
//! The engine never opens sockets itself; it asks a [`RelayTransport`] for
//! a [`RelaySession`] and drives it. Tests plug in an in-memory transport.

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use charasync_shared::protocol::{CallReply, ClientCall, ConnectionDto};
use charasync_shared::types::ServerState;
use charasync_shared::ServerEvent;

use crate::error::NetError;

/// Credentials and character identity for a connection attempt.
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub secret_key: String,
    pub chara_ident: String,
    pub token: Option<String>,
}

/// Why a connection attempt did not produce a session.
///
/// `Transport` is retryable; everything else ends the attempt and needs
/// user or operator action.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Credential rejected by relay")]
    Unauthorized,

    #[error("No secret key configured")]
    NoSecretKey,

    #[error("Client/server version mismatch")]
    VersionMisMatch,

    #[error("Connection attempt rate limited")]
    RateLimited,

    #[error("Another character is already connected")]
    MultiChara,
}

impl ConnectError {
    /// The terminal [`ServerState`] this denial maps to, if any.
    pub fn terminal_state(&self) -> Option<ServerState> {
        match self {
            ConnectError::Transport(_) => None,
            ConnectError::Unauthorized => Some(ServerState::Unauthorized),
            ConnectError::NoSecretKey => Some(ServerState::NoSecretKey),
            ConnectError::VersionMisMatch => Some(ServerState::VersionMisMatch),
            ConnectError::RateLimited => Some(ServerState::RateLimited),
            ConnectError::MultiChara => Some(ServerState::MultiChara),
        }
    }

    /// Whether the failure is credential-related and worth a
    /// re-authentication round before giving up.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, ConnectError::Unauthorized | ConnectError::NoSecretKey)
    }
}

/// One outbound call en route to the relay, with its reply slot.
#[derive(Debug)]
pub struct SessionCall {
    pub call: ClientCall,
    pub reply: oneshot::Sender<Result<CallReply, NetError>>,
}

/// A live session to the relay.
///
/// The session is over when `event_rx` yields `None`; the connection
/// manager treats that as transient loss and re-enters its retry loop.
pub struct RelaySession {
    /// Handshake payload received on connect.
    pub connection: ConnectionDto,
    /// Outbound calls into the transport.
    pub call_tx: mpsc::Sender<SessionCall>,
    /// Inbound pushes from the relay.
    pub event_rx: mpsc::Receiver<ServerEvent>,
}

/// Dials the relay. Implementations own reconnection *mechanics* only
/// for a single attempt; the retry loop lives in the connection manager.
pub trait RelayTransport: Send + Sync + 'static {
    fn connect<'a>(&'a self, auth: &'a AuthInfo)
        -> BoxFuture<'a, Result<RelaySession, ConnectError>>;
}

/// Supplies fresh credentials after a credential-related denial.
///
/// Returning `None` means no replacement is available and the terminal
/// state stands until the user intervenes.
pub trait CredentialProvider: Send + Sync + 'static {
    fn refresh<'a>(&'a self) -> BoxFuture<'a, Option<AuthInfo>>;
}

/// Provider used when no re-authentication source is wired up.
pub struct NoReauth;

impl CredentialProvider for NoReauth {
    fn refresh<'a>(&'a self) -> BoxFuture<'a, Option<AuthInfo>> {
        Box::pin(async { None })
    }
}
