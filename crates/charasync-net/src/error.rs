use thiserror::Error;

use charasync_shared::ProtocolError;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not connected to the relay")]
    NotConnected,

    #[error("Relay call timed out")]
    CallTimeout,

    #[error("Session channel closed")]
    ChannelClosed,

    #[error("Call denied by relay: {0}")]
    Denied(String),

    #[error("Unexpected reply kind for call")]
    UnexpectedReply,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
