//! Shared types and wire protocol for the charasync synchronization engine.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod permissions;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use permissions::{
    EffectivePermissions, GroupPermissions, GroupUserPermissions, UserPermissions,
};
pub use protocol::{CallReply, ClientCall, ServerEvent};
pub use types::{FileHash, GroupData, ServerState, UserData};
