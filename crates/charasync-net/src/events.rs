//! Typed events published on the [`EventBus`](crate::bus::EventBus).
//!
//! Each inbound relay push kind gets its own event type so subscribers
//! register for exactly the kinds they care about. Handlers must be
//! idempotent-safe under out-of-order arrival of semantically related
//! events (a permission update may land before the matching pair-joined
//! event); the router never reorders or buffers for causal consistency.

use charasync_shared::protocol::{
    CharaDataDto, ConnectionDto, GroupFullInfoDto, GroupPermissionsDto, GroupUserPermissionsDto,
    PoseDataDto, ServerMessageDto, SignedChatMessage, SystemInfoDto, UploadStatusDto,
    UserPermissionsDto, WorldDataDto,
};
use charasync_shared::types::{FileHash, GroupData, ServerState, UserData};

// --- session lifecycle ---

/// The session state machine moved to a new state.
#[derive(Debug, Clone)]
pub struct ServerStateChanged {
    pub state: ServerState,
}

/// A connection attempt succeeded; carries the handshake payload.
#[derive(Debug, Clone)]
pub struct SessionEstablished {
    pub connection: ConnectionDto,
}

/// Fired exactly once per contiguous run of failed reconnect attempts
/// past the notification threshold.
#[derive(Debug, Clone)]
pub struct ConnectionLost;

// --- file transfer ---

#[derive(Debug, Clone)]
pub struct DownloadReady {
    pub hashes: Vec<FileHash>,
}

#[derive(Debug, Clone)]
pub struct UploadStatusChanged(pub UploadStatusDto);

// --- pairs ---

#[derive(Debug, Clone)]
pub struct PairAdded(pub UserPermissionsDto);

#[derive(Debug, Clone)]
pub struct PairRemoved {
    pub user: UserData,
}

#[derive(Debug, Clone)]
pub struct UserOnline {
    pub user: UserData,
    pub ident: String,
}

#[derive(Debug, Clone)]
pub struct UserOffline {
    pub user: UserData,
}

/// Our own permission bits toward a paired user changed.
#[derive(Debug, Clone)]
pub struct SelfPairPermissionsChanged(pub UserPermissionsDto);

/// The other side's permission bits toward us changed.
#[derive(Debug, Clone)]
pub struct OtherPairPermissionsChanged(pub UserPermissionsDto);

#[derive(Debug, Clone)]
pub struct CharaDataReceived(pub CharaDataDto);

#[derive(Debug, Clone)]
pub struct ProfileUpdated {
    pub user: UserData,
}

#[derive(Debug, Clone)]
pub struct UserChatReceived(pub SignedChatMessage);

// --- groups ---

#[derive(Debug, Clone)]
pub struct GroupPermissionsChanged(pub GroupPermissionsDto);

#[derive(Debug, Clone)]
pub struct GroupInfoReceived(pub GroupPermissionsDto);

#[derive(Debug, Clone)]
pub struct GroupFullInfoReceived(pub GroupFullInfoDto);

#[derive(Debug, Clone)]
pub struct GroupDeleted {
    pub group: GroupData,
}

#[derive(Debug, Clone)]
pub struct GroupChatReceived {
    pub group: GroupData,
    pub message: SignedChatMessage,
}

#[derive(Debug, Clone)]
pub struct GroupPairPermissionsChanged(pub GroupUserPermissionsDto);

#[derive(Debug, Clone)]
pub struct GroupPairUserInfoChanged {
    pub group: GroupData,
    pub user: UserData,
}

#[derive(Debug, Clone)]
pub struct GroupPairJoined {
    pub group: GroupData,
    pub user: UserData,
}

#[derive(Debug, Clone)]
pub struct GroupPairLeft {
    pub group: GroupData,
    pub user: UserData,
}

// --- server-wide ---

#[derive(Debug, Clone)]
pub struct ServerMessageReceived(pub ServerMessageDto);

#[derive(Debug, Clone)]
pub struct SystemInfoUpdated(pub SystemInfoDto);

// --- GPose lobby ---

#[derive(Debug, Clone)]
pub struct GposeLobbyUserJoined {
    pub user: UserData,
}

#[derive(Debug, Clone)]
pub struct GposeLobbyUserLeft {
    pub user: UserData,
}

#[derive(Debug, Clone)]
pub struct GposeLobbyCharaData(pub CharaDataDto);

#[derive(Debug, Clone)]
pub struct GposeLobbyPoseData(pub PoseDataDto);

#[derive(Debug, Clone)]
pub struct GposeLobbyWorldData(pub WorldDataDto);
