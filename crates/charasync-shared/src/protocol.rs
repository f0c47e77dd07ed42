//! Wire protocol between a client and the relay.
//!
//! Three top-level envelopes travel over the session: [`ClientCall`]
//! (client → relay, awaits a [`CallReply`]) and [`ServerEvent`]
//! (relay → client, fire-and-forget push). All payload records here are
//! the authoritative schema; field names and bit positions are contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permissions::{GroupPermissions, GroupUserPermissions, UserPermissions};
use crate::types::{FileHash, GroupData, UserData};

// ---------------------------------------------------------------------------
// Payload records
// ---------------------------------------------------------------------------

/// A user together with one side's pair permission bits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPermissionsDto {
    pub user: UserData,
    pub permissions: UserPermissions,
}

/// Group-level permission update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupPermissionsDto {
    pub group: GroupData,
    pub permissions: GroupPermissions,
}

/// Per-member-in-group permission update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupUserPermissionsDto {
    pub group: GroupData,
    pub user: UserData,
    pub permissions: GroupUserPermissions,
}

/// Full group snapshot as pushed by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupFullInfoDto {
    pub group: GroupData,
    pub owner: UserData,
    pub group_permissions: GroupPermissions,
    pub members: Vec<GroupUserPermissionsDto>,
}

/// Read-only view shared by both transfer descriptor kinds.
pub trait TransferFile {
    fn hash(&self) -> &FileHash;
    fn is_forbidden(&self) -> bool;
    fn forbidden_by(&self) -> &str;
}

/// Relay answer describing one downloadable file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadFileDto {
    pub file_exists: bool,
    pub hash: FileHash,
    pub url: String,
    pub size: u64,
    pub is_forbidden: bool,
    pub forbidden_by: String,
}

impl TransferFile for DownloadFileDto {
    fn hash(&self) -> &FileHash {
        &self.hash
    }

    fn is_forbidden(&self) -> bool {
        self.is_forbidden
    }

    fn forbidden_by(&self) -> &str {
        &self.forbidden_by
    }
}

/// Relay answer describing one file the client offered to upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFileDto {
    pub hash: FileHash,
    pub is_forbidden: bool,
    pub forbidden_by: String,
}

impl TransferFile for UploadFileDto {
    fn hash(&self) -> &FileHash {
        &self.hash
    }

    fn is_forbidden(&self) -> bool {
        self.is_forbidden
    }

    fn forbidden_by(&self) -> &str {
        &self.forbidden_by
    }
}

/// Upload intent declaration: which hashes, visible to which users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesSendDto {
    pub file_hashes: Vec<FileHash>,
    pub uids: Vec<String>,
}

/// Server population snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SystemInfoDto {
    pub online_users: i64,
}

/// Static relay-side limits and addresses, sent once on connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub shard_name: String,
    pub max_group_user_count: u32,
    pub max_groups_created_by_user: u32,
    pub max_groups_joined_by_user: u32,
    pub file_server_address: String,
    pub max_chara_data: u32,
}

/// Handshake result for a successful connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDto {
    pub user: UserData,
    pub current_client_version: String,
    pub server_version: String,
    pub is_admin: bool,
    pub is_moderator: bool,
    pub server_info: ServerInfo,
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthReplyDto {
    pub token: String,
    pub well_known: Option<String>,
}

/// Character appearance payload: an opaque blob plus the asset hashes it
/// references. The engine never interprets `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharaDataDto {
    pub owner: UserData,
    pub description: String,
    pub payload_hashes: Vec<FileHash>,
    pub data: Vec<u8>,
}

/// A chat message with an Ed25519 signature over its canonical bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedChatMessage {
    pub sender: UserData,
    pub sent_at: DateTime<Utc>,
    pub message: String,
    pub signature: Vec<u8>,
}

/// Severity of a server-wide broadcast message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageSeverity {
    Informational,
    Warning,
    Error,
}

/// Server-wide broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMessageDto {
    pub severity: MessageSeverity,
    pub message: String,
}

/// Progress report for an upload the relay is receiving from us.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadStatusDto {
    pub hash: FileHash,
    pub bytes_received: u64,
    pub total_bytes: u64,
}

/// Pose snapshot for the GPose lobby sub-protocol. Opaque to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseDataDto {
    pub owner: UserData,
    pub data: Vec<u8>,
}

/// World placement snapshot for the GPose lobby sub-protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldDataDto {
    pub owner: UserData,
    pub data: Vec<u8>,
}

/// A user profile report filed against another user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileReportDto {
    pub reported: UserData,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Client → relay calls
// ---------------------------------------------------------------------------

/// The fixed catalogue of remote calls. Every variant is answered by a
/// [`CallReply`] or fails with a transport/validation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientCall {
    Register,
    Authenticate { secret_key: String, chara_ident: String },
    Pair { uid: String },
    Unpair { uid: String },
    SetOwnPermissions(UserPermissionsDto),
    SetOtherPermissions(UserPermissionsDto),
    CreateGroup,
    JoinGroup { gid: String, password: String },
    LeaveGroup { gid: String },
    SetGroupPermissions(GroupPermissionsDto),
    SetGroupUserPermissions(GroupUserPermissionsDto),
    SendUserChat { uid: String, message: SignedChatMessage },
    SendGroupChat { gid: String, message: SignedChatMessage },
    RequestDownloadFiles { hashes: Vec<FileHash> },
    DeclareUploadFiles(FilesSendDto),
    ReportProfile(ProfileReportDto),
    PushCharaData { recipients: Vec<String>, data: CharaDataDto },
    GposeLobbyJoin { lobby_id: String },
    GposeLobbyLeave,
    GposeLobbyPushCharaData(CharaDataDto),
    GposeLobbyPushPoseData(PoseDataDto),
    GposeLobbyPushWorldData(WorldDataDto),
}

/// Typed results for [`ClientCall`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CallReply {
    Ack,
    Denied { reason: String },
    Auth(AuthReplyDto),
    Connection(ConnectionDto),
    DownloadFiles(Vec<DownloadFileDto>),
    UploadFiles(Vec<UploadFileDto>),
    GroupCreated(GroupFullInfoDto),
    GroupJoined(GroupFullInfoDto),
}

// ---------------------------------------------------------------------------
// Relay → client push events
// ---------------------------------------------------------------------------

/// The fixed catalogue of events the relay may push. Each is fanned out
/// to the local subscribers registered for its kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerEvent {
    /// Previously-requested files are ready on the file server.
    DownloadReady { hashes: Vec<FileHash> },
    GroupChangePermissions(GroupPermissionsDto),
    GroupChatMessage { group: GroupData, message: SignedChatMessage },
    GroupDelete { group: GroupData },
    GroupPairChangePermissions(GroupUserPermissionsDto),
    GroupPairChangeUserInfo { group: GroupData, user: UserData },
    GroupPairJoined { group: GroupData, user: UserData },
    GroupPairLeft { group: GroupData, user: UserData },
    GroupSendFullInfo(GroupFullInfoDto),
    GroupSendInfo(GroupPermissionsDto),
    ReceiveServerMessage(ServerMessageDto),
    UpdateSystemInfo(SystemInfoDto),
    UserAddClientPair(UserPermissionsDto),
    UserRemoveClientPair { user: UserData },
    UserChatMessage(SignedChatMessage),
    UserReceiveCharaData(CharaDataDto),
    UserUpdateProfile { user: UserData },
    UserSendOffline { user: UserData },
    UserSendOnline { user: UserData, ident: String },
    UserUpdateSelfPairPermissions(UserPermissionsDto),
    UserUpdateOtherPairPermissions(UserPermissionsDto),
    UploadStatus(UploadStatusDto),
    GposeLobbyJoin { user: UserData },
    GposeLobbyLeave { user: UserData },
    GposeLobbyPushCharaData(CharaDataDto),
    GposeLobbyPushPoseData(PoseDataDto),
    GposeLobbyPushWorldData(WorldDataDto),
}

// ---------------------------------------------------------------------------
// Binary envelope
// ---------------------------------------------------------------------------

impl ClientCall {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

impl CallReply {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

impl ServerEvent {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
