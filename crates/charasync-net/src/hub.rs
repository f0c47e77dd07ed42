//! Hub event router: bidirectional typed dispatch over the session.
//!
//! Inbound, [`dispatch_event`] fans each relay push out to the bus as its
//! own typed event, on whatever task the transport delivers on — handlers
//! must not block it. Outbound, [`HubClient`] wraps the connection command
//! channel with one typed method per remote call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use charasync_shared::protocol::{
    AuthReplyDto, CallReply, CharaDataDto, ClientCall, DownloadFileDto, FilesSendDto,
    GroupFullInfoDto, GroupPermissionsDto, GroupUserPermissionsDto, PoseDataDto, ProfileReportDto,
    SignedChatMessage, UploadFileDto, UserPermissionsDto, WorldDataDto,
};
use charasync_shared::types::FileHash;
use charasync_shared::ServerEvent;

use crate::bus::EventBus;
use crate::connection::ConnectionCommand;
use crate::error::NetError;
use crate::events;
use crate::transport::SessionCall;

/// Fan one inbound relay push out to the subscribers for its kind.
pub fn dispatch_event(bus: &Arc<EventBus>, event: ServerEvent) {
    debug!(kind = event_kind(&event), "Dispatching relay event");

    match event {
        ServerEvent::DownloadReady { hashes } => bus.publish(&events::DownloadReady { hashes }),
        ServerEvent::GroupChangePermissions(dto) => {
            bus.publish(&events::GroupPermissionsChanged(dto))
        }
        ServerEvent::GroupChatMessage { group, message } => {
            bus.publish(&events::GroupChatReceived { group, message })
        }
        ServerEvent::GroupDelete { group } => bus.publish(&events::GroupDeleted { group }),
        ServerEvent::GroupPairChangePermissions(dto) => {
            bus.publish(&events::GroupPairPermissionsChanged(dto))
        }
        ServerEvent::GroupPairChangeUserInfo { group, user } => {
            bus.publish(&events::GroupPairUserInfoChanged { group, user })
        }
        ServerEvent::GroupPairJoined { group, user } => {
            bus.publish(&events::GroupPairJoined { group, user })
        }
        ServerEvent::GroupPairLeft { group, user } => {
            bus.publish(&events::GroupPairLeft { group, user })
        }
        ServerEvent::GroupSendFullInfo(dto) => bus.publish(&events::GroupFullInfoReceived(dto)),
        ServerEvent::GroupSendInfo(dto) => bus.publish(&events::GroupInfoReceived(dto)),
        ServerEvent::ReceiveServerMessage(dto) => bus.publish(&events::ServerMessageReceived(dto)),
        ServerEvent::UpdateSystemInfo(dto) => bus.publish(&events::SystemInfoUpdated(dto)),
        ServerEvent::UserAddClientPair(dto) => bus.publish(&events::PairAdded(dto)),
        ServerEvent::UserRemoveClientPair { user } => bus.publish(&events::PairRemoved { user }),
        ServerEvent::UserChatMessage(msg) => bus.publish(&events::UserChatReceived(msg)),
        ServerEvent::UserReceiveCharaData(dto) => bus.publish(&events::CharaDataReceived(dto)),
        ServerEvent::UserUpdateProfile { user } => bus.publish(&events::ProfileUpdated { user }),
        ServerEvent::UserSendOffline { user } => bus.publish(&events::UserOffline { user }),
        ServerEvent::UserSendOnline { user, ident } => {
            bus.publish(&events::UserOnline { user, ident })
        }
        ServerEvent::UserUpdateSelfPairPermissions(dto) => {
            bus.publish(&events::SelfPairPermissionsChanged(dto))
        }
        ServerEvent::UserUpdateOtherPairPermissions(dto) => {
            bus.publish(&events::OtherPairPermissionsChanged(dto))
        }
        ServerEvent::UploadStatus(dto) => bus.publish(&events::UploadStatusChanged(dto)),
        ServerEvent::GposeLobbyJoin { user } => bus.publish(&events::GposeLobbyUserJoined { user }),
        ServerEvent::GposeLobbyLeave { user } => bus.publish(&events::GposeLobbyUserLeft { user }),
        ServerEvent::GposeLobbyPushCharaData(dto) => bus.publish(&events::GposeLobbyCharaData(dto)),
        ServerEvent::GposeLobbyPushPoseData(dto) => bus.publish(&events::GposeLobbyPoseData(dto)),
        ServerEvent::GposeLobbyPushWorldData(dto) => bus.publish(&events::GposeLobbyWorldData(dto)),
    }
}

fn event_kind(event: &ServerEvent) -> &'static str {
    match event {
        ServerEvent::DownloadReady { .. } => "DownloadReady",
        ServerEvent::GroupChangePermissions(_) => "GroupChangePermissions",
        ServerEvent::GroupChatMessage { .. } => "GroupChatMessage",
        ServerEvent::GroupDelete { .. } => "GroupDelete",
        ServerEvent::GroupPairChangePermissions(_) => "GroupPairChangePermissions",
        ServerEvent::GroupPairChangeUserInfo { .. } => "GroupPairChangeUserInfo",
        ServerEvent::GroupPairJoined { .. } => "GroupPairJoined",
        ServerEvent::GroupPairLeft { .. } => "GroupPairLeft",
        ServerEvent::GroupSendFullInfo(_) => "GroupSendFullInfo",
        ServerEvent::GroupSendInfo(_) => "GroupSendInfo",
        ServerEvent::ReceiveServerMessage(_) => "ReceiveServerMessage",
        ServerEvent::UpdateSystemInfo(_) => "UpdateSystemInfo",
        ServerEvent::UserAddClientPair(_) => "UserAddClientPair",
        ServerEvent::UserRemoveClientPair { .. } => "UserRemoveClientPair",
        ServerEvent::UserChatMessage(_) => "UserChatMessage",
        ServerEvent::UserReceiveCharaData(_) => "UserReceiveCharaData",
        ServerEvent::UserUpdateProfile { .. } => "UserUpdateProfile",
        ServerEvent::UserSendOffline { .. } => "UserSendOffline",
        ServerEvent::UserSendOnline { .. } => "UserSendOnline",
        ServerEvent::UserUpdateSelfPairPermissions(_) => "UserUpdateSelfPairPermissions",
        ServerEvent::UserUpdateOtherPairPermissions(_) => "UserUpdateOtherPairPermissions",
        ServerEvent::UploadStatus(_) => "UploadStatus",
        ServerEvent::GposeLobbyJoin { .. } => "GposeLobbyJoin",
        ServerEvent::GposeLobbyLeave { .. } => "GposeLobbyLeave",
        ServerEvent::GposeLobbyPushCharaData(_) => "GposeLobbyPushCharaData",
        ServerEvent::GposeLobbyPushPoseData(_) => "GposeLobbyPushPoseData",
        ServerEvent::GposeLobbyPushWorldData(_) => "GposeLobbyPushWorldData",
    }
}

/// Typed outbound call surface. Cheap to clone; every method is one relay
/// round-trip with the configured timeout.
#[derive(Clone)]
pub struct HubClient {
    cmd_tx: mpsc::Sender<ConnectionCommand>,
    call_timeout: Duration,
}

impl HubClient {
    pub fn new(cmd_tx: mpsc::Sender<ConnectionCommand>, call_timeout: Duration) -> Self {
        Self {
            cmd_tx,
            call_timeout,
        }
    }

    async fn call(&self, call: ClientCall) -> Result<CallReply, NetError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConnectionCommand::Call(SessionCall {
                call,
                reply: reply_tx,
            }))
            .await
            .map_err(|_| NetError::ChannelClosed)?;

        // Exceeding the per-call timeout is a localized failure, not a
        // session loss; the transport reports loss separately.
        match tokio::time::timeout(self.call_timeout, reply_rx).await {
            Err(_) => Err(NetError::CallTimeout),
            Ok(Err(_)) => Err(NetError::ChannelClosed),
            Ok(Ok(result)) => result,
        }
    }

    async fn call_ack(&self, call: ClientCall) -> Result<(), NetError> {
        match self.call(call).await? {
            CallReply::Ack => Ok(()),
            CallReply::Denied { reason } => Err(NetError::Denied(reason)),
            _ => Err(NetError::UnexpectedReply),
        }
    }

    pub async fn register(&self) -> Result<AuthReplyDto, NetError> {
        match self.call(ClientCall::Register).await? {
            CallReply::Auth(reply) => Ok(reply),
            CallReply::Denied { reason } => Err(NetError::Denied(reason)),
            _ => Err(NetError::UnexpectedReply),
        }
    }

    pub async fn authenticate(
        &self,
        secret_key: String,
        chara_ident: String,
    ) -> Result<AuthReplyDto, NetError> {
        match self
            .call(ClientCall::Authenticate {
                secret_key,
                chara_ident,
            })
            .await?
        {
            CallReply::Auth(reply) => Ok(reply),
            CallReply::Denied { reason } => Err(NetError::Denied(reason)),
            _ => Err(NetError::UnexpectedReply),
        }
    }

    pub async fn pair(&self, uid: impl Into<String>) -> Result<(), NetError> {
        self.call_ack(ClientCall::Pair { uid: uid.into() }).await
    }

    pub async fn unpair(&self, uid: impl Into<String>) -> Result<(), NetError> {
        self.call_ack(ClientCall::Unpair { uid: uid.into() }).await
    }

    pub async fn set_own_permissions(&self, dto: UserPermissionsDto) -> Result<(), NetError> {
        self.call_ack(ClientCall::SetOwnPermissions(dto)).await
    }

    pub async fn set_other_permissions(&self, dto: UserPermissionsDto) -> Result<(), NetError> {
        self.call_ack(ClientCall::SetOtherPermissions(dto)).await
    }

    pub async fn create_group(&self) -> Result<GroupFullInfoDto, NetError> {
        match self.call(ClientCall::CreateGroup).await? {
            CallReply::GroupCreated(info) => Ok(info),
            CallReply::Denied { reason } => Err(NetError::Denied(reason)),
            _ => Err(NetError::UnexpectedReply),
        }
    }

    pub async fn join_group(
        &self,
        gid: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<GroupFullInfoDto, NetError> {
        match self
            .call(ClientCall::JoinGroup {
                gid: gid.into(),
                password: password.into(),
            })
            .await?
        {
            CallReply::GroupJoined(info) => Ok(info),
            CallReply::Denied { reason } => Err(NetError::Denied(reason)),
            _ => Err(NetError::UnexpectedReply),
        }
    }

    pub async fn leave_group(&self, gid: impl Into<String>) -> Result<(), NetError> {
        self.call_ack(ClientCall::LeaveGroup { gid: gid.into() }).await
    }

    pub async fn set_group_permissions(&self, dto: GroupPermissionsDto) -> Result<(), NetError> {
        self.call_ack(ClientCall::SetGroupPermissions(dto)).await
    }

    pub async fn set_group_user_permissions(
        &self,
        dto: GroupUserPermissionsDto,
    ) -> Result<(), NetError> {
        self.call_ack(ClientCall::SetGroupUserPermissions(dto)).await
    }

    pub async fn send_user_chat(
        &self,
        uid: impl Into<String>,
        message: SignedChatMessage,
    ) -> Result<(), NetError> {
        self.call_ack(ClientCall::SendUserChat {
            uid: uid.into(),
            message,
        })
        .await
    }

    pub async fn send_group_chat(
        &self,
        gid: impl Into<String>,
        message: SignedChatMessage,
    ) -> Result<(), NetError> {
        self.call_ack(ClientCall::SendGroupChat {
            gid: gid.into(),
            message,
        })
        .await
    }

    /// Ask the relay for download descriptors for the given hashes.
    pub async fn request_download_files(
        &self,
        hashes: Vec<FileHash>,
    ) -> Result<Vec<DownloadFileDto>, NetError> {
        match self.call(ClientCall::RequestDownloadFiles { hashes }).await? {
            CallReply::DownloadFiles(files) => Ok(files),
            CallReply::Denied { reason } => Err(NetError::Denied(reason)),
            _ => Err(NetError::UnexpectedReply),
        }
    }

    /// Declare upload intent. The reply lists only the hashes the relay
    /// wants bytes for; hashes already stored server-side are absent.
    pub async fn declare_upload_files(
        &self,
        dto: FilesSendDto,
    ) -> Result<Vec<UploadFileDto>, NetError> {
        match self.call(ClientCall::DeclareUploadFiles(dto)).await? {
            CallReply::UploadFiles(files) => Ok(files),
            CallReply::Denied { reason } => Err(NetError::Denied(reason)),
            _ => Err(NetError::UnexpectedReply),
        }
    }

    pub async fn report_profile(&self, dto: ProfileReportDto) -> Result<(), NetError> {
        self.call_ack(ClientCall::ReportProfile(dto)).await
    }

    pub async fn push_chara_data(
        &self,
        recipients: Vec<String>,
        data: CharaDataDto,
    ) -> Result<(), NetError> {
        self.call_ack(ClientCall::PushCharaData { recipients, data })
            .await
    }

    pub async fn gpose_lobby_join(&self, lobby_id: impl Into<String>) -> Result<(), NetError> {
        self.call_ack(ClientCall::GposeLobbyJoin {
            lobby_id: lobby_id.into(),
        })
        .await
    }

    pub async fn gpose_lobby_leave(&self) -> Result<(), NetError> {
        self.call_ack(ClientCall::GposeLobbyLeave).await
    }

    pub async fn gpose_push_chara_data(&self, dto: CharaDataDto) -> Result<(), NetError> {
        self.call_ack(ClientCall::GposeLobbyPushCharaData(dto)).await
    }

    pub async fn gpose_push_pose_data(&self, dto: PoseDataDto) -> Result<(), NetError> {
        self.call_ack(ClientCall::GposeLobbyPushPoseData(dto)).await
    }

    pub async fn gpose_push_world_data(&self, dto: WorldDataDto) -> Result<(), NetError> {
        self.call_ack(ClientCall::GposeLobbyPushWorldData(dto)).await
    }
}
