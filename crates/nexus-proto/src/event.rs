//! The WebSocket event surface.
//!
//! Frames are JSON objects `{"t": "<domain:verb>", "d": {...}}`. Inbound
//! frames decode into [`ClientEvent`]; anything the server emits is a
//! [`ServerEvent`]. Unknown inbound event names decode to
//! [`ClientEvent::Unknown`] and are ignored, so older servers tolerate newer
//! clients.

use crate::model::{
    ChannelKind, DmChannelWire, FriendshipWire, IceServerWire, InvitePeekWire, InviteWire,
    MessageWire, ReportKind, ServerSnapshot, UserProfile, UserStatus, VoicePeerWire, WebhookWire,
};
use crate::perms::Permissions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactOp {
    Add,
    Remove,
}

/// Subject of a per-channel permission override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideSubject {
    Role,
    User,
}

/// Events a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "t", content = "d")]
pub enum ClientEvent {
    // Session
    #[serde(rename = "join")]
    Join { token: String },
    #[serde(rename = "activity:ping")]
    ActivityPing,
    #[serde(rename = "status:set")]
    StatusSet { status: UserStatus },
    #[serde(rename = "settings:update")]
    SettingsUpdate { settings: Value },

    // Channels & history
    #[serde(rename = "channel:join")]
    ChannelJoin { channel_id: String },
    #[serde(rename = "message:fetch")]
    MessageFetch {
        channel_id: String,
        before: Option<String>,
        limit: Option<u32>,
    },

    // Messages
    #[serde(rename = "message:send")]
    MessageSend {
        channel_id: String,
        content: String,
        #[serde(default)]
        reply_to: Option<String>,
        #[serde(default)]
        attachments: Vec<String>,
        #[serde(default)]
        command_data: Option<Value>,
    },
    #[serde(rename = "message:edit")]
    MessageEdit { message_id: String, content: String },
    #[serde(rename = "message:delete")]
    MessageDelete { message_id: String },
    #[serde(rename = "message:react")]
    MessageReact {
        message_id: String,
        emoji: String,
        op: ReactOp,
    },
    #[serde(rename = "typing:start")]
    TypingStart { channel_id: String },

    // Channel/category management
    #[serde(rename = "channel:create")]
    ChannelCreate {
        server_id: String,
        name: String,
        kind: ChannelKind,
        #[serde(default)]
        category_id: Option<String>,
    },
    #[serde(rename = "channel:update")]
    ChannelUpdate {
        channel_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        is_private: Option<bool>,
    },
    #[serde(rename = "channel:delete")]
    ChannelDelete { channel_id: String },
    #[serde(rename = "channel:move")]
    ChannelMove {
        channel_id: String,
        category_id: String,
        #[serde(default)]
        position: Option<i64>,
    },
    #[serde(rename = "channel:reorder")]
    ChannelReorder {
        category_id: String,
        channel_ids: Vec<String>,
    },
    #[serde(rename = "channel:override")]
    ChannelOverrideSet {
        channel_id: String,
        subject_kind: OverrideSubject,
        subject_id: String,
        allow: Permissions,
        deny: Permissions,
    },
    #[serde(rename = "category:create")]
    CategoryCreate { server_id: String, name: String },
    #[serde(rename = "category:reorder")]
    CategoryReorder {
        server_id: String,
        category_ids: Vec<String>,
    },

    // Servers
    #[serde(rename = "server:create")]
    ServerCreate { name: String },
    #[serde(rename = "server:rename")]
    ServerRename { server_id: String, name: String },
    #[serde(rename = "server:delete")]
    ServerDelete { server_id: String },
    #[serde(rename = "server:leave")]
    ServerLeave { server_id: String },

    // Roles
    #[serde(rename = "role:create")]
    RoleCreate {
        server_id: String,
        name: String,
        color: String,
        permissions: Permissions,
    },
    #[serde(rename = "role:update")]
    RoleUpdate {
        server_id: String,
        role_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        color: Option<String>,
        #[serde(default)]
        permissions: Option<Permissions>,
        #[serde(default)]
        position: Option<i64>,
    },
    #[serde(rename = "role:delete")]
    RoleDelete { server_id: String, role_id: String },
    #[serde(rename = "role:assign")]
    RoleAssign {
        server_id: String,
        user_id: String,
        role_id: String,
    },
    #[serde(rename = "role:unassign")]
    RoleUnassign {
        server_id: String,
        user_id: String,
        role_id: String,
    },

    // Moderation
    #[serde(rename = "server:kick-user")]
    KickUser { server_id: String, user_id: String },
    #[serde(rename = "server:ban-user")]
    BanUser { server_id: String, user_id: String },
    #[serde(rename = "server:unban-user")]
    UnbanUser { server_id: String, user_id: String },
    #[serde(rename = "server:timeout-user")]
    TimeoutUser {
        server_id: String,
        user_id: String,
        minutes: i64,
    },

    // Invites
    #[serde(rename = "invite:create")]
    InviteCreate {
        server_id: String,
        #[serde(default)]
        max_uses: Option<i64>,
        #[serde(default)]
        expires_in_ms: Option<i64>,
    },
    #[serde(rename = "invite:peek")]
    InvitePeek { code: String },
    #[serde(rename = "invite:use")]
    InviteUse { code: String },
    #[serde(rename = "invite:revoke")]
    InviteRevoke { code: String },

    // Social graph
    #[serde(rename = "friend:request")]
    FriendRequest { target_username: String },
    #[serde(rename = "friend:accept")]
    FriendAccept { request_id: String },
    #[serde(rename = "friend:reject")]
    FriendReject { request_id: String },
    #[serde(rename = "friend:remove")]
    FriendRemove { user_id: String },
    #[serde(rename = "user:block")]
    BlockUser { user_id: String },
    #[serde(rename = "user:unblock")]
    UnblockUser { user_id: String },
    #[serde(rename = "user:report")]
    ReportUser {
        user_id: String,
        #[serde(default)]
        message_id: Option<String>,
        kind: ReportKind,
        description: String,
    },

    // DMs
    #[serde(rename = "dm:create")]
    DmCreate { target_user_id: String },
    #[serde(rename = "dm:create-group")]
    DmCreateGroup {
        participant_ids: Vec<String>,
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename = "dm:add-participant")]
    DmAddParticipant { channel_id: String, user_id: String },
    #[serde(rename = "dm:remove-participant")]
    DmRemoveParticipant { channel_id: String, user_id: String },
    #[serde(rename = "dm:message-request:accept")]
    DmRequestAccept { channel_id: String },
    #[serde(rename = "dm:message-request:reject")]
    DmRequestReject { channel_id: String },
    #[serde(rename = "dm:mark-read")]
    DmMarkRead { channel_id: String, message_id: String },
    #[serde(rename = "dm:archive")]
    DmArchive { channel_id: String },
    #[serde(rename = "dm:delete")]
    DmDelete { channel_id: String },

    // Voice
    #[serde(rename = "voice:join")]
    VoiceJoin { channel_id: String },
    #[serde(rename = "voice:leave")]
    VoiceLeave,
    #[serde(rename = "voice:mute")]
    VoiceMute { is_muted: bool },
    #[serde(rename = "voice:deafen")]
    VoiceDeafen { is_deafened: bool },
    #[serde(rename = "voice:ice-config")]
    VoiceIceConfig {
        #[serde(default)]
        server_id: Option<String>,
    },
    #[serde(rename = "webrtc:offer")]
    WebrtcOffer { target_id: String, offer: Value },
    #[serde(rename = "webrtc:answer")]
    WebrtcAnswer { target_id: String, answer: Value },
    #[serde(rename = "webrtc:ice")]
    WebrtcIce { target_id: String, candidate: Value },
    #[serde(rename = "screen:start")]
    ScreenStart { channel_id: String },
    #[serde(rename = "screen:stop")]
    ScreenStop,
    #[serde(rename = "screen:watch")]
    ScreenWatch { sharer_id: String },
    #[serde(rename = "screen:unwatch")]
    ScreenUnwatch { sharer_id: String },
    #[serde(rename = "dm:call-start")]
    DmCallStart { channel_id: String },
    #[serde(rename = "dm:call-decline")]
    DmCallDecline { channel_id: String },

    // Webhooks
    #[serde(rename = "webhook:create")]
    WebhookCreate { channel_id: String, name: String },
    #[serde(rename = "webhook:delete")]
    WebhookDelete { webhook_id: String },
    #[serde(rename = "webhook:list")]
    WebhookList { channel_id: String },

    /// Forward-compatibility: event names this server does not know.
    #[serde(other)]
    Unknown,
}

impl ClientEvent {
    /// Stable name for logging and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::ActivityPing => "activity:ping",
            Self::StatusSet { .. } => "status:set",
            Self::SettingsUpdate { .. } => "settings:update",
            Self::ChannelJoin { .. } => "channel:join",
            Self::MessageFetch { .. } => "message:fetch",
            Self::MessageSend { .. } => "message:send",
            Self::MessageEdit { .. } => "message:edit",
            Self::MessageDelete { .. } => "message:delete",
            Self::MessageReact { .. } => "message:react",
            Self::TypingStart { .. } => "typing:start",
            Self::ChannelCreate { .. } => "channel:create",
            Self::ChannelUpdate { .. } => "channel:update",
            Self::ChannelDelete { .. } => "channel:delete",
            Self::ChannelMove { .. } => "channel:move",
            Self::ChannelReorder { .. } => "channel:reorder",
            Self::ChannelOverrideSet { .. } => "channel:override",
            Self::CategoryCreate { .. } => "category:create",
            Self::CategoryReorder { .. } => "category:reorder",
            Self::ServerCreate { .. } => "server:create",
            Self::ServerRename { .. } => "server:rename",
            Self::ServerDelete { .. } => "server:delete",
            Self::ServerLeave { .. } => "server:leave",
            Self::RoleCreate { .. } => "role:create",
            Self::RoleUpdate { .. } => "role:update",
            Self::RoleDelete { .. } => "role:delete",
            Self::RoleAssign { .. } => "role:assign",
            Self::RoleUnassign { .. } => "role:unassign",
            Self::KickUser { .. } => "server:kick-user",
            Self::BanUser { .. } => "server:ban-user",
            Self::UnbanUser { .. } => "server:unban-user",
            Self::TimeoutUser { .. } => "server:timeout-user",
            Self::InviteCreate { .. } => "invite:create",
            Self::InvitePeek { .. } => "invite:peek",
            Self::InviteUse { .. } => "invite:use",
            Self::InviteRevoke { .. } => "invite:revoke",
            Self::FriendRequest { .. } => "friend:request",
            Self::FriendAccept { .. } => "friend:accept",
            Self::FriendReject { .. } => "friend:reject",
            Self::FriendRemove { .. } => "friend:remove",
            Self::BlockUser { .. } => "user:block",
            Self::UnblockUser { .. } => "user:unblock",
            Self::ReportUser { .. } => "user:report",
            Self::DmCreate { .. } => "dm:create",
            Self::DmCreateGroup { .. } => "dm:create-group",
            Self::DmAddParticipant { .. } => "dm:add-participant",
            Self::DmRemoveParticipant { .. } => "dm:remove-participant",
            Self::DmRequestAccept { .. } => "dm:message-request:accept",
            Self::DmRequestReject { .. } => "dm:message-request:reject",
            Self::DmMarkRead { .. } => "dm:mark-read",
            Self::DmArchive { .. } => "dm:archive",
            Self::DmDelete { .. } => "dm:delete",
            Self::VoiceJoin { .. } => "voice:join",
            Self::VoiceLeave => "voice:leave",
            Self::VoiceMute { .. } => "voice:mute",
            Self::VoiceDeafen { .. } => "voice:deafen",
            Self::VoiceIceConfig { .. } => "voice:ice-config",
            Self::WebrtcOffer { .. } => "webrtc:offer",
            Self::WebrtcAnswer { .. } => "webrtc:answer",
            Self::WebrtcIce { .. } => "webrtc:ice",
            Self::ScreenStart { .. } => "screen:start",
            Self::ScreenStop => "screen:stop",
            Self::ScreenWatch { .. } => "screen:watch",
            Self::ScreenUnwatch { .. } => "screen:unwatch",
            Self::DmCallStart { .. } => "dm:call-start",
            Self::DmCallDecline { .. } => "dm:call-decline",
            Self::WebhookCreate { .. } => "webhook:create",
            Self::WebhookDelete { .. } => "webhook:delete",
            Self::WebhookList { .. } => "webhook:list",
            Self::Unknown => "unknown",
        }
    }
}

/// Events the server emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "d")]
pub enum ServerEvent {
    #[serde(rename = "init")]
    Init {
        user: UserProfile,
        settings: Value,
        servers: Vec<ServerSnapshot>,
        dms: Vec<DmChannelWire>,
        friends: Vec<FriendshipWire>,
        online_users: Vec<String>,
        voice_channels: BTreeMap<String, Vec<VoicePeerWire>>,
    },
    #[serde(rename = "error")]
    Error { message: String, kind: String },

    #[serde(rename = "channel:history")]
    ChannelHistory {
        channel_id: String,
        messages: Vec<MessageWire>,
        has_more: bool,
    },
    #[serde(rename = "message:new")]
    MessageNew(Box<MessageWire>),
    #[serde(rename = "message:edited")]
    MessageEdited {
        channel_id: String,
        message_id: String,
        content: String,
        edited_at: DateTime<Utc>,
    },
    #[serde(rename = "message:deleted")]
    MessageDeleted {
        channel_id: String,
        message_id: String,
    },
    #[serde(rename = "message:reaction")]
    MessageReaction {
        channel_id: String,
        message_id: String,
        reactions: BTreeMap<String, Vec<String>>,
    },

    #[serde(rename = "typing:start")]
    TypingStart {
        channel_id: String,
        user_id: String,
        username: String,
    },
    #[serde(rename = "typing:stop")]
    TypingStop { channel_id: String, user_id: String },

    #[serde(rename = "server:updated")]
    ServerUpdated(Box<ServerSnapshot>),
    #[serde(rename = "server:deleted")]
    ServerDeleted { server_id: String },
    #[serde(rename = "user:joined")]
    UserJoined {
        server_id: String,
        user: UserProfile,
        online_users: Vec<String>,
    },
    #[serde(rename = "user:left")]
    UserLeft {
        server_id: String,
        user_id: String,
        online_users: Vec<String>,
    },
    #[serde(rename = "user:updated")]
    UserUpdated(UserProfile),
    #[serde(rename = "user:kicked")]
    UserKicked { server_id: String },
    #[serde(rename = "user:banned")]
    UserBanned { server_id: String },

    #[serde(rename = "invite:created")]
    InviteCreated(InviteWire),
    #[serde(rename = "invite:peek")]
    InvitePeeked(InvitePeekWire),
    #[serde(rename = "invite:joined")]
    InviteJoined { server: Box<ServerSnapshot> },
    #[serde(rename = "invite:revoked")]
    InviteRevoked { code: String },

    #[serde(rename = "friend:request:sent")]
    FriendRequestSent(FriendshipWire),
    #[serde(rename = "friend:request:received")]
    FriendRequestReceived(FriendshipWire),
    #[serde(rename = "friend:accepted")]
    FriendAccepted(FriendshipWire),
    #[serde(rename = "friend:rejected")]
    FriendRejected { request_id: String },
    #[serde(rename = "friend:removed")]
    FriendRemoved { user_id: String },
    #[serde(rename = "user:blocked")]
    UserBlocked { user_id: String },
    #[serde(rename = "user:unblocked")]
    UserUnblocked { user_id: String },
    #[serde(rename = "report:submitted")]
    ReportSubmitted { report_id: String },

    #[serde(rename = "dm:created")]
    DmCreated {
        channel: DmChannelWire,
        messages: Vec<MessageWire>,
    },
    #[serde(rename = "dm:updated")]
    DmUpdated { channel: DmChannelWire },
    #[serde(rename = "dm:unread-counts")]
    DmUnreadCounts { counts: BTreeMap<String, i64> },
    #[serde(rename = "dm:call-incoming")]
    DmCallIncoming {
        channel_id: String,
        caller: UserProfile,
        is_group: bool,
    },
    #[serde(rename = "dm:call-declined")]
    DmCallDeclined { channel_id: String, user_id: String },
    #[serde(rename = "dm:call-ended")]
    DmCallEnded { channel_id: String },

    #[serde(rename = "voice:joined")]
    VoiceJoined {
        channel_id: String,
        peers: Vec<VoicePeerWire>,
        #[serde(skip_serializing_if = "Option::is_none")]
        screen_sharer_id: Option<String>,
    },
    #[serde(rename = "peer:joined")]
    PeerJoined { socket_id: String, user_id: String },
    #[serde(rename = "peer:left")]
    PeerLeft { socket_id: String },
    #[serde(rename = "voice:channel:update")]
    VoiceChannelUpdate {
        channel_id: String,
        peers: Vec<VoicePeerWire>,
    },
    #[serde(rename = "voice:ice-config")]
    VoiceIceConfig { ice_servers: Vec<IceServerWire> },
    #[serde(rename = "webrtc:offer")]
    WebrtcOffer { from: String, offer: Value },
    #[serde(rename = "webrtc:answer")]
    WebrtcAnswer { from: String, answer: Value },
    #[serde(rename = "webrtc:ice")]
    WebrtcIce { from: String, candidate: Value },
    #[serde(rename = "peer:mute:changed")]
    PeerMuteChanged { socket_id: String, is_muted: bool },
    #[serde(rename = "peer:deafen:changed")]
    PeerDeafenChanged {
        socket_id: String,
        is_deafened: bool,
    },
    #[serde(rename = "screen:started")]
    ScreenStarted { socket_id: String },
    #[serde(rename = "screen:stopped")]
    ScreenStopped { socket_id: String },
    #[serde(rename = "screen:add-viewer")]
    ScreenAddViewer { viewer_id: String },
    #[serde(rename = "screen:remove-viewer")]
    ScreenRemoveViewer { viewer_id: String },

    #[serde(rename = "webhook:created")]
    WebhookCreated(WebhookWire),
    #[serde(rename = "webhook:deleted")]
    WebhookDeleted { webhook_id: String },
    #[serde(rename = "webhook:list")]
    WebhookListed { webhooks: Vec<WebhookWire> },
}

impl ServerEvent {
    /// Convenience constructor used by the new-message fan-out path.
    pub fn message_new(message: MessageWire) -> Self {
        Self::MessageNew(Box::new(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frames_decode_by_tag() {
        let frame = r#"{"t":"message:send","d":{"channel_id":"c_1","content":"hi"}}"#;
        let ev: ClientEvent = serde_json::from_str(frame).unwrap();
        match ev {
            ClientEvent::MessageSend {
                channel_id,
                content,
                reply_to,
                attachments,
                ..
            } => {
                assert_eq!(channel_id, "c_1");
                assert_eq!(content, "hi");
                assert!(reply_to.is_none());
                assert!(attachments.is_empty());
            }
            other => panic!("decoded wrong variant: {}", other.name()),
        }
    }

    #[test]
    fn unknown_event_names_are_tolerated() {
        let frame = r#"{"t":"quantum:entangle","d":{"spin":1}}"#;
        let ev: ClientEvent = serde_json::from_str(frame).unwrap();
        assert!(matches!(ev, ClientEvent::Unknown));
    }

    #[test]
    fn outbound_frames_carry_the_event_name() {
        let ev = ServerEvent::Error {
            message: "nope".into(),
            kind: "unauthorized".into(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["t"], "error");
        assert_eq!(v["d"]["kind"], "unauthorized");
    }

    #[test]
    fn react_op_is_lowercase() {
        let frame = r#"{"t":"message:react","d":{"message_id":"m","emoji":"👍","op":"add"}}"#;
        let ev: ClientEvent = serde_json::from_str(frame).unwrap();
        assert!(matches!(
            ev,
            ClientEvent::MessageReact { op: ReactOp::Add, .. }
        ));
    }
}
