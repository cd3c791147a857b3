//! Data-transfer models carried inside events.
//!
//! These are the shapes clients see. The server's store rows are mapped into
//! these before anything leaves the process; store internals never leak.

use crate::perms::Permissions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Aggregate online state of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Idle,
    Dnd,
    Offline,
}

impl Default for UserStatus {
    fn default() -> Self {
        Self::Offline
    }
}

/// Public profile of a user, as embedded in rosters and messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub status: UserStatus,
    pub color: String,
    /// Single-glyph fallback avatar.
    pub avatar: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_avatar: Option<String>,
}

/// Channel flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    Text,
    Voice,
    Dm,
    GroupDm,
}

impl ChannelKind {
    pub fn is_dm(self) -> bool {
        matches!(self, Self::Dm | Self::GroupDm)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelWire {
    pub id: String,
    pub kind: ChannelKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_private: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryWire {
    pub id: String,
    pub name: String,
    pub position: i64,
    /// Channels in category order.
    pub channels: Vec<ChannelWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleWire {
    pub id: String,
    pub name: String,
    pub color: String,
    pub permissions: Permissions,
    pub position: i64,
    pub is_everyone: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberWire {
    pub user: UserProfile,
    pub joined_at: DateTime<Utc>,
    pub role_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_until: Option<DateTime<Utc>>,
}

/// Full server snapshot, fanned out on every structural mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub is_personal: bool,
    pub categories: Vec<CategoryWire>,
    pub roles: Vec<RoleWire>,
    pub members: Vec<MemberWire>,
}

/// Message author: a user, or a webhook acting as a first-class author.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Author {
    User {
        id: String,
    },
    Webhook {
        id: String,
        display_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        avatar: Option<String>,
    },
}

impl Author {
    /// User id when the author is a user.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::User { id } => Some(id),
            Self::Webhook { .. } => None,
        }
    }
}

/// Custom-emoji token `:name:serverId:emojiId:` extracted from content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEmojiWire {
    pub name: String,
    pub server_id: String,
    pub emoji_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mentions {
    pub everyone: bool,
    pub users: Vec<String>,
    pub roles: Vec<String>,
}

impl Mentions {
    pub fn is_empty(&self) -> bool {
        !self.everyone && self.users.is_empty() && self.roles.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageWire {
    pub id: String,
    pub channel_id: String,
    pub author: Author,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub mentions: Mentions,
    pub channel_links: Vec<String>,
    pub custom_emojis: Vec<CustomEmojiWire>,
    pub embeds: Vec<Value>,
    pub attachments: Vec<String>,
    /// emoji -> user ids, in stable order.
    pub reactions: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteWire {
    pub code: String,
    pub server_id: String,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_uses: Option<i64>,
    pub uses: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// What an unauthenticated (or any) client learns when peeking an invite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitePeekWire {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<InvitePeekServer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitePeekServer {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub member_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipState {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendshipWire {
    pub id: String,
    pub requester: UserProfile,
    pub target: UserProfile,
    pub state: FriendshipState,
}

/// DM channel entry: `request` channels live in the target's requests pane
/// until accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmState {
    Open,
    Request,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmChannelWire {
    pub channel: ChannelWire,
    pub participants: Vec<UserProfile>,
    pub state: DmState,
    pub archived: bool,
    pub unread: i64,
}

/// Voice roster entry as seen by peers and sidebars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoicePeerWire {
    pub socket_id: String,
    pub user_id: String,
    pub username: String,
    pub is_muted: bool,
    pub is_deafened: bool,
    pub screen_sharing: bool,
}

/// One entry of the ICE configuration hand-off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerWire {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookWire {
    pub id: String,
    pub channel_id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Present exactly once: in the `webhook:created` reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Spam,
    Harassment,
    Inappropriate,
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_tags_distinguish_user_and_webhook() {
        let user = serde_json::to_value(Author::User { id: "u_1".into() }).unwrap();
        assert_eq!(user["kind"], "user");

        let hook = serde_json::to_value(Author::Webhook {
            id: "wh".into(),
            display_name: "CI".into(),
            avatar: None,
        })
        .unwrap();
        assert_eq!(hook["kind"], "webhook");
        assert_eq!(hook["display_name"], "CI");
    }

    #[test]
    fn channel_kind_wire_names() {
        assert_eq!(serde_json::to_string(&ChannelKind::GroupDm).unwrap(), "\"group-dm\"");
        assert_eq!(serde_json::to_string(&ChannelKind::Text).unwrap(), "\"text\"");
    }

    #[test]
    fn dm_kinds_are_dm() {
        assert!(ChannelKind::Dm.is_dm());
        assert!(ChannelKind::GroupDm.is_dm());
        assert!(!ChannelKind::Voice.is_dm());
    }
}
