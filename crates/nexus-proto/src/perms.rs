//! Permission bit-set shared between the store, the permission engine and
//! the wire.
//!
//! Roles combine permissions via OR; channel overrides carry separate
//! allow/deny masks layered on top. `ADMINISTRATOR` and server ownership
//! short-circuit every check.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Server- and channel-level permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Permissions: u32 {
        /// Edit server name/icon, delete the server.
        const MANAGE_SERVER     = 1 << 0;
        /// Create/update/delete/reorder channels and categories.
        const MANAGE_CHANNELS   = 1 << 1;
        /// Role CRUD and assignment below own highest role.
        const MANAGE_ROLES      = 1 << 2;
        /// Delete other users' messages.
        const MANAGE_MESSAGES   = 1 << 3;
        const KICK_MEMBERS      = 1 << 4;
        const BAN_MEMBERS       = 1 << 5;
        const TIMEOUT_MEMBERS   = 1 << 6;
        const CREATE_INVITE     = 1 << 7;
        const MANAGE_WEBHOOKS   = 1 << 8;
        /// Mention @everyone without demotion to plain text.
        const MENTION_EVERYONE  = 1 << 9;
        /// Gate for every other in-channel action.
        const VIEW_CHANNEL      = 1 << 10;
        const SEND_MESSAGES     = 1 << 11;
        const CONNECT_VOICE     = 1 << 12;
        const SPEAK             = 1 << 13;
        const SCREEN_SHARE      = 1 << 14;
        const VIEW_REPORTS      = 1 << 15;
        /// Short-circuits every check except ownership transfer.
        const ADMINISTRATOR     = 1 << 16;
        const ADD_REACTION      = 1 << 17;
    }
}

impl Permissions {
    /// Baseline grant carried by the `@everyone` role of a fresh server.
    pub fn everyone_default() -> Self {
        Self::VIEW_CHANNEL
            | Self::SEND_MESSAGES
            | Self::ADD_REACTION
            | Self::CONNECT_VOICE
            | Self::SPEAK
            | Self::SCREEN_SHARE
            | Self::CREATE_INVITE
    }

    /// Permissions an active timeout strips until expiry.
    pub fn stripped_by_timeout() -> Self {
        Self::SEND_MESSAGES | Self::SPEAK | Self::CONNECT_VOICE | Self::ADD_REACTION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everyone_default_cannot_moderate() {
        let base = Permissions::everyone_default();
        assert!(base.contains(Permissions::SEND_MESSAGES));
        assert!(!base.contains(Permissions::MANAGE_CHANNELS));
        assert!(!base.contains(Permissions::ADMINISTRATOR));
    }

    #[test]
    fn timeout_strip_covers_voice_and_text() {
        let stripped = Permissions::stripped_by_timeout();
        assert!(stripped.contains(Permissions::SEND_MESSAGES));
        assert!(stripped.contains(Permissions::CONNECT_VOICE));
        assert!(!stripped.contains(Permissions::VIEW_CHANNEL));
    }

    #[test]
    fn bits_round_trip_through_store_representation() {
        let perms = Permissions::MANAGE_SERVER | Permissions::BAN_MEMBERS;
        let raw = perms.bits();
        assert_eq!(Permissions::from_bits_truncate(raw), perms);
    }
}
