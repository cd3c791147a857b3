//! Effective-permission resolution.
//!
//! `resolve` is the pure core: owner shortcut, role-union, `administrator`
//! shortcut, channel overrides in {role-allow, role-deny, user-allow,
//! user-deny} order, the `VIEW_CHANNEL` mask, and timeout stripping. The
//! async engine feeds it from the store.

use crate::error::{AppError, AppResult};
use crate::store::{OverrideRow, RoleRow, Store};
use chrono::Utc;
use nexus_proto::Permissions;

/// Inputs to one resolution, already loaded from the store.
#[derive(Debug, Default)]
pub struct ResolutionInput<'a> {
    pub is_owner: bool,
    /// Every role the member holds, `@everyone` included.
    pub roles: &'a [RoleRow],
    /// Overrides of the channel in question, if any.
    pub overrides: &'a [OverrideRow],
    pub user_id: &'a str,
    pub timeout_active: bool,
}

/// Compute the member's effective permission set.
pub fn resolve(input: &ResolutionInput<'_>) -> Permissions {
    if input.is_owner {
        return Permissions::all();
    }

    let mut effective = input
        .roles
        .iter()
        .fold(Permissions::empty(), |acc, role| acc | role.permission_bits());

    if effective.contains(Permissions::ADMINISTRATOR) {
        return Permissions::all();
    }

    // Channel overrides: role allow, role deny, user allow, user deny.
    let held_role: Vec<&str> = input.roles.iter().map(|r| r.id.as_str()).collect();
    for pass in ["role", "user"] {
        let mut allow = Permissions::empty();
        let mut deny = Permissions::empty();
        for over in input.overrides {
            if over.subject_kind != pass {
                continue;
            }
            let applies = match pass {
                "role" => held_role.contains(&over.subject_id.as_str()),
                _ => over.subject_id == input.user_id,
            };
            if applies {
                allow |= over.allow();
                deny |= over.deny();
            }
        }
        effective |= allow;
        effective &= !deny;
    }

    // A channel the member cannot view masks every other action there.
    if !input.overrides.is_empty() && !effective.contains(Permissions::VIEW_CHANNEL) {
        return Permissions::empty();
    }

    if input.timeout_active {
        effective &= !Permissions::stripped_by_timeout();
    }

    effective
}

pub struct PermissionEngine {
    store: Store,
}

impl PermissionEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Can `user_id` perform `action` on `server_id`, optionally scoped to a
    /// channel? Non-members can do nothing.
    pub async fn can(
        &self,
        user_id: &str,
        server_id: &str,
        channel_id: Option<&str>,
        action: Permissions,
    ) -> AppResult<bool> {
        Ok(self
            .effective(user_id, server_id, channel_id)
            .await?
            .contains(action))
    }

    /// Effective permission set, `Permissions::empty()` for non-members.
    pub async fn effective(
        &self,
        user_id: &str,
        server_id: &str,
        channel_id: Option<&str>,
    ) -> AppResult<Permissions> {
        let servers = self.store.servers();
        let server = servers.by_id(server_id).await?;

        if server.owner_id == user_id {
            return Ok(Permissions::all());
        }

        let Some(membership) = servers.membership(server_id, user_id).await? else {
            return Ok(Permissions::empty());
        };

        let roles = servers.roles_of_member(server_id, user_id).await?;
        let overrides = match channel_id {
            Some(channel_id) => servers.overrides_of_channel(channel_id).await?,
            None => Vec::new(),
        };
        let timeout_active = membership
            .timeout_until
            .is_some_and(|until| until > Utc::now().timestamp());

        // The VIEW_CHANNEL mask applies whenever a channel is in scope, even
        // without overrides.
        let mut effective = resolve(&ResolutionInput {
            is_owner: false,
            roles: &roles,
            overrides: &overrides,
            user_id,
            timeout_active,
        });
        if channel_id.is_some() && !effective.contains(Permissions::VIEW_CHANNEL) {
            effective = Permissions::empty();
        }
        Ok(effective)
    }

    /// `can` that maps denial to `unauthorized`.
    pub async fn require(
        &self,
        user_id: &str,
        server_id: &str,
        channel_id: Option<&str>,
        action: Permissions,
    ) -> AppResult<()> {
        if self.can(user_id, server_id, channel_id, action).await? {
            Ok(())
        } else {
            Err(AppError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(id: &str, bits: Permissions, position: i64) -> RoleRow {
        RoleRow {
            id: id.into(),
            server_id: "s_1".into(),
            name: id.into(),
            color: "#fff".into(),
            permissions: i64::from(bits.bits()),
            position,
            is_everyone: i64::from(position == 0),
        }
    }

    fn over(kind: &str, subject: &str, allow: Permissions, deny: Permissions) -> OverrideRow {
        OverrideRow {
            channel_id: "c_1".into(),
            subject_kind: kind.into(),
            subject_id: subject.into(),
            allow_bits: i64::from(allow.bits()),
            deny_bits: i64::from(deny.bits()),
        }
    }

    #[test]
    fn owner_short_circuits() {
        let resolved = resolve(&ResolutionInput {
            is_owner: true,
            roles: &[],
            overrides: &[],
            user_id: "u_1",
            timeout_active: false,
        });
        assert!(resolved.contains(Permissions::MANAGE_SERVER));
    }

    #[test]
    fn administrator_short_circuits() {
        let roles = [role("r_admin", Permissions::ADMINISTRATOR, 3)];
        let resolved = resolve(&ResolutionInput {
            is_owner: false,
            roles: &roles,
            overrides: &[],
            user_id: "u_1",
            timeout_active: false,
        });
        assert!(resolved.contains(Permissions::BAN_MEMBERS));
    }

    #[test]
    fn role_union_applies() {
        let roles = [
            role("r_everyone", Permissions::everyone_default(), 0),
            role("r_mod", Permissions::KICK_MEMBERS, 2),
        ];
        let resolved = resolve(&ResolutionInput {
            is_owner: false,
            roles: &roles,
            overrides: &[],
            user_id: "u_1",
            timeout_active: false,
        });
        assert!(resolved.contains(Permissions::KICK_MEMBERS));
        assert!(resolved.contains(Permissions::SEND_MESSAGES));
        assert!(!resolved.contains(Permissions::BAN_MEMBERS));
    }

    #[test]
    fn user_deny_beats_role_allow() {
        let roles = [role("r_everyone", Permissions::everyone_default(), 0)];
        let overrides = [
            over("role", "r_everyone", Permissions::SEND_MESSAGES, Permissions::empty()),
            over("user", "u_1", Permissions::empty(), Permissions::SEND_MESSAGES),
        ];
        let resolved = resolve(&ResolutionInput {
            is_owner: false,
            roles: &roles,
            overrides: &overrides,
            user_id: "u_1",
            timeout_active: false,
        });
        assert!(!resolved.contains(Permissions::SEND_MESSAGES));
        assert!(resolved.contains(Permissions::VIEW_CHANNEL));
    }

    #[test]
    fn view_channel_deny_masks_everything() {
        let roles = [role("r_everyone", Permissions::everyone_default(), 0)];
        let overrides = [over(
            "user",
            "u_1",
            Permissions::empty(),
            Permissions::VIEW_CHANNEL,
        )];
        let resolved = resolve(&ResolutionInput {
            is_owner: false,
            roles: &roles,
            overrides: &overrides,
            user_id: "u_1",
            timeout_active: false,
        });
        assert_eq!(resolved, Permissions::empty());
    }

    #[test]
    fn timeout_strips_send_and_voice() {
        let roles = [role("r_everyone", Permissions::everyone_default(), 0)];
        let resolved = resolve(&ResolutionInput {
            is_owner: false,
            roles: &roles,
            overrides: &[],
            user_id: "u_1",
            timeout_active: true,
        });
        assert!(!resolved.contains(Permissions::SEND_MESSAGES));
        assert!(!resolved.contains(Permissions::CONNECT_VOICE));
        assert!(resolved.contains(Permissions::VIEW_CHANNEL));
    }
}
