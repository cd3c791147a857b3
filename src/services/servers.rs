//! Server lifecycle, roles, moderation and invites.

use crate::error::{AppError, AppResult};
use crate::state::{Hub, server_key, user_key};
use crate::store::ServerRow;
use nexus_proto::Permissions;
use nexus_proto::ServerEvent;
use nexus_proto::id::{entity_id, invite_code};
use nexus_proto::model::{InvitePeekServer, InvitePeekWire, ServerSnapshot};
use tracing::info;

/// Timeout bounds in minutes: one minute to one week.
const TIMEOUT_RANGE_MINS: std::ops::RangeInclusive<i64> = 1..=10_080;

/// `server:create` - provisions the default layout and subscribes the
/// creator's sockets.
pub async fn create_server(hub: &Hub, user_id: &str, name: &str) -> AppResult<ServerSnapshot> {
    let name = name.trim();
    if name.is_empty() || name.len() > 64 {
        return Err(AppError::Validation("server name must be 1-64 characters".into()));
    }

    let server_id = entity_id("s");
    hub.store
        .servers()
        .provision(
            &server_id,
            name,
            user_id,
            &entity_id("r"),
            &entity_id("cat"),
            &entity_id("c"),
            &entity_id("c"),
        )
        .await?;

    super::subscribe_user_sockets(hub, user_id, &server_key(&server_id));
    info!(server = %server_id, owner = %user_id, name = %name, "server created");
    super::broadcast_server_update(hub, &server_id).await
}

/// `server:rename`.
pub async fn rename_server(hub: &Hub, user_id: &str, server_id: &str, name: &str) -> AppResult<()> {
    let name = name.trim();
    if name.is_empty() || name.len() > 64 {
        return Err(AppError::Validation("server name must be 1-64 characters".into()));
    }
    not_personal(hub, server_id).await?;
    hub.perms
        .require(user_id, server_id, None, Permissions::MANAGE_SERVER)
        .await?;
    hub.store.servers().rename(server_id, name).await?;
    super::broadcast_server_update(hub, server_id).await?;
    Ok(())
}

/// `server:delete` - owner only.
pub async fn delete_server(hub: &Hub, user_id: &str, server_id: &str) -> AppResult<()> {
    let server = load(hub, server_id).await?;
    if server.owner_id != user_id {
        return Err(AppError::Unauthorized);
    }
    if server.is_personal != 0 {
        return Err(AppError::Validation("the personal server cannot be deleted".into()));
    }

    hub.store.servers().archive(server_id).await?;
    hub.rooms.emit_to(
        &server_key(server_id),
        &ServerEvent::ServerDeleted {
            server_id: server_id.to_string(),
        },
    );
    info!(server = %server_id, "server deleted");
    Ok(())
}

/// `server:leave`. An owner leaving hands the server to the longest-joined
/// administrator; with no candidate the server is archived.
pub async fn leave_server(hub: &Hub, user_id: &str, server_id: &str) -> AppResult<()> {
    let server = load(hub, server_id).await?;
    if server.is_personal != 0 {
        return Err(AppError::Validation("the personal server cannot be left".into()));
    }
    if !hub.store.servers().is_member(server_id, user_id).await? {
        return Err(AppError::NotFound("membership"));
    }

    if server.owner_id == user_id {
        match hub
            .store
            .servers()
            .longest_joined_admin(server_id, user_id)
            .await?
        {
            Some(heir) => {
                hub.store.servers().set_owner(server_id, &heir).await?;
                info!(server = %server_id, from = %user_id, to = %heir, "ownership transferred");
            }
            None => {
                hub.store.servers().archive(server_id).await?;
                hub.rooms.emit_to(
                    &server_key(server_id),
                    &ServerEvent::ServerDeleted {
                        server_id: server_id.to_string(),
                    },
                );
                hub.store.servers().remove_member(server_id, user_id).await?;
                super::unsubscribe_user_sockets(hub, user_id, &server_key(server_id));
                return Ok(());
            }
        }
    }

    hub.store.servers().remove_member(server_id, user_id).await?;
    super::unsubscribe_user_sockets(hub, user_id, &server_key(server_id));
    emit_user_left(hub, server_id, user_id).await?;
    super::broadcast_server_update(hub, server_id).await?;
    Ok(())
}

/// `server:kick-user`.
pub async fn kick(hub: &Hub, actor: &str, server_id: &str, target: &str) -> AppResult<()> {
    moderate_target(hub, actor, server_id, target, Permissions::KICK_MEMBERS).await?;
    remove_from_server(hub, server_id, target, ServerEvent::UserKicked {
        server_id: server_id.to_string(),
    })
    .await?;
    info!(server = %server_id, actor = %actor, target = %target, "member kicked");
    Ok(())
}

/// `server:ban-user` - kick semantics plus the ban list, which fails future
/// invite uses closed.
pub async fn ban(hub: &Hub, actor: &str, server_id: &str, target: &str) -> AppResult<()> {
    moderate_target(hub, actor, server_id, target, Permissions::BAN_MEMBERS).await?;
    hub.store.servers().ban(server_id, target).await?;
    remove_from_server(hub, server_id, target, ServerEvent::UserBanned {
        server_id: server_id.to_string(),
    })
    .await?;
    info!(server = %server_id, actor = %actor, target = %target, "member banned");
    Ok(())
}

/// `server:unban-user`.
pub async fn unban(hub: &Hub, actor: &str, server_id: &str, target: &str) -> AppResult<()> {
    not_personal(hub, server_id).await?;
    hub.perms
        .require(actor, server_id, None, Permissions::BAN_MEMBERS)
        .await?;
    hub.store.servers().unban(server_id, target).await?;
    Ok(())
}

/// `server:timeout-user` - sets `timeout_until`; the permission engine
/// reads it on every subsequent check.
pub async fn timeout(
    hub: &Hub,
    actor: &str,
    server_id: &str,
    target: &str,
    minutes: i64,
) -> AppResult<()> {
    if !TIMEOUT_RANGE_MINS.contains(&minutes) {
        return Err(AppError::Validation(
            "timeout must be between 1 minute and 7 days".into(),
        ));
    }
    moderate_target(hub, actor, server_id, target, Permissions::TIMEOUT_MEMBERS).await?;
    let until = chrono::Utc::now().timestamp() + minutes * 60;
    hub.store.servers().set_timeout(server_id, target, until).await?;
    super::broadcast_server_update(hub, server_id).await?;
    Ok(())
}

// ----------------------------------------------------------------------
// Roles
// ----------------------------------------------------------------------

/// `role:create`.
pub async fn create_role(
    hub: &Hub,
    actor: &str,
    server_id: &str,
    name: &str,
    color: &str,
    permissions: Permissions,
) -> AppResult<()> {
    not_personal(hub, server_id).await?;
    hub.perms
        .require(actor, server_id, None, Permissions::MANAGE_ROLES)
        .await?;
    let name = name.trim();
    if name.is_empty() || name.len() > 32 || name.eq_ignore_ascii_case("@everyone") {
        return Err(AppError::Validation("invalid role name".into()));
    }

    hub.store
        .servers()
        .create_role(&entity_id("r"), server_id, name, color, permissions)
        .await?;
    super::broadcast_server_update(hub, server_id).await?;
    Ok(())
}

/// `role:update` - actors can only touch roles below their own highest.
pub async fn update_role(
    hub: &Hub,
    actor: &str,
    server_id: &str,
    role_id: &str,
    name: Option<&str>,
    color: Option<&str>,
    permissions: Option<Permissions>,
    position: Option<i64>,
) -> AppResult<()> {
    let role = role_in_server(hub, server_id, role_id).await?;
    if role.is_everyone != 0 && (name.is_some() || position.is_some()) {
        return Err(AppError::Validation("@everyone cannot be renamed or moved".into()));
    }
    require_role_authority(hub, actor, server_id, role.position).await?;

    hub.store
        .servers()
        .update_role(role_id, name, color, permissions, position)
        .await?;
    super::broadcast_server_update(hub, server_id).await?;
    Ok(())
}

/// `role:delete`.
pub async fn delete_role(hub: &Hub, actor: &str, server_id: &str, role_id: &str) -> AppResult<()> {
    let role = role_in_server(hub, server_id, role_id).await?;
    if role.is_everyone != 0 {
        return Err(AppError::Validation("@everyone cannot be deleted".into()));
    }
    require_role_authority(hub, actor, server_id, role.position).await?;

    hub.store.servers().delete_role(role_id).await.map_err(|e| match e {
        crate::store::StoreError::Conflict(msg) => AppError::Validation(msg),
        other => AppError::Store(other),
    })?;
    super::broadcast_server_update(hub, server_id).await?;
    Ok(())
}

/// `role:assign` / `role:unassign`.
pub async fn set_member_role(
    hub: &Hub,
    actor: &str,
    server_id: &str,
    target: &str,
    role_id: &str,
    assign: bool,
) -> AppResult<()> {
    let role = role_in_server(hub, server_id, role_id).await?;
    if role.is_everyone != 0 {
        return Err(AppError::Validation("@everyone is implicit".into()));
    }
    require_role_authority(hub, actor, server_id, role.position).await?;
    if !hub.store.servers().is_member(server_id, target).await? {
        return Err(AppError::NotFound("membership"));
    }

    if assign {
        hub.store.servers().assign_role(server_id, target, role_id).await?;
    } else {
        hub.store.servers().unassign_role(server_id, target, role_id).await?;
    }
    super::broadcast_server_update(hub, server_id).await?;
    Ok(())
}

// ----------------------------------------------------------------------
// Invites
// ----------------------------------------------------------------------

/// `invite:create`.
pub async fn create_invite(
    hub: &Hub,
    user_id: &str,
    server_id: &str,
    max_uses: Option<i64>,
    expires_in_ms: Option<i64>,
) -> AppResult<ServerEvent> {
    not_personal(hub, server_id).await?;
    hub.perms
        .require(user_id, server_id, None, Permissions::CREATE_INVITE)
        .await?;
    if max_uses.is_some_and(|max| max <= 0) {
        return Err(AppError::Validation("maxUses must be positive".into()));
    }
    if expires_in_ms.is_some_and(|ms| ms <= 0) {
        return Err(AppError::Validation("expiresInMs must be positive".into()));
    }

    let expires_at = expires_in_ms.map(|ms| chrono::Utc::now().timestamp() + ms / 1000);
    let invite = hub
        .store
        .invites()
        .create(&invite_code(), server_id, user_id, max_uses, expires_at)
        .await?;
    info!(server = %server_id, code = %invite.code, "invite created");
    Ok(ServerEvent::InviteCreated(invite.wire()))
}

/// `invite:peek` - answers for any client, authenticated or not. Expired,
/// revoked and exhausted codes all peek as invalid.
pub async fn peek_invite(hub: &Hub, code: &str) -> AppResult<ServerEvent> {
    let peek = match hub.store.invites().by_code(code).await {
        Ok(invite) if invite.is_usable(chrono::Utc::now().timestamp()) => {
            match hub.store.servers().by_id(&invite.server_id).await {
                Ok(server) => InvitePeekWire {
                    valid: true,
                    server: Some(InvitePeekServer {
                        name: server.name,
                        icon: server.icon,
                        member_count: hub.store.servers().member_count(&invite.server_id).await?,
                    }),
                },
                Err(_) => InvitePeekWire {
                    valid: false,
                    server: None,
                },
            }
        }
        _ => InvitePeekWire {
            valid: false,
            server: None,
        },
    };
    Ok(ServerEvent::InvitePeeked(peek))
}

/// `invite:use` - atomic uses++; fails closed on expiry, exhaustion, ban or
/// existing membership.
pub async fn use_invite(hub: &Hub, user_id: &str, code: &str) -> AppResult<ServerEvent> {
    let invite = hub
        .store
        .invites()
        .by_code(code)
        .await
        .map_err(|_| AppError::NotFound("invite"))?;

    if hub.store.servers().is_banned(&invite.server_id, user_id).await? {
        return Err(AppError::Blocked("you are banned from this server".into()));
    }
    if hub.store.servers().is_member(&invite.server_id, user_id).await? {
        return Err(AppError::Conflict("already a member".into()));
    }

    hub.store.invites().consume_use(code).await.map_err(|e| match e {
        crate::store::StoreError::Conflict(_) => AppError::Blocked("invite is no longer usable".into()),
        other => AppError::Store(other),
    })?;
    hub.store.servers().add_member(&invite.server_id, user_id).await?;

    super::subscribe_user_sockets(hub, user_id, &server_key(&invite.server_id));
    let user = hub.profile(user_id).await?;
    let online_users = super::online_members_of(hub, &invite.server_id).await?;
    hub.rooms.emit_to(
        &server_key(&invite.server_id),
        &ServerEvent::UserJoined {
            server_id: invite.server_id.clone(),
            user,
            online_users,
        },
    );
    let snapshot = super::broadcast_server_update(hub, &invite.server_id).await?;
    info!(server = %invite.server_id, user = %user_id, code = %code, "invite used");
    Ok(ServerEvent::InviteJoined {
        server: Box::new(snapshot),
    })
}

/// `invite:revoke` - creator or `manageServer`.
pub async fn revoke_invite(hub: &Hub, user_id: &str, code: &str) -> AppResult<ServerEvent> {
    let invite = hub
        .store
        .invites()
        .by_code(code)
        .await
        .map_err(|_| AppError::NotFound("invite"))?;
    if invite.created_by != user_id {
        hub.perms
            .require(user_id, &invite.server_id, None, Permissions::MANAGE_SERVER)
            .await?;
    }
    hub.store.invites().revoke(code).await?;
    Ok(ServerEvent::InviteRevoked {
        code: code.to_string(),
    })
}

// ----------------------------------------------------------------------
// Internals
// ----------------------------------------------------------------------

async fn load(hub: &Hub, server_id: &str) -> AppResult<ServerRow> {
    hub.store
        .servers()
        .by_id(server_id)
        .await
        .map_err(|_| AppError::NotFound("server"))
}

async fn not_personal(hub: &Hub, server_id: &str) -> AppResult<ServerRow> {
    let server = load(hub, server_id).await?;
    if server.is_personal != 0 {
        return Err(AppError::Validation(
            "not available on the personal server".into(),
        ));
    }
    Ok(server)
}

/// Moderation preconditions: permission, target is a member, target is not
/// the owner, and the actor outranks the target (owner always outranks).
async fn moderate_target(
    hub: &Hub,
    actor: &str,
    server_id: &str,
    target: &str,
    permission: Permissions,
) -> AppResult<()> {
    let server = not_personal(hub, server_id).await?;
    hub.perms.require(actor, server_id, None, permission).await?;
    if target == server.owner_id {
        return Err(AppError::Unauthorized);
    }
    if actor == target {
        return Err(AppError::Validation("cannot moderate yourself".into()));
    }
    if !hub.store.servers().is_member(server_id, target).await? {
        return Err(AppError::NotFound("membership"));
    }
    if actor != server.owner_id {
        let actor_position = hub.store.servers().highest_position(server_id, actor).await?;
        let target_position = hub.store.servers().highest_position(server_id, target).await?;
        if actor_position <= target_position {
            return Err(AppError::Unauthorized);
        }
    }
    Ok(())
}

/// Shared kick/ban tail: notify the target, drop membership, detach the
/// target's sockets from the server's rooms, refresh everyone else.
async fn remove_from_server(
    hub: &Hub,
    server_id: &str,
    target: &str,
    notice: ServerEvent,
) -> AppResult<()> {
    hub.rooms.emit_to(&user_key(target), &notice);
    hub.store.servers().remove_member(server_id, target).await?;
    super::unsubscribe_user_sockets(hub, target, &server_key(server_id));
    emit_user_left(hub, server_id, target).await?;
    super::broadcast_server_update(hub, server_id).await?;
    Ok(())
}

async fn emit_user_left(hub: &Hub, server_id: &str, user_id: &str) -> AppResult<()> {
    let online_users = super::online_members_of(hub, server_id).await?;
    hub.rooms.emit_to(
        &server_key(server_id),
        &ServerEvent::UserLeft {
            server_id: server_id.to_string(),
            user_id: user_id.to_string(),
            online_users,
        },
    );
    Ok(())
}

async fn role_in_server(
    hub: &Hub,
    server_id: &str,
    role_id: &str,
) -> AppResult<crate::store::RoleRow> {
    let role = hub
        .store
        .servers()
        .role_by_id(role_id)
        .await
        .map_err(|_| AppError::NotFound("role"))?;
    if role.server_id != server_id {
        return Err(AppError::NotFound("role"));
    }
    Ok(role)
}

/// Role mutations require `manageRoles` and strictly higher standing than
/// the role being touched; the owner bypasses the position check.
async fn require_role_authority(
    hub: &Hub,
    actor: &str,
    server_id: &str,
    role_position: i64,
) -> AppResult<()> {
    hub.perms
        .require(actor, server_id, None, Permissions::MANAGE_ROLES)
        .await?;
    let server = load(hub, server_id).await?;
    if server.owner_id == actor {
        return Ok(());
    }
    let actor_position = hub.store.servers().highest_position(server_id, actor).await?;
    if actor_position <= role_position {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}
