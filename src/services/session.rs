//! Socket session lifecycle: the authenticated `join`, presence-driven
//! fan-out, and the disconnect cleanup path.

use crate::error::{AppError, AppResult};
use crate::state::{Hub, SocketState, channel_key, personal_key, server_key, user_key};
use nexus_proto::{ClientEvent, ServerEvent};
use nexus_proto::model::UserStatus;
use std::collections::BTreeMap;
use tracing::info;

/// `join{token}` - bind the socket to a principal and hydrate the client.
pub async fn handle_join(
    hub: &Hub,
    socket_id: &str,
    state: &mut SocketState,
    token: &str,
) -> AppResult<ServerEvent> {
    if state.principal.is_some() {
        return Err(AppError::Conflict("socket is already authenticated".into()));
    }
    let principal = hub.sessions.authenticate(token).await?;
    let user_id = principal.user_id.clone();
    state.principal = Some(principal);

    let user_row = hub.store.users().by_id(&user_id).await?;
    let declared = user_row.declared_status();

    hub.rooms.join(socket_id, &user_key(&user_id));
    hub.rooms.join(socket_id, &personal_key(&user_id));
    let came_online = hub.presence.socket_connected(&user_id, socket_id, declared);

    let servers = hub.store.servers().servers_of(&user_id).await?;
    let mut snapshots = Vec::with_capacity(servers.len());
    let mut online_users: Vec<String> = Vec::new();
    for server in &servers {
        hub.rooms.join(socket_id, &server_key(&server.id));
        let snapshot = super::snapshot_with_presence(hub, &server.id).await?;
        for online in super::online_members_of(hub, &server.id).await? {
            if !online_users.contains(&online) {
                online_users.push(online);
            }
        }
        snapshots.push(snapshot);
    }

    // Voice rosters, restricted to channels the user can actually see.
    let mut voice_channels = BTreeMap::new();
    let all_rosters = hub.voice.rosters();
    for snapshot in &snapshots {
        for category in &snapshot.categories {
            for channel in &category.channels {
                if let Some(peers) = all_rosters.get(&channel.id) {
                    voice_channels.insert(channel.id.clone(), peers.clone());
                }
            }
        }
    }

    let dms = super::dms::channels_for_init(hub, &user_id).await?;
    let mut friends = Vec::new();
    for edge in hub.store.social().edges_of(&user_id).await? {
        friends.push(super::friendship_wire(hub, &edge).await?);
    }

    // Everyone sharing a server learns the user is here.
    if came_online {
        let profile = hub.profile(&user_id).await?;
        for server in &servers {
            let online = super::online_members_of(hub, &server.id).await?;
            hub.rooms.emit_to(
                &server_key(&server.id),
                &ServerEvent::UserJoined {
                    server_id: server.id.clone(),
                    user: profile.clone(),
                    online_users: online,
                },
            );
        }
    }

    info!(user = %user_id, socket = %socket_id, servers = servers.len(), "socket bound");
    Ok(ServerEvent::Init {
        user: hub.profile(&user_id).await?,
        settings: serde_json::from_str(&user_row.settings).unwrap_or_else(|_| serde_json::json!({})),
        servers: snapshots,
        dms,
        friends,
        online_users,
        voice_channels,
    })
}

/// Disconnect cleanup: voice, typing, presence, rooms, rate limiters.
/// Safe to call for sockets that never authenticated.
pub async fn handle_disconnect(hub: &Hub, socket_id: &str, state: &SocketState) {
    if let Err(e) = super::voice::leave(hub, socket_id).await {
        tracing::warn!(socket = %socket_id, error = %e, "voice cleanup failed on disconnect");
    }

    if let Some(user_id) = state.user_id() {
        for channel_id in hub.typing.stop_all(user_id) {
            hub.rooms.emit_to(
                &channel_key(&channel_id),
                &ServerEvent::TypingStop {
                    channel_id,
                    user_id: user_id.to_string(),
                },
            );
        }

        let went_offline = hub.presence.socket_disconnected(user_id, socket_id);
        hub.rooms.unregister_socket(socket_id);
        hub.rate_limits.remove_principal(user_id, socket_id);

        if went_offline {
            if let Ok(profile) = hub.profile(user_id).await {
                if let Ok(servers) = hub.store.servers().servers_of(user_id).await {
                    for server in servers {
                        let online = super::online_members_of(hub, &server.id)
                            .await
                            .unwrap_or_default();
                        hub.rooms.emit_to(
                            &server_key(&server.id),
                            &ServerEvent::UserLeft {
                                server_id: server.id.clone(),
                                user_id: user_id.to_string(),
                                online_users: online,
                            },
                        );
                        hub.rooms.emit_to(
                            &server_key(&server.id),
                            &ServerEvent::UserUpdated(profile.clone()),
                        );
                    }
                }
            }
            info!(user = %user_id, socket = %socket_id, "user went offline");
        }
    } else {
        hub.rooms.unregister_socket(socket_id);
    }
}

/// `status:set` - declared status, persisted and fanned out.
pub async fn set_status(hub: &Hub, user_id: &str, status: UserStatus) -> AppResult<()> {
    hub.sessions.set_declared_status(user_id, status).await?;
    hub.presence.set_declared(user_id, status);
    broadcast_profile(hub, user_id).await
}

/// `settings:update` - opaque per-user settings blob (client-side
/// preferences, category mute state, and the like), returned at login and
/// in `init`.
pub async fn update_settings(
    hub: &Hub,
    user_id: &str,
    settings: &serde_json::Value,
) -> AppResult<()> {
    let raw = serde_json::to_string(settings)
        .map_err(|_| AppError::Validation("settings must be a json object".into()))?;
    if !settings.is_object() || raw.len() > 64 * 1024 {
        return Err(AppError::Validation("settings must be an object under 64KiB".into()));
    }
    hub.store.users().set_settings(user_id, &raw).await?;
    Ok(())
}

/// `activity:ping` - feeds the idle clock; leaving idle fans `user:updated`.
pub async fn activity_ping(hub: &Hub, user_id: &str) -> AppResult<()> {
    let left_idle = hub.presence.touch(user_id);
    if left_idle {
        broadcast_profile(hub, user_id).await?;
    }
    Ok(())
}

/// Push the user's current profile to every server they belong to, and to
/// their own sockets.
pub async fn broadcast_profile(hub: &Hub, user_id: &str) -> AppResult<()> {
    let profile = hub.profile(user_id).await?;
    let event = ServerEvent::UserUpdated(profile);
    hub.rooms.emit_to_user(user_id, &event);
    for server in hub.store.servers().servers_of(user_id).await? {
        hub.rooms.emit_to(&server_key(&server.id), &event);
    }
    Ok(())
}

/// Events allowed before the socket has authenticated.
pub fn allowed_unauthenticated(event: &ClientEvent) -> bool {
    matches!(event, ClientEvent::Join { .. } | ClientEvent::InvitePeek { .. })
}
