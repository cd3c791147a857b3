//! Voice coordination: room membership, opaque WebRTC signaling relay,
//! screen-share opt-in, ICE configuration hand-off, and DM call ringing.
//!
//! The server never inspects SDP; offers, answers and ICE candidates are
//! forwarded byte-opaque after a same-room check. Authorization failures in
//! the signaling path are silent drops so topology never leaks.

use crate::error::{AppError, AppResult};
use crate::state::{Hub, server_key, voice_key};
use crate::store::ChannelRow;
use nexus_proto::Permissions;
use nexus_proto::ServerEvent;
use nexus_proto::model::UserProfile;
use serde_json::Value;
use tracing::{debug, info};

/// `voice:join`.
pub async fn join(hub: &Hub, user_id: &str, socket_id: &str, channel_id: &str) -> AppResult<ServerEvent> {
    let channel = hub
        .store
        .servers()
        .channel_by_id(channel_id)
        .await
        .map_err(|_| AppError::NotFound("channel"))?;

    if channel.is_dm() {
        let participants = super::messages::ensure_dm_participant(hub, &channel, user_id).await?;
        if participants.len() == 2 {
            let other = participants
                .iter()
                .find(|p| p.user_id != user_id)
                .map(|p| p.user_id.clone())
                .unwrap_or_default();
            if hub.store.social().blocked_either_way(user_id, &other).await? {
                return Err(AppError::Blocked("you cannot call this user".into()));
            }
        }
    } else {
        if channel.kind != "voice" {
            return Err(AppError::Validation("not a voice channel".into()));
        }
        let server_id = channel
            .server_id
            .as_deref()
            .ok_or(AppError::NotFound("channel"))?;
        hub.perms
            .require(user_id, server_id, Some(channel_id), Permissions::CONNECT_VOICE)
            .await?;
    }

    // A socket is in at most one voice room; joining elsewhere leaves first.
    if hub.voice.room_of(socket_id).is_some() {
        leave(hub, socket_id).await?;
    }

    let profile = hub.profile(user_id).await?;
    let (muted, deafened) = hub.voice.saved_prefs(user_id);
    let peer = crate::state::VoicePeer::new(socket_id, user_id, &profile.username, muted, deafened);
    let (existing, screen_sharer_id) = hub.voice.join(channel_id, peer);

    hub.rooms.join(socket_id, &voice_key(channel_id));
    for other in &existing {
        hub.rooms.emit_to_socket(
            &other.socket_id,
            &ServerEvent::PeerJoined {
                socket_id: socket_id.to_string(),
                user_id: user_id.to_string(),
            },
        );
    }
    fan_roster_update(hub, &channel).await?;

    info!(channel = %channel_id, user = %user_id, socket = %socket_id, "voice join");
    Ok(ServerEvent::VoiceJoined {
        channel_id: channel_id.to_string(),
        peers: existing,
        screen_sharer_id,
    })
}

/// `voice:leave` and the disconnect hook.
pub async fn leave(hub: &Hub, socket_id: &str) -> AppResult<()> {
    let Some(outcome) = hub.voice.leave(socket_id) else {
        return Ok(());
    };
    hub.rooms.leave(socket_id, &voice_key(&outcome.channel_id));

    if outcome.was_sharer {
        hub.rooms.emit_to(
            &voice_key(&outcome.channel_id),
            &ServerEvent::ScreenStopped {
                socket_id: socket_id.to_string(),
            },
        );
    }
    hub.rooms.emit_to(
        &voice_key(&outcome.channel_id),
        &ServerEvent::PeerLeft {
            socket_id: socket_id.to_string(),
        },
    );

    if let Ok(channel) = hub.store.servers().channel_by_id(&outcome.channel_id).await {
        fan_roster_update(hub, &channel).await?;

        // A DM call ends when its initiator hangs up or the room empties.
        if channel.is_dm() {
            let initiator_left = hub
                .voice
                .call_initiator(&outcome.channel_id)
                .is_some_and(|initiator| initiator == socket_id);
            if initiator_left || outcome.now_empty {
                hub.voice.clear_call(&outcome.channel_id);
                for participant in hub.store.dms().participants_of(&outcome.channel_id).await? {
                    hub.rooms.emit_to_user(
                        &participant.user_id,
                        &ServerEvent::DmCallEnded {
                            channel_id: outcome.channel_id.clone(),
                        },
                    );
                }
            }
        }
    }

    debug!(channel = %outcome.channel_id, socket = %socket_id, "voice leave");
    Ok(())
}

/// `voice:mute` - advisory; the actual audio mute happens client-side.
pub async fn set_mute(hub: &Hub, user_id: &str, socket_id: &str, is_muted: bool) -> AppResult<()> {
    let Some(channel_id) = hub.voice.set_muted(socket_id, is_muted) else {
        return Ok(());
    };
    let (_, deafened) = hub.voice.saved_prefs(user_id);
    hub.voice.remember_prefs(user_id, is_muted, deafened);
    hub.rooms.emit_to(
        &voice_key(&channel_id),
        &ServerEvent::PeerMuteChanged {
            socket_id: socket_id.to_string(),
            is_muted,
        },
    );
    Ok(())
}

/// `voice:deafen` - deafening forces mute.
pub async fn set_deafen(
    hub: &Hub,
    user_id: &str,
    socket_id: &str,
    is_deafened: bool,
) -> AppResult<()> {
    let Some((channel_id, muted)) = hub.voice.set_deafened(socket_id, is_deafened) else {
        return Ok(());
    };
    hub.voice.remember_prefs(user_id, muted, is_deafened);
    hub.rooms.emit_to(
        &voice_key(&channel_id),
        &ServerEvent::PeerDeafenChanged {
            socket_id: socket_id.to_string(),
            is_deafened,
        },
    );
    if is_deafened {
        hub.rooms.emit_to(
            &voice_key(&channel_id),
            &ServerEvent::PeerMuteChanged {
                socket_id: socket_id.to_string(),
                is_muted: muted,
            },
        );
    }
    Ok(())
}

/// Signal relay direction.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Offer,
    Answer,
    Ice,
}

/// Relay `webrtc:offer` / `webrtc:answer` / `webrtc:ice` payload-opaque.
/// Sender and target must share a voice room; anything else drops silently.
pub async fn relay(
    hub: &Hub,
    socket_id: &str,
    target_id: &str,
    signal: Signal,
    payload: Value,
) -> AppResult<()> {
    if !hub.voice.same_room(socket_id, target_id) {
        debug!(from = %socket_id, to = %target_id, "dropping signal between unrelated sockets");
        return Ok(());
    }
    let event = match signal {
        Signal::Offer => ServerEvent::WebrtcOffer {
            from: socket_id.to_string(),
            offer: payload,
        },
        Signal::Answer => ServerEvent::WebrtcAnswer {
            from: socket_id.to_string(),
            answer: payload,
        },
        Signal::Ice => ServerEvent::WebrtcIce {
            from: socket_id.to_string(),
            candidate: payload,
        },
    };
    hub.rooms.emit_to_socket(target_id, &event);
    Ok(())
}

/// `screen:start` - one sharer per room.
pub async fn screen_start(hub: &Hub, user_id: &str, socket_id: &str, channel_id: &str) -> AppResult<()> {
    let Some(current) = hub.voice.room_of(socket_id) else {
        return Err(AppError::Validation("not in a voice room".into()));
    };
    if current != channel_id {
        return Err(AppError::Validation("not in that voice room".into()));
    }

    let channel = hub.store.servers().channel_by_id(channel_id).await?;
    if let Some(server_id) = channel.server_id.as_deref().filter(|_| !channel.is_dm()) {
        hub.perms
            .require(user_id, server_id, Some(channel_id), Permissions::SCREEN_SHARE)
            .await?;
    }

    if hub.voice.start_share(socket_id).is_none() {
        return Err(AppError::Conflict("someone is already sharing".into()));
    }
    hub.rooms.emit_to(
        &voice_key(channel_id),
        &ServerEvent::ScreenStarted {
            socket_id: socket_id.to_string(),
        },
    );
    Ok(())
}

/// `screen:stop`.
pub async fn screen_stop(hub: &Hub, socket_id: &str) -> AppResult<()> {
    let Some(channel_id) = hub.voice.stop_share(socket_id) else {
        return Ok(());
    };
    hub.rooms.emit_to(
        &voice_key(&channel_id),
        &ServerEvent::ScreenStopped {
            socket_id: socket_id.to_string(),
        },
    );
    Ok(())
}

/// `screen:watch` - opt-in: the sharer adds tracks for this viewer only.
/// Invalid requests drop silently.
pub async fn screen_watch(hub: &Hub, socket_id: &str, sharer_id: &str) -> AppResult<()> {
    if hub.voice.watch(sharer_id, socket_id) {
        hub.rooms.emit_to_socket(
            sharer_id,
            &ServerEvent::ScreenAddViewer {
                viewer_id: socket_id.to_string(),
            },
        );
    }
    Ok(())
}

/// `screen:unwatch`.
pub async fn screen_unwatch(hub: &Hub, socket_id: &str, sharer_id: &str) -> AppResult<()> {
    if hub.voice.unwatch(sharer_id, socket_id) {
        hub.rooms.emit_to_socket(
            sharer_id,
            &ServerEvent::ScreenRemoveViewer {
                viewer_id: socket_id.to_string(),
            },
        );
    }
    Ok(())
}

/// `voice:ice-config` - STUN defaults, TURN injected from configuration.
pub fn ice_config(hub: &Hub) -> ServerEvent {
    ServerEvent::VoiceIceConfig {
        ice_servers: hub.config.ice_servers.clone(),
    }
}

/// `dm:call-start` - rings every other participant. Blocked users are
/// excluded; DND suppresses the sound client-side but the event delivers.
pub async fn dm_call_start(
    hub: &Hub,
    user_id: &str,
    socket_id: &str,
    channel_id: &str,
) -> AppResult<()> {
    let channel = hub
        .store
        .servers()
        .channel_by_id(channel_id)
        .await
        .map_err(|_| AppError::NotFound("channel"))?;
    if !channel.is_dm() {
        return Err(AppError::Validation("not a dm channel".into()));
    }
    let participants = super::messages::ensure_dm_participant(hub, &channel, user_id).await?;

    hub.voice.set_call_initiator(channel_id, socket_id);
    let caller: UserProfile = hub.profile(user_id).await?;
    let is_group = channel.kind == "group-dm";
    for participant in &participants {
        if participant.user_id == user_id {
            continue;
        }
        if hub
            .store
            .social()
            .blocked_either_way(user_id, &participant.user_id)
            .await?
        {
            continue;
        }
        hub.rooms.emit_to_user(
            &participant.user_id,
            &ServerEvent::DmCallIncoming {
                channel_id: channel_id.to_string(),
                caller: caller.clone(),
                is_group,
            },
        );
    }
    info!(channel = %channel_id, caller = %user_id, "dm call ringing");
    Ok(())
}

/// `dm:call-decline` - relayed to the other participants.
pub async fn dm_call_decline(hub: &Hub, user_id: &str, channel_id: &str) -> AppResult<()> {
    let channel = hub
        .store
        .servers()
        .channel_by_id(channel_id)
        .await
        .map_err(|_| AppError::NotFound("channel"))?;
    let participants = super::messages::ensure_dm_participant(hub, &channel, user_id).await?;
    for participant in &participants {
        if participant.user_id == user_id {
            continue;
        }
        hub.rooms.emit_to_user(
            &participant.user_id,
            &ServerEvent::DmCallDeclined {
                channel_id: channel_id.to_string(),
                user_id: user_id.to_string(),
            },
        );
    }
    Ok(())
}

/// Sidebar roster refresh: `voice:channel:update` to the parent server, or
/// to the DM's participants.
async fn fan_roster_update(hub: &Hub, channel: &ChannelRow) -> AppResult<()> {
    let event = ServerEvent::VoiceChannelUpdate {
        channel_id: channel.id.clone(),
        peers: hub.voice.roster(&channel.id),
    };
    if channel.is_dm() {
        for participant in hub.store.dms().participants_of(&channel.id).await? {
            hub.rooms.emit_to_user(&participant.user_id, &event);
        }
    } else if let Some(server_id) = channel.server_id.as_deref() {
        hub.rooms.emit_to(&server_key(server_id), &event);
    }
    Ok(())
}
