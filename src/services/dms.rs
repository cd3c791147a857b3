//! Direct messages: 1:1 channels, group DMs, message-request gating,
//! read cursors, archive and per-user delete.

use crate::error::{AppError, AppResult};
use crate::state::Hub;
use nexus_proto::ServerEvent;
use nexus_proto::id::entity_id;
use nexus_proto::model::MessageWire;
use tracing::info;

/// Group DMs are capped at ten participants including the initiator.
const MAX_GROUP_PARTICIPANTS: usize = 10;

/// `dm:create` - returns the existing channel when the pair already has
/// one. Non-friends land in the target's message-request pane.
pub async fn create_dm(hub: &Hub, initiator: &str, target: &str) -> AppResult<ServerEvent> {
    if initiator == target {
        return Err(AppError::Validation("cannot dm yourself".into()));
    }
    let target_user = hub
        .store
        .users()
        .by_id(target)
        .await
        .map_err(|_| AppError::NotFound("user"))?;
    if target_user.deleted != 0 {
        return Err(AppError::NotFound("user"));
    }
    if hub.store.social().blocked_either_way(initiator, target).await? {
        return Err(AppError::Blocked("you cannot message this user".into()));
    }

    if let Some(existing) = hub.store.dms().dm_between(initiator, target).await? {
        // Re-opening an existing DM un-hides it for the initiator.
        hub.store.dms().set_hidden(&existing.id, initiator, false).await?;
        return dm_created_events(hub, &existing.id, initiator).await;
    }

    let personal = hub
        .store
        .servers()
        .personal_server_of(initiator)
        .await?
        .ok_or_else(|| AppError::Internal("initiator has no personal server".into()))?;

    let are_friends = hub.store.social().are_friends(initiator, target).await?;
    let target_state = if are_friends { "open" } else { "request" };
    let channel = hub
        .store
        .dms()
        .create_dm(&entity_id("c"), &personal.id, initiator, target, target_state)
        .await?;

    info!(channel = %channel.id, initiator = %initiator, target = %target, state = target_state, "dm created");
    dm_created_events(hub, &channel.id, initiator).await
}

/// `dm:create-group`.
pub async fn create_group(
    hub: &Hub,
    initiator: &str,
    participant_ids: &[String],
    name: Option<&str>,
) -> AppResult<ServerEvent> {
    let mut participants: Vec<String> = vec![initiator.to_string()];
    for id in participant_ids {
        if id != initiator && !participants.contains(id) {
            participants.push(id.clone());
        }
    }
    if participants.len() < 2 {
        return Err(AppError::Validation("a group needs at least one other participant".into()));
    }
    if participants.len() > MAX_GROUP_PARTICIPANTS {
        return Err(AppError::Validation(format!(
            "groups are capped at {MAX_GROUP_PARTICIPANTS} participants"
        )));
    }
    for id in &participants {
        if id == initiator {
            continue;
        }
        hub.store
            .users()
            .by_id(id)
            .await
            .map_err(|_| AppError::NotFound("user"))?;
        if hub.store.social().has_blocked(id, initiator).await? {
            return Err(AppError::Blocked("a participant has blocked you".into()));
        }
    }

    let name = name.unwrap_or("").trim();
    if name.len() > 64 {
        return Err(AppError::Validation("group name must be at most 64 characters".into()));
    }
    let channel = hub
        .store
        .dms()
        .create_group(&entity_id("c"), name, &participants)
        .await?;

    info!(channel = %channel.id, initiator = %initiator, count = participants.len(), "group dm created");
    dm_created_events(hub, &channel.id, initiator).await
}

/// `dm:add-participant` - group channels only.
pub async fn add_participant(
    hub: &Hub,
    actor: &str,
    channel_id: &str,
    user_id: &str,
) -> AppResult<()> {
    let channel = group_channel(hub, channel_id).await?;
    let participants = super::messages::ensure_dm_participant(hub, &channel, actor).await?;
    if participants.iter().any(|p| p.user_id == user_id) {
        return Err(AppError::Conflict("already a participant".into()));
    }
    if participants.len() >= MAX_GROUP_PARTICIPANTS {
        return Err(AppError::Validation("group is full".into()));
    }
    if hub.store.social().has_blocked(user_id, actor).await? {
        return Err(AppError::Blocked("that user has blocked you".into()));
    }

    hub.store.dms().add_participant(channel_id, user_id).await?;
    fan_dm_update(hub, channel_id).await
}

/// `dm:remove-participant` - self-leave, or removal by the initiator
/// (first-joined participant).
pub async fn remove_participant(
    hub: &Hub,
    actor: &str,
    channel_id: &str,
    user_id: &str,
) -> AppResult<()> {
    let channel = group_channel(hub, channel_id).await?;
    let participants = super::messages::ensure_dm_participant(hub, &channel, actor).await?;
    let initiator = participants.first().map(|p| p.user_id.clone()).unwrap_or_default();
    if actor != user_id && actor != initiator {
        return Err(AppError::Unauthorized);
    }

    hub.store.dms().remove_participant(channel_id, user_id).await?;
    hub.rooms.emit_to_user(
        user_id,
        &ServerEvent::DmCallEnded {
            channel_id: channel_id.to_string(),
        },
    );
    fan_dm_update(hub, channel_id).await
}

/// `dm:message-request:accept` - the channel moves into the target's main
/// DM list and fan-out resumes normally.
pub async fn accept_request(hub: &Hub, user_id: &str, channel_id: &str) -> AppResult<()> {
    require_request_state(hub, channel_id, user_id).await?;
    hub.store.dms().set_state(channel_id, user_id, "open").await?;
    info!(channel = %channel_id, user = %user_id, "message request accepted");
    fan_dm_update(hub, channel_id).await
}

/// `dm:message-request:reject` - hides the channel for the target; the
/// initiator's side is untouched.
pub async fn reject_request(hub: &Hub, user_id: &str, channel_id: &str) -> AppResult<()> {
    require_request_state(hub, channel_id, user_id).await?;
    hub.store.dms().set_hidden(channel_id, user_id, true).await?;
    let (channel, viewer) = viewer_row(hub, channel_id, user_id).await?;
    hub.rooms.emit_to_user(
        user_id,
        &ServerEvent::DmUpdated {
            channel: super::dm_channel_wire(hub, &channel, &viewer).await?,
        },
    );
    Ok(())
}

/// `dm:mark-read` - per-user cursor plus a fresh unread push.
pub async fn mark_read(
    hub: &Hub,
    user_id: &str,
    channel_id: &str,
    message_id: &str,
) -> AppResult<()> {
    let channel = dm_channel(hub, channel_id).await?;
    super::messages::ensure_dm_participant(hub, &channel, user_id).await?;
    hub.store
        .dms()
        .set_last_read(channel_id, user_id, message_id)
        .await?;

    let unread = hub
        .store
        .messages()
        .count_after(channel_id, Some(message_id))
        .await?;
    let mut counts = std::collections::BTreeMap::new();
    counts.insert(channel_id.to_string(), unread);
    hub.rooms
        .emit_to_user(user_id, &ServerEvent::DmUnreadCounts { counts });
    Ok(())
}

/// `dm:archive` - viewer-local.
pub async fn archive(hub: &Hub, user_id: &str, channel_id: &str) -> AppResult<()> {
    let channel = dm_channel(hub, channel_id).await?;
    super::messages::ensure_dm_participant(hub, &channel, user_id).await?;
    hub.store.dms().set_archived(channel_id, user_id, true).await?;
    let (channel, viewer) = viewer_row(hub, channel_id, user_id).await?;
    hub.rooms.emit_to_user(
        user_id,
        &ServerEvent::DmUpdated {
            channel: super::dm_channel_wire(hub, &channel, &viewer).await?,
        },
    );
    Ok(())
}

/// `dm:delete` - per-user hide; messages survive for other participants.
pub async fn delete(hub: &Hub, user_id: &str, channel_id: &str) -> AppResult<()> {
    let channel = dm_channel(hub, channel_id).await?;
    super::messages::ensure_dm_participant(hub, &channel, user_id).await?;
    hub.store.dms().set_hidden(channel_id, user_id, true).await?;
    Ok(())
}

/// Every DM channel of a user in wire form, for `init` hydration.
pub async fn channels_for_init(
    hub: &Hub,
    user_id: &str,
) -> AppResult<Vec<nexus_proto::model::DmChannelWire>> {
    let rows = hub.store.dms().channels_of(user_id).await?;
    let mut out = Vec::with_capacity(rows.len());
    for (channel, viewer) in &rows {
        out.push(super::dm_channel_wire(hub, channel, viewer).await?);
    }
    Ok(out)
}

// ----------------------------------------------------------------------
// Internals
// ----------------------------------------------------------------------

/// Emit `dm:created` (channel + recent messages) to every participant,
/// returning the initiator's copy as the reply.
async fn dm_created_events(hub: &Hub, channel_id: &str, initiator: &str) -> AppResult<ServerEvent> {
    let channel = dm_channel(hub, channel_id).await?;
    let (rows, _) = hub.store.messages().page(channel_id, None, 50).await?;
    let mut messages: Vec<MessageWire> = Vec::with_capacity(rows.len());
    for row in rows.iter().rev() {
        messages.push(hub.store.messages().wire(row).await?);
    }

    let participants = hub.store.dms().participants_of(channel_id).await?;
    let mut reply = None;
    for viewer in &participants {
        let wire = super::dm_channel_wire(hub, &channel, viewer).await?;
        let event = ServerEvent::DmCreated {
            channel: wire,
            messages: messages.clone(),
        };
        if viewer.user_id == initiator {
            reply = Some(event.clone());
        }
        hub.rooms.emit_to_user(&viewer.user_id, &event);
    }
    reply.ok_or_else(|| AppError::Internal("initiator is not a participant".into()))
}

/// Push each participant their own view of the channel.
async fn fan_dm_update(hub: &Hub, channel_id: &str) -> AppResult<()> {
    let channel = dm_channel(hub, channel_id).await?;
    for viewer in hub.store.dms().participants_of(channel_id).await? {
        let wire = super::dm_channel_wire(hub, &channel, &viewer).await?;
        hub.rooms
            .emit_to_user(&viewer.user_id, &ServerEvent::DmUpdated { channel: wire });
    }
    Ok(())
}

async fn dm_channel(hub: &Hub, channel_id: &str) -> AppResult<crate::store::ChannelRow> {
    let channel = hub
        .store
        .servers()
        .channel_by_id(channel_id)
        .await
        .map_err(|_| AppError::NotFound("channel"))?;
    if !channel.is_dm() {
        return Err(AppError::Validation("not a dm channel".into()));
    }
    Ok(channel)
}

async fn group_channel(hub: &Hub, channel_id: &str) -> AppResult<crate::store::ChannelRow> {
    let channel = dm_channel(hub, channel_id).await?;
    if channel.kind != "group-dm" {
        return Err(AppError::Validation("not a group dm".into()));
    }
    Ok(channel)
}

async fn viewer_row(
    hub: &Hub,
    channel_id: &str,
    user_id: &str,
) -> AppResult<(crate::store::ChannelRow, crate::store::DmParticipantRow)> {
    let channel = dm_channel(hub, channel_id).await?;
    let viewer = hub
        .store
        .dms()
        .participant(channel_id, user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok((channel, viewer))
}

async fn require_request_state(hub: &Hub, channel_id: &str, user_id: &str) -> AppResult<()> {
    let (_, viewer) = viewer_row(hub, channel_id, user_id).await?;
    if viewer.state != "request" {
        return Err(AppError::Validation("no pending message request".into()));
    }
    Ok(())
}
