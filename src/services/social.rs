//! Social graph: friend requests, blocks, and user reports.
//!
//! Blocks gate DM creation and sends (both directions), friend requests,
//! and call delivery. Reject/remove/block/unblock broadcast to the acting
//! user's own sockets only.

use crate::error::{AppError, AppResult};
use crate::state::Hub;
use nexus_proto::ServerEvent;
use nexus_proto::id::entity_id;
use nexus_proto::model::ReportKind;
use tracing::info;

/// `friend:request`.
pub async fn request(hub: &Hub, from: &str, target_username: &str) -> AppResult<()> {
    let Some(target) = hub.store.users().by_username(target_username).await? else {
        return Err(AppError::NotFound("user"));
    };
    if target.id == from {
        return Err(AppError::Validation("cannot friend yourself".into()));
    }
    if hub.store.social().blocked_either_way(from, &target.id).await? {
        return Err(AppError::Blocked("you cannot send this request".into()));
    }
    if let Some(edge) = hub.store.social().edge_between(from, &target.id).await? {
        let message = match edge.state.as_str() {
            "accepted" => "already friends",
            _ => "a request is already pending",
        };
        return Err(AppError::Conflict(message.into()));
    }

    let edge = hub
        .store
        .social()
        .create_pending(&entity_id("f"), from, &target.id)
        .await?;
    let wire = super::friendship_wire(hub, &edge).await?;

    hub.rooms
        .emit_to_user(from, &ServerEvent::FriendRequestSent(wire.clone()));
    hub.rooms
        .emit_to_user(&target.id, &ServerEvent::FriendRequestReceived(wire));
    info!(from = %from, to = %target.id, "friend request sent");
    Ok(())
}

/// `friend:accept` - target only.
pub async fn accept(hub: &Hub, user_id: &str, request_id: &str) -> AppResult<()> {
    let edge = hub
        .store
        .social()
        .by_id(request_id)
        .await
        .map_err(|_| AppError::NotFound("request"))?;
    if edge.target_id != user_id {
        return Err(AppError::Unauthorized);
    }
    if edge.state != "pending" {
        return Err(AppError::Conflict("request is not pending".into()));
    }

    let edge = hub.store.social().set_state(request_id, "accepted").await?;

    // Accepting a pending request also accepts any message request between
    // the pair.
    if let Some(dm) = hub
        .store
        .dms()
        .dm_between(&edge.requester_id, &edge.target_id)
        .await?
    {
        let participant = hub.store.dms().participant(&dm.id, user_id).await?;
        if participant.is_some_and(|p| p.state == "request") {
            hub.store.dms().set_state(&dm.id, user_id, "open").await?;
        }
    }

    let wire = super::friendship_wire(hub, &edge).await?;
    hub.rooms
        .emit_to_user(&edge.requester_id, &ServerEvent::FriendAccepted(wire.clone()));
    hub.rooms
        .emit_to_user(&edge.target_id, &ServerEvent::FriendAccepted(wire));
    info!(request = %request_id, "friend request accepted");
    Ok(())
}

/// `friend:reject` - target only; the requester is not notified.
pub async fn reject(hub: &Hub, user_id: &str, request_id: &str) -> AppResult<()> {
    let edge = hub
        .store
        .social()
        .by_id(request_id)
        .await
        .map_err(|_| AppError::NotFound("request"))?;
    if edge.target_id != user_id {
        return Err(AppError::Unauthorized);
    }
    if edge.state != "pending" {
        return Err(AppError::Conflict("request is not pending".into()));
    }

    hub.store.social().delete(request_id).await?;
    hub.rooms.emit_to_user(
        user_id,
        &ServerEvent::FriendRejected {
            request_id: request_id.to_string(),
        },
    );
    Ok(())
}

/// `friend:remove`.
pub async fn remove(hub: &Hub, user_id: &str, other: &str) -> AppResult<()> {
    if !hub.store.social().are_friends(user_id, other).await? {
        return Err(AppError::NotFound("friendship"));
    }
    hub.store.social().delete_between(user_id, other).await?;
    hub.rooms.emit_to_user(
        user_id,
        &ServerEvent::FriendRemoved {
            user_id: other.to_string(),
        },
    );
    Ok(())
}

/// `user:block` - also severs any friendship between the pair.
pub async fn block(hub: &Hub, user_id: &str, target: &str) -> AppResult<()> {
    if user_id == target {
        return Err(AppError::Validation("cannot block yourself".into()));
    }
    hub.store
        .users()
        .by_id(target)
        .await
        .map_err(|_| AppError::NotFound("user"))?;

    hub.store.social().block(user_id, target).await?;
    hub.store.social().delete_between(user_id, target).await?;
    hub.rooms.emit_to_user(
        user_id,
        &ServerEvent::UserBlocked {
            user_id: target.to_string(),
        },
    );
    info!(blocker = %user_id, blocked = %target, "user blocked");
    Ok(())
}

/// `user:unblock`.
pub async fn unblock(hub: &Hub, user_id: &str, target: &str) -> AppResult<()> {
    hub.store.social().unblock(user_id, target).await?;
    hub.rooms.emit_to_user(
        user_id,
        &ServerEvent::UserUnblocked {
            user_id: target.to_string(),
        },
    );
    Ok(())
}

/// `user:report` - snapshots the reported message so moderation survives
/// later edits and deletes.
pub async fn report(
    hub: &Hub,
    reporter: &str,
    reported: &str,
    message_id: Option<&str>,
    kind: ReportKind,
    description: &str,
) -> AppResult<ServerEvent> {
    if reporter == reported {
        return Err(AppError::Validation("cannot report yourself".into()));
    }
    hub.store
        .users()
        .by_id(reported)
        .await
        .map_err(|_| AppError::NotFound("user"))?;
    let description = description.trim();
    if description.is_empty() || description.len() > 1_000 {
        return Err(AppError::Validation(
            "description must be 1-1000 characters".into(),
        ));
    }

    let (message_content, message_channel) = match message_id {
        Some(id) => {
            let row = hub
                .store
                .messages()
                .by_id(id)
                .await
                .map_err(|_| AppError::NotFound("message"))?;
            (Some(row.content), Some(row.channel_id))
        }
        None => (None, None),
    };

    let kind = match kind {
        ReportKind::Spam => "spam",
        ReportKind::Harassment => "harassment",
        ReportKind::Inappropriate => "inappropriate",
        ReportKind::Other => "other",
    };
    let row = hub
        .store
        .reports()
        .create(
            &entity_id("rep"),
            reporter,
            reported,
            message_id,
            message_content.as_deref(),
            message_channel.as_deref(),
            kind,
            description,
        )
        .await?;
    info!(report = %row.id, reporter = %reporter, reported = %reported, kind = kind, "report submitted");
    Ok(ServerEvent::ReportSubmitted { report_id: row.id })
}
