//! Message service: validate, persist, fan out.
//!
//! Sends from users and webhooks share one append path, so ordering,
//! mention parsing and fan-out semantics are identical. The per-channel
//! append lock spans id issue, persist and fan-out enqueue; that is the one
//! place a lock is deliberately held across suspension points.

use crate::error::{AppError, AppResult};
use crate::services::mentions::{self, MentionContext};
use crate::state::{Hub, channel_key};
use crate::store::{ChannelRow, DmParticipantRow, MessageRecord, WebhookRow};
use nexus_proto::Permissions;
use nexus_proto::ServerEvent;
use nexus_proto::event::ReactOp;
use nexus_proto::model::{Author, MessageWire};
use serde_json::Value;
use tracing::debug;

pub const MAX_CONTENT_LEN: usize = 2000;
pub const MAX_ATTACHMENTS: usize = 4;
pub const MAX_EMBEDS: usize = 10;
pub const HISTORY_PAGE_LIMIT: u32 = 50;

const ALLOWED_ATTACHMENT_SCHEMES: [&str; 3] = ["http://", "https://", "data:"];

/// A message draft before validation.
#[derive(Debug, Default, Clone)]
pub struct Draft {
    pub content: String,
    pub reply_to: Option<String>,
    pub attachments: Vec<String>,
    /// Webhook ingest path only; user sends carry no embeds.
    pub embeds: Vec<Value>,
    pub command_data: Option<Value>,
}

/// `message:send` from an authenticated user.
pub async fn send_user_message(
    hub: &Hub,
    user_id: &str,
    channel_id: &str,
    draft: Draft,
) -> AppResult<MessageWire> {
    let channel = hub.store.servers().channel_by_id(channel_id).await.map_err(|_| AppError::NotFound("channel"))?;

    let allow_everyone = if channel.is_dm() {
        let participants = ensure_dm_participant(hub, &channel, user_id).await?;
        // 1:1 DMs refuse sends while either side blocks the other.
        if participants.len() == 2 {
            let other = participants
                .iter()
                .find(|p| p.user_id != user_id)
                .map(|p| p.user_id.clone())
                .unwrap_or_default();
            if hub.store.social().blocked_either_way(user_id, &other).await? {
                return Err(AppError::Blocked("you cannot message this user".into()));
            }
        }
        false
    } else {
        let server_id = channel
            .server_id
            .as_deref()
            .ok_or(AppError::NotFound("channel"))?;
        hub.perms
            .require(user_id, server_id, Some(channel_id), Permissions::SEND_MESSAGES)
            .await?;
        hub.perms
            .can(user_id, server_id, Some(channel_id), Permissions::MENTION_EVERYONE)
            .await?
    };

    let author = Author::User {
        id: user_id.to_string(),
    };
    persist_and_fanout(hub, &channel, author, draft, allow_everyone).await
}

/// Webhook ingest: same validation, parsing and fan-out path as user sends.
/// `sendMessages` is bypassed (the webhook's creator vouched at creation).
pub async fn send_webhook_message(
    hub: &Hub,
    webhook: &WebhookRow,
    display_name: Option<String>,
    avatar: Option<String>,
    draft: Draft,
) -> AppResult<MessageWire> {
    let channel = hub
        .store
        .servers()
        .channel_by_id(&webhook.channel_id)
        .await
        .map_err(|_| AppError::NotFound("channel"))?;

    let author = Author::Webhook {
        id: webhook.id.clone(),
        display_name: display_name.unwrap_or_else(|| webhook.display_name.clone()),
        avatar: avatar.or_else(|| webhook.avatar.clone()),
    };
    let message = persist_and_fanout(hub, &channel, author, draft, false).await?;
    crate::metrics::WEBHOOK_INGESTS.inc();
    Ok(message)
}

/// Shared append path. Holds the channel's append lock from id issue to
/// fan-out enqueue so every subscriber observes one total order.
async fn persist_and_fanout(
    hub: &Hub,
    channel: &ChannelRow,
    author: Author,
    draft: Draft,
    allow_everyone: bool,
) -> AppResult<MessageWire> {
    validate_draft(&draft)?;

    if let Some(reply_to) = &draft.reply_to {
        let replied = hub
            .store
            .messages()
            .by_id(reply_to)
            .await
            .map_err(|_| AppError::Validation("reply target does not exist".into()))?;
        if replied.channel_id != channel.id {
            return Err(AppError::Validation(
                "reply target is in another channel".into(),
            ));
        }
    }

    let ctx = mention_context(hub, channel).await?;
    let mut parsed = mentions::parse(&draft.content, &ctx);
    if parsed.mentions.everyone && !allow_everyone {
        // Silent demotion to plain text.
        parsed.mentions.everyone = false;
    }

    let mut embeds = draft.embeds;
    for code in &parsed.invite_codes {
        embeds.push(serde_json::json!({ "type": "invite", "code": code }));
    }

    let lock = hub.channel_lock(&channel.id);
    let _append = lock.lock().await;

    let record = MessageRecord {
        id: hub
            .message_ids
            .next(&channel.id, chrono::Utc::now().timestamp_millis() as u64),
        channel_id: channel.id.clone(),
        author,
        content: draft.content,
        reply_to: draft.reply_to,
        mentions: parsed.mentions,
        channel_links: parsed.channel_links,
        custom_emojis: parsed.custom_emojis,
        embeds,
        attachments: draft.attachments,
        command_data: draft.command_data,
    };

    // Store failure fails closed: no fan-out.
    let row = hub.store.messages().insert(&record).await?;
    let message = hub.store.messages().wire(&row).await?;

    fan_message_event(hub, channel, &ServerEvent::message_new(message.clone())).await?;

    if channel.is_dm() {
        notify_dm_recipients(hub, channel, &message).await?;
    }

    debug!(channel = %channel.id, message = %message.id, "message appended");
    Ok(message)
}

/// `message:edit` - author only.
pub async fn edit_message(
    hub: &Hub,
    user_id: &str,
    message_id: &str,
    content: String,
) -> AppResult<()> {
    if content.is_empty() || content.len() > MAX_CONTENT_LEN {
        return Err(AppError::Validation(format!(
            "content must be 1-{MAX_CONTENT_LEN} characters"
        )));
    }
    let row = hub
        .store
        .messages()
        .by_id(message_id)
        .await
        .map_err(|_| AppError::NotFound("message"))?;
    if row.author_user_id.as_deref() != Some(user_id) {
        return Err(AppError::Unauthorized);
    }

    let updated = hub.store.messages().edit_content(message_id, &content).await?;
    let channel = hub.store.servers().channel_by_id(&row.channel_id).await?;
    fan_message_event(
        hub,
        &channel,
        &ServerEvent::MessageEdited {
            channel_id: row.channel_id.clone(),
            message_id: message_id.to_string(),
            content,
            edited_at: crate::store::to_datetime(updated.edited_at.unwrap_or_default()),
        },
    )
    .await
}

/// `message:delete` - author, or `manageMessages` in the channel.
pub async fn delete_message(hub: &Hub, user_id: &str, message_id: &str) -> AppResult<()> {
    let row = hub
        .store
        .messages()
        .by_id(message_id)
        .await
        .map_err(|_| AppError::NotFound("message"))?;
    let channel = hub.store.servers().channel_by_id(&row.channel_id).await?;

    let is_author = row.author_user_id.as_deref() == Some(user_id);
    if !is_author {
        match channel.server_id.as_deref().filter(|_| !channel.is_dm()) {
            Some(server_id) => {
                hub.perms
                    .require(
                        user_id,
                        server_id,
                        Some(&channel.id),
                        Permissions::MANAGE_MESSAGES,
                    )
                    .await?;
            }
            None => return Err(AppError::Unauthorized),
        }
    }

    hub.store.messages().tombstone(message_id).await?;
    fan_message_event(
        hub,
        &channel,
        &ServerEvent::MessageDeleted {
            channel_id: channel.id.clone(),
            message_id: message_id.to_string(),
        },
    )
    .await
}

/// `message:react` - idempotent per (user, emoji); emits the full map.
pub async fn react(
    hub: &Hub,
    user_id: &str,
    message_id: &str,
    emoji: &str,
    op: ReactOp,
) -> AppResult<()> {
    if emoji.is_empty() || emoji.len() > 64 {
        return Err(AppError::Validation("invalid emoji".into()));
    }
    let row = hub
        .store
        .messages()
        .by_id(message_id)
        .await
        .map_err(|_| AppError::NotFound("message"))?;
    let channel = hub.store.servers().channel_by_id(&row.channel_id).await?;

    if channel.is_dm() {
        ensure_dm_participant(hub, &channel, user_id).await?;
    } else if let Some(server_id) = channel.server_id.as_deref() {
        hub.perms
            .require(
                user_id,
                server_id,
                Some(&channel.id),
                Permissions::VIEW_CHANNEL | Permissions::ADD_REACTION,
            )
            .await?;
    }

    match op {
        ReactOp::Add => {
            hub.store
                .messages()
                .add_reaction(message_id, emoji, user_id)
                .await?;
        }
        ReactOp::Remove => {
            hub.store
                .messages()
                .remove_reaction(message_id, emoji, user_id)
                .await?;
        }
    }

    let reactions = hub.store.messages().reactions_of(message_id).await?;
    fan_message_event(
        hub,
        &channel,
        &ServerEvent::MessageReaction {
            channel_id: channel.id.clone(),
            message_id: message_id.to_string(),
            reactions,
        },
    )
    .await
}

/// `channel:join` - authorize, subscribe the socket, return recent history.
pub async fn open_channel(
    hub: &Hub,
    user_id: &str,
    socket_id: &str,
    channel_id: &str,
) -> AppResult<ServerEvent> {
    let channel = hub
        .store
        .servers()
        .channel_by_id(channel_id)
        .await
        .map_err(|_| AppError::NotFound("channel"))?;
    authorize_read(hub, &channel, user_id).await?;

    hub.rooms.join(socket_id, &channel_key(channel_id));
    let (messages, has_more) = history_page(hub, channel_id, None, HISTORY_PAGE_LIMIT).await?;
    Ok(ServerEvent::ChannelHistory {
        channel_id: channel_id.to_string(),
        messages,
        has_more,
    })
}

/// `message:fetch` - older history pages.
pub async fn fetch_older(
    hub: &Hub,
    user_id: &str,
    channel_id: &str,
    before: Option<&str>,
    limit: Option<u32>,
) -> AppResult<ServerEvent> {
    let channel = hub
        .store
        .servers()
        .channel_by_id(channel_id)
        .await
        .map_err(|_| AppError::NotFound("channel"))?;
    authorize_read(hub, &channel, user_id).await?;

    let limit = limit.unwrap_or(HISTORY_PAGE_LIMIT).min(HISTORY_PAGE_LIMIT);
    let (messages, has_more) = history_page(hub, channel_id, before, limit).await?;
    Ok(ServerEvent::ChannelHistory {
        channel_id: channel_id.to_string(),
        messages,
        has_more,
    })
}

/// `typing:start` - fan to the channel, excluding the sender's socket.
pub async fn typing_start(
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
    authorize_read(hub, &channel, user_id).await?;

    hub.typing.start(channel_id, user_id);
    let profile = hub.profile(user_id).await?;
    hub.rooms.emit_to_except(
        &channel_key(channel_id),
        &ServerEvent::TypingStart {
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            username: profile.username,
        },
        Some(socket_id),
    );
    Ok(())
}

// ----------------------------------------------------------------------
// Internals
// ----------------------------------------------------------------------

fn validate_draft(draft: &Draft) -> AppResult<()> {
    if draft.content.len() > MAX_CONTENT_LEN {
        return Err(AppError::Validation(format!(
            "content exceeds {MAX_CONTENT_LEN} characters"
        )));
    }
    if draft.content.trim().is_empty() && draft.attachments.is_empty() && draft.embeds.is_empty() {
        return Err(AppError::Validation("message is empty".into()));
    }
    if draft.attachments.len() > MAX_ATTACHMENTS {
        return Err(AppError::Validation(format!(
            "at most {MAX_ATTACHMENTS} attachments"
        )));
    }
    for url in &draft.attachments {
        if !ALLOWED_ATTACHMENT_SCHEMES
            .iter()
            .any(|scheme| url.starts_with(scheme))
        {
            return Err(AppError::Validation(format!(
                "attachment scheme not allowed: {url}"
            )));
        }
    }
    if draft.embeds.len() > MAX_EMBEDS {
        return Err(AppError::Validation(format!("at most {MAX_EMBEDS} embeds")));
    }
    Ok(())
}

/// Resolve mention candidates against the channel's actual population.
async fn mention_context(hub: &Hub, channel: &ChannelRow) -> AppResult<MentionContext> {
    let mut ctx = MentionContext::default();
    if channel.is_dm() {
        for participant in hub.store.dms().participants_of(&channel.id).await? {
            if let Ok(user) = hub.store.users().by_id(&participant.user_id).await {
                ctx.users
                    .insert(user.username.to_ascii_lowercase(), user.id);
            }
        }
        return Ok(ctx);
    }

    let Some(server_id) = channel.server_id.as_deref() else {
        return Ok(ctx);
    };
    for user_id in hub.store.servers().member_ids(server_id).await? {
        if let Ok(user) = hub.store.users().by_id(&user_id).await {
            ctx.users
                .insert(user.username.to_ascii_lowercase(), user.id);
        }
    }
    for role in hub.store.servers().roles_of_server(server_id).await? {
        if role.is_everyone == 0 {
            ctx.roles.insert(role.name.to_ascii_lowercase(), role.id);
        }
    }
    for category in hub.store.servers().categories_of(server_id).await? {
        for chan in hub.store.servers().channels_of_category(&category.id).await? {
            ctx.channels.insert(chan.name.to_ascii_lowercase(), chan.id);
        }
    }
    Ok(ctx)
}

/// Route one message-scoped event: channel room for server channels, every
/// participant's user key for DMs.
async fn fan_message_event(hub: &Hub, channel: &ChannelRow, event: &ServerEvent) -> AppResult<()> {
    if channel.is_dm() {
        for participant in hub.store.dms().participants_of(&channel.id).await? {
            hub.rooms.emit_to_user(&participant.user_id, event);
        }
    } else {
        hub.rooms.emit_to(&channel_key(&channel.id), event);
    }
    Ok(())
}

/// A new DM message un-archives the channel everywhere and refreshes the
/// recipients' unread counters.
async fn notify_dm_recipients(
    hub: &Hub,
    channel: &ChannelRow,
    message: &MessageWire,
) -> AppResult<()> {
    let author_id = message.author.user_id().unwrap_or_default();
    for participant in hub.store.dms().participants_of(&channel.id).await? {
        if participant.archived != 0 {
            hub.store
                .dms()
                .set_archived(&channel.id, &participant.user_id, false)
                .await?;
        }
        if participant.user_id == author_id {
            continue;
        }
        let unread = hub
            .store
            .messages()
            .count_after(&channel.id, participant.last_read_id.as_deref())
            .await?;
        let mut counts = std::collections::BTreeMap::new();
        counts.insert(channel.id.clone(), unread);
        hub.rooms
            .emit_to_user(&participant.user_id, &ServerEvent::DmUnreadCounts { counts });
    }
    Ok(())
}

async fn history_page(
    hub: &Hub,
    channel_id: &str,
    before: Option<&str>,
    limit: u32,
) -> AppResult<(Vec<MessageWire>, bool)> {
    let (rows, has_more) = hub.store.messages().page(channel_id, before, limit).await?;
    let mut messages = Vec::with_capacity(rows.len());
    for row in &rows {
        messages.push(hub.store.messages().wire(row).await?);
    }
    Ok((messages, has_more))
}

/// Read access: `viewChannel` on server channels, participation on DMs.
pub(crate) async fn authorize_read(
    hub: &Hub,
    channel: &ChannelRow,
    user_id: &str,
) -> AppResult<()> {
    if channel.is_dm() {
        ensure_dm_participant(hub, channel, user_id).await?;
        return Ok(());
    }
    let server_id = channel
        .server_id
        .as_deref()
        .ok_or(AppError::NotFound("channel"))?;
    hub.perms
        .require(user_id, server_id, Some(&channel.id), Permissions::VIEW_CHANNEL)
        .await
}

pub(crate) async fn ensure_dm_participant(
    hub: &Hub,
    channel: &ChannelRow,
    user_id: &str,
) -> AppResult<Vec<DmParticipantRow>> {
    let participants = hub.store.dms().participants_of(&channel.id).await?;
    if !participants.iter().any(|p| p.user_id == user_id) {
        return Err(AppError::Unauthorized);
    }
    Ok(participants)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_validation_limits() {
        let ok = Draft {
            content: "hello".into(),
            ..Draft::default()
        };
        assert!(validate_draft(&ok).is_ok());

        let long = Draft {
            content: "x".repeat(MAX_CONTENT_LEN + 1),
            ..Draft::default()
        };
        assert!(validate_draft(&long).is_err());

        let empty = Draft::default();
        assert!(validate_draft(&empty).is_err());

        let bad_scheme = Draft {
            content: "x".into(),
            attachments: vec!["ftp://host/file".into()],
            ..Draft::default()
        };
        assert!(validate_draft(&bad_scheme).is_err());

        let too_many = Draft {
            content: "x".into(),
            attachments: vec!["https://a".into(); MAX_ATTACHMENTS + 1],
            ..Draft::default()
        };
        assert!(validate_draft(&too_many).is_err());
    }

    #[test]
    fn attachment_allow_list() {
        for scheme in ["http://h/x", "https://h/x", "data:image/png;base64,AA"] {
            let draft = Draft {
                content: "x".into(),
                attachments: vec![scheme.into()],
                ..Draft::default()
            };
            assert!(validate_draft(&draft).is_ok(), "{scheme} should pass");
        }
    }
}
