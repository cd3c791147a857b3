//! Webhook management. The ingest path itself lives on the HTTP surface;
//! this service covers create/delete/list under `manageWebhooks`.

use crate::error::{AppError, AppResult};
use crate::security::token_digest;
use crate::state::Hub;
use nexus_proto::Permissions;
use nexus_proto::ServerEvent;
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::info;

/// `webhook:create` - the raw token is revealed exactly once, here.
pub async fn create_webhook(
    hub: &Hub,
    user_id: &str,
    channel_id: &str,
    name: &str,
) -> AppResult<ServerEvent> {
    let (channel, server_id) = managed_channel(hub, channel_id).await?;
    hub.perms
        .require(user_id, &server_id, Some(&channel.id), Permissions::MANAGE_WEBHOOKS)
        .await?;
    let name = name.trim();
    if name.is_empty() || name.len() > 64 {
        return Err(AppError::Validation("webhook name must be 1-64 characters".into()));
    }

    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    let token: String = raw.iter().map(|b| format!("{b:02x}")).collect();

    let row = hub
        .store
        .webhooks()
        .create(
            &uuid::Uuid::new_v4().to_string(),
            channel_id,
            &token_digest(&token),
            name,
        )
        .await?;

    info!(webhook = %row.id, channel = %channel_id, "webhook created");
    let mut wire = row.wire();
    wire.token = Some(token);
    Ok(ServerEvent::WebhookCreated(wire))
}

/// `webhook:delete`.
pub async fn delete_webhook(hub: &Hub, user_id: &str, webhook_id: &str) -> AppResult<ServerEvent> {
    let webhook = hub
        .store
        .webhooks()
        .by_id(webhook_id)
        .await
        .map_err(|_| AppError::NotFound("webhook"))?;
    let (channel, server_id) = managed_channel(hub, &webhook.channel_id).await?;
    hub.perms
        .require(user_id, &server_id, Some(&channel.id), Permissions::MANAGE_WEBHOOKS)
        .await?;

    hub.store.webhooks().delete(webhook_id).await?;
    info!(webhook = %webhook_id, "webhook deleted");
    Ok(ServerEvent::WebhookDeleted {
        webhook_id: webhook_id.to_string(),
    })
}

/// `webhook:list`.
pub async fn list_webhooks(hub: &Hub, user_id: &str, channel_id: &str) -> AppResult<ServerEvent> {
    let (channel, server_id) = managed_channel(hub, channel_id).await?;
    hub.perms
        .require(user_id, &server_id, Some(&channel.id), Permissions::MANAGE_WEBHOOKS)
        .await?;

    let rows = hub.store.webhooks().of_channel(channel_id).await?;
    Ok(ServerEvent::WebhookListed {
        webhooks: rows.iter().map(crate::store::WebhookRow::wire).collect(),
    })
}

async fn managed_channel(
    hub: &Hub,
    channel_id: &str,
) -> AppResult<(crate::store::ChannelRow, String)> {
    let channel = hub
        .store
        .servers()
        .channel_by_id(channel_id)
        .await
        .map_err(|_| AppError::NotFound("channel"))?;
    if channel.is_dm() || channel.kind != "text" {
        return Err(AppError::Validation("webhooks attach to text channels".into()));
    }
    let server_id = channel
        .server_id
        .clone()
        .ok_or(AppError::NotFound("channel"))?;
    Ok((channel, server_id))
}
