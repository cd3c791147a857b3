//! Channel and category management.
//!
//! Every structural mutation ends in one `server:updated` snapshot fan-out;
//! reordering is all-or-nothing at the store layer.

use crate::error::{AppError, AppResult};
use crate::state::Hub;
use nexus_proto::Permissions;
use nexus_proto::event::OverrideSubject;
use nexus_proto::model::ChannelKind;
use tracing::info;

/// `channel:create` - uniqueness is enforced within (server, category, kind).
pub async fn create_channel(
    hub: &Hub,
    user_id: &str,
    server_id: &str,
    name: &str,
    kind: ChannelKind,
    category_id: Option<&str>,
) -> AppResult<()> {
    if kind.is_dm() {
        return Err(AppError::Validation(
            "dm channels are created through dm:create".into(),
        ));
    }
    let server = hub.store.servers().by_id(server_id).await.map_err(|_| AppError::NotFound("server"))?;
    if server.is_personal != 0 {
        return Err(AppError::Validation(
            "the personal server has no channels".into(),
        ));
    }
    hub.perms
        .require(user_id, server_id, None, Permissions::MANAGE_CHANNELS)
        .await?;
    let name = normalize_channel_name(name)?;

    // Default into the first category when none was given.
    let category_id = match category_id {
        Some(id) => {
            let category = hub.store.servers().category_by_id(id).await.map_err(|_| AppError::NotFound("category"))?;
            if category.server_id != server_id {
                return Err(AppError::Validation("category belongs to another server".into()));
            }
            category.id
        }
        None => hub
            .store
            .servers()
            .categories_of(server_id)
            .await?
            .first()
            .map(|c| c.id.clone())
            .ok_or(AppError::NotFound("category"))?,
    };

    let kind_str = match kind {
        ChannelKind::Voice => "voice",
        _ => "text",
    };
    if hub
        .store
        .servers()
        .channel_name_taken(server_id, Some(&category_id), kind_str, &name)
        .await?
    {
        return Err(AppError::Conflict(format!("channel {name} already exists")));
    }

    hub.store
        .servers()
        .create_channel(
            &nexus_proto::id::entity_id("c"),
            Some(server_id),
            Some(&category_id),
            kind_str,
            &name,
            false,
        )
        .await?;

    info!(server = %server_id, channel = %name, kind = kind_str, "channel created");
    super::broadcast_server_update(hub, server_id).await?;
    Ok(())
}

/// `channel:update`.
pub async fn update_channel(
    hub: &Hub,
    user_id: &str,
    channel_id: &str,
    name: Option<&str>,
    description: Option<&str>,
    is_private: Option<bool>,
) -> AppResult<()> {
    let (channel, server_id) = server_channel(hub, channel_id).await?;
    hub.perms
        .require(user_id, &server_id, None, Permissions::MANAGE_CHANNELS)
        .await?;

    let normalized;
    let name = match name {
        Some(raw) => {
            normalized = normalize_channel_name(raw)?;
            if !normalized.eq_ignore_ascii_case(&channel.name)
                && hub
                    .store
                    .servers()
                    .channel_name_taken(
                        &server_id,
                        channel.category_id.as_deref(),
                        &channel.kind,
                        &normalized,
                    )
                    .await?
            {
                return Err(AppError::Conflict(format!(
                    "channel {normalized} already exists"
                )));
            }
            Some(normalized.as_str())
        }
        None => None,
    };

    hub.store
        .servers()
        .update_channel(channel_id, name, description, is_private)
        .await?;
    super::broadcast_server_update(hub, &server_id).await?;
    Ok(())
}

/// `channel:delete`.
pub async fn delete_channel(hub: &Hub, user_id: &str, channel_id: &str) -> AppResult<()> {
    let (_, server_id) = server_channel(hub, channel_id).await?;
    hub.perms
        .require(user_id, &server_id, None, Permissions::MANAGE_CHANNELS)
        .await?;

    hub.store.servers().delete_channel(channel_id).await?;
    hub.forget_channel(channel_id);
    info!(server = %server_id, channel = %channel_id, "channel deleted");
    super::broadcast_server_update(hub, &server_id).await?;
    Ok(())
}

/// `channel:move` - category to category.
pub async fn move_channel(
    hub: &Hub,
    user_id: &str,
    channel_id: &str,
    category_id: &str,
    position: Option<i64>,
) -> AppResult<()> {
    let (channel, server_id) = server_channel(hub, channel_id).await?;
    hub.perms
        .require(user_id, &server_id, None, Permissions::MANAGE_CHANNELS)
        .await?;
    let category = hub
        .store
        .servers()
        .category_by_id(category_id)
        .await
        .map_err(|_| AppError::NotFound("category"))?;
    if category.server_id != server_id {
        return Err(AppError::Validation("category belongs to another server".into()));
    }
    if hub
        .store
        .servers()
        .channel_name_taken(&server_id, Some(category_id), &channel.kind, &channel.name)
        .await?
        && channel.category_id.as_deref() != Some(category_id)
    {
        return Err(AppError::Conflict(format!(
            "channel {} already exists there",
            channel.name
        )));
    }

    hub.store
        .servers()
        .move_channel(channel_id, category_id, position)
        .await?;
    super::broadcast_server_update(hub, &server_id).await?;
    Ok(())
}

/// `channel:reorder` - transactional permutation of one category.
pub async fn reorder_channels(
    hub: &Hub,
    user_id: &str,
    category_id: &str,
    channel_ids: &[String],
) -> AppResult<()> {
    let category = hub
        .store
        .servers()
        .category_by_id(category_id)
        .await
        .map_err(|_| AppError::NotFound("category"))?;
    hub.perms
        .require(user_id, &category.server_id, None, Permissions::MANAGE_CHANNELS)
        .await?;

    hub.store
        .servers()
        .reorder_channels(category_id, channel_ids)
        .await
        .map_err(reorder_error)?;
    super::broadcast_server_update(hub, &category.server_id).await?;
    Ok(())
}

/// `channel:override` - per-channel permission delta for one role or user.
/// Layered onto role-wide permissions in {role-allow, role-deny,
/// user-allow, user-deny} order at resolution time.
pub async fn set_override(
    hub: &Hub,
    user_id: &str,
    channel_id: &str,
    subject_kind: OverrideSubject,
    subject_id: &str,
    allow: Permissions,
    deny: Permissions,
) -> AppResult<()> {
    let (_, server_id) = server_channel(hub, channel_id).await?;
    hub.perms
        .require(user_id, &server_id, None, Permissions::MANAGE_ROLES)
        .await?;

    match subject_kind {
        OverrideSubject::Role => {
            let role = hub
                .store
                .servers()
                .role_by_id(subject_id)
                .await
                .map_err(|_| AppError::NotFound("role"))?;
            if role.server_id != server_id {
                return Err(AppError::NotFound("role"));
            }
        }
        OverrideSubject::User => {
            if !hub.store.servers().is_member(&server_id, subject_id).await? {
                return Err(AppError::NotFound("membership"));
            }
        }
    }

    let kind = match subject_kind {
        OverrideSubject::Role => "role",
        OverrideSubject::User => "user",
    };
    hub.store
        .servers()
        .set_override(channel_id, kind, subject_id, allow, deny)
        .await?;
    super::broadcast_server_update(hub, &server_id).await?;
    Ok(())
}

/// `category:create`.
pub async fn create_category(
    hub: &Hub,
    user_id: &str,
    server_id: &str,
    name: &str,
) -> AppResult<()> {
    let server = hub.store.servers().by_id(server_id).await.map_err(|_| AppError::NotFound("server"))?;
    if server.is_personal != 0 {
        return Err(AppError::Validation(
            "the personal server has no categories".into(),
        ));
    }
    hub.perms
        .require(user_id, server_id, None, Permissions::MANAGE_CHANNELS)
        .await?;
    let name = name.trim();
    if name.is_empty() || name.len() > 64 {
        return Err(AppError::Validation("category name must be 1-64 characters".into()));
    }

    hub.store
        .servers()
        .create_category(&nexus_proto::id::entity_id("cat"), server_id, name)
        .await?;
    super::broadcast_server_update(hub, server_id).await?;
    Ok(())
}

/// `category:reorder` - transactional permutation of the server's categories.
pub async fn reorder_categories(
    hub: &Hub,
    user_id: &str,
    server_id: &str,
    category_ids: &[String],
) -> AppResult<()> {
    hub.perms
        .require(user_id, server_id, None, Permissions::MANAGE_CHANNELS)
        .await?;
    hub.store
        .servers()
        .reorder_categories(server_id, category_ids)
        .await
        .map_err(reorder_error)?;
    super::broadcast_server_update(hub, server_id).await?;
    Ok(())
}

fn reorder_error(err: crate::store::StoreError) -> AppError {
    match err {
        crate::store::StoreError::Conflict(msg) => AppError::Validation(msg),
        other => AppError::Store(other),
    }
}

/// Channel names: 1-32 chars, lowercased, spaces collapsed to dashes.
fn normalize_channel_name(raw: &str) -> AppResult<String> {
    let name: String = raw
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == ' ' { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    if name.is_empty() || name.len() > 32 {
        return Err(AppError::Validation(
            "channel name must be 1-32 characters".into(),
        ));
    }
    Ok(name)
}

/// Resolve a non-DM channel with its parent server id.
async fn server_channel(
    hub: &Hub,
    channel_id: &str,
) -> AppResult<(crate::store::ChannelRow, String)> {
    let channel = hub
        .store
        .servers()
        .channel_by_id(channel_id)
        .await
        .map_err(|_| AppError::NotFound("channel"))?;
    if channel.is_dm() {
        return Err(AppError::Validation("dm channels cannot be managed".into()));
    }
    let server_id = channel
        .server_id
        .clone()
        .ok_or(AppError::NotFound("channel"))?;
    Ok((channel, server_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_normalize() {
        assert_eq!(normalize_channel_name("General Chat").unwrap(), "general-chat");
        assert_eq!(normalize_channel_name("  dev  ").unwrap(), "dev");
        assert!(normalize_channel_name("!!!").is_err());
        assert!(normalize_channel_name(&"x".repeat(40)).is_err());
    }
}
