//! Server-graph repository: servers, categories, channels, roles,
//! memberships, bans, timeouts, and channel overrides.
//!
//! Everything here shares one transactional scope so structural invariants
//! (channel uniqueness, ordering totality, owner membership) hold under
//! concurrent mutation.

use super::{StoreError, now_secs, to_datetime};
use nexus_proto::Permissions;
use nexus_proto::model::{
    CategoryWire, ChannelKind, ChannelWire, MemberWire, RoleWire, ServerSnapshot, UserStatus,
};
use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServerRow {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub icon: Option<String>,
    pub is_personal: i64,
    pub archived: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CategoryRow {
    pub id: String,
    pub server_id: String,
    pub name: String,
    pub position: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChannelRow {
    pub id: String,
    pub server_id: Option<String>,
    pub category_id: Option<String>,
    pub kind: String,
    pub name: String,
    pub description: Option<String>,
    pub is_private: i64,
    pub position: i64,
    pub created_at: i64,
}

impl ChannelRow {
    pub fn channel_kind(&self) -> ChannelKind {
        match self.kind.as_str() {
            "voice" => ChannelKind::Voice,
            "dm" => ChannelKind::Dm,
            "group-dm" => ChannelKind::GroupDm,
            _ => ChannelKind::Text,
        }
    }

    pub fn is_dm(&self) -> bool {
        self.channel_kind().is_dm()
    }

    pub fn wire(&self) -> ChannelWire {
        ChannelWire {
            id: self.id.clone(),
            kind: self.channel_kind(),
            name: self.name.clone(),
            description: self.description.clone(),
            is_private: self.is_private != 0,
            server_id: self.server_id.clone(),
            category_id: self.category_id.clone(),
            created_at: to_datetime(self.created_at),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoleRow {
    pub id: String,
    pub server_id: String,
    pub name: String,
    pub color: String,
    pub permissions: i64,
    pub position: i64,
    pub is_everyone: i64,
}

impl RoleRow {
    pub fn permission_bits(&self) -> Permissions {
        Permissions::from_bits_truncate(self.permissions as u32)
    }

    pub fn wire(&self) -> RoleWire {
        RoleWire {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
            permissions: self.permission_bits(),
            position: self.position,
            is_everyone: self.is_everyone != 0,
        }
    }
}

/// Per-channel permission override for a role or a single user.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OverrideRow {
    pub channel_id: String,
    pub subject_kind: String,
    pub subject_id: String,
    pub allow_bits: i64,
    pub deny_bits: i64,
}

impl OverrideRow {
    pub fn allow(&self) -> Permissions {
        Permissions::from_bits_truncate(self.allow_bits as u32)
    }

    pub fn deny(&self) -> Permissions {
        Permissions::from_bits_truncate(self.deny_bits as u32)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MembershipRow {
    pub user_id: String,
    pub server_id: String,
    pub joined_at: i64,
    pub timeout_until: Option<i64>,
}

pub struct ServerRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ServerRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    // ------------------------------------------------------------------
    // Server lifecycle
    // ------------------------------------------------------------------

    /// Provision a server: row + `@everyone` role + default category with a
    /// `general` text channel and a `General` voice channel + owner
    /// membership. One transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn provision(
        &self,
        server_id: &str,
        name: &str,
        owner_id: &str,
        everyone_role_id: &str,
        category_id: &str,
        text_channel_id: &str,
        voice_channel_id: &str,
    ) -> Result<(), StoreError> {
        let now = now_secs();
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO servers (id, name, owner_id, created_at) VALUES (?, ?, ?, ?)")
            .bind(server_id)
            .bind(name)
            .bind(owner_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO roles (id, server_id, name, permissions, position, is_everyone) VALUES (?, ?, '@everyone', ?, 0, 1)",
        )
        .bind(everyone_role_id)
        .bind(server_id)
        .bind(i64::from(Permissions::everyone_default().bits()))
        .execute(&mut *tx)
        .await?;
        sqlx::query("INSERT INTO categories (id, server_id, name, position) VALUES (?, ?, 'Text Channels', 0)")
            .bind(category_id)
            .bind(server_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO channels (id, server_id, category_id, kind, name, position, created_at) VALUES (?, ?, ?, 'text', 'general', 0, ?)",
        )
        .bind(text_channel_id)
        .bind(server_id)
        .bind(category_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO channels (id, server_id, category_id, kind, name, position, created_at) VALUES (?, ?, ?, 'voice', 'General', 1, ?)",
        )
        .bind(voice_channel_id)
        .bind(server_id)
        .bind(category_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query("INSERT INTO memberships (user_id, server_id, joined_at) VALUES (?, ?, ?)")
            .bind(owner_id)
            .bind(server_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Create the synthetic Personal server for a user (no channels, no
    /// invites, no roles beyond `@everyone`).
    pub async fn provision_personal(
        &self,
        server_id: &str,
        owner_id: &str,
        everyone_role_id: &str,
    ) -> Result<(), StoreError> {
        let now = now_secs();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO servers (id, name, owner_id, is_personal, created_at) VALUES (?, 'Personal', ?, 1, ?)",
        )
        .bind(server_id)
        .bind(owner_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO roles (id, server_id, name, permissions, position, is_everyone) VALUES (?, ?, '@everyone', ?, 0, 1)",
        )
        .bind(everyone_role_id)
        .bind(server_id)
        .bind(i64::from(Permissions::everyone_default().bits()))
        .execute(&mut *tx)
        .await?;
        sqlx::query("INSERT INTO memberships (user_id, server_id, joined_at) VALUES (?, ?, ?)")
            .bind(owner_id)
            .bind(server_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn by_id(&self, id: &str) -> Result<ServerRow, StoreError> {
        sqlx::query_as::<_, ServerRow>("SELECT * FROM servers WHERE id = ? AND archived = 0")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn personal_server_of(&self, user_id: &str) -> Result<Option<ServerRow>, StoreError> {
        Ok(sqlx::query_as::<_, ServerRow>(
            "SELECT * FROM servers WHERE owner_id = ? AND is_personal = 1 AND archived = 0",
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?)
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE servers SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_icon(&self, id: &str, icon: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE servers SET icon = ? WHERE id = ?")
            .bind(icon)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_owner(&self, id: &str, owner_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE servers SET owner_id = ? WHERE id = ?")
            .bind(owner_id)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn archive(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE servers SET archived = 1 WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    pub async fn add_member(&self, server_id: &str, user_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO memberships (user_id, server_id, joined_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(server_id)
        .bind(now_secs())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_member(&self, server_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM memberships WHERE user_id = ? AND server_id = ?")
            .bind(user_id)
            .bind(server_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM member_roles WHERE user_id = ? AND server_id = ?")
            .bind(user_id)
            .bind(server_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn is_member(&self, server_id: &str, user_id: &str) -> Result<bool, StoreError> {
        Ok(sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM memberships WHERE user_id = ? AND server_id = ?)",
        )
        .bind(user_id)
        .bind(server_id)
        .fetch_one(self.pool)
        .await?)
    }

    pub async fn membership(
        &self,
        server_id: &str,
        user_id: &str,
    ) -> Result<Option<MembershipRow>, StoreError> {
        Ok(sqlx::query_as::<_, MembershipRow>(
            "SELECT * FROM memberships WHERE user_id = ? AND server_id = ?",
        )
        .bind(user_id)
        .bind(server_id)
        .fetch_optional(self.pool)
        .await?)
    }

    pub async fn member_ids(&self, server_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM memberships WHERE server_id = ? ORDER BY joined_at",
        )
        .bind(server_id)
        .fetch_all(self.pool)
        .await?)
    }

    pub async fn member_count(&self, server_id: &str) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM memberships WHERE server_id = ?",
        )
        .bind(server_id)
        .fetch_one(self.pool)
        .await?)
    }

    /// Non-personal servers the user belongs to, oldest join first.
    pub async fn servers_of(&self, user_id: &str) -> Result<Vec<ServerRow>, StoreError> {
        Ok(sqlx::query_as::<_, ServerRow>(
            r#"
            SELECT s.* FROM servers s
            JOIN memberships m ON m.server_id = s.id
            WHERE m.user_id = ? AND s.archived = 0 AND s.is_personal = 0
            ORDER BY m.joined_at
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?)
    }

    pub async fn set_timeout(
        &self,
        server_id: &str,
        user_id: &str,
        until: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE memberships SET timeout_until = ? WHERE user_id = ? AND server_id = ?")
            .bind(until)
            .bind(user_id)
            .bind(server_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Longest-joined member holding `administrator`, for ownership transfer.
    pub async fn longest_joined_admin(
        &self,
        server_id: &str,
        excluding: &str,
    ) -> Result<Option<String>, StoreError> {
        let members = sqlx::query_as::<_, MembershipRow>(
            "SELECT * FROM memberships WHERE server_id = ? AND user_id != ? ORDER BY joined_at",
        )
        .bind(server_id)
        .bind(excluding)
        .fetch_all(self.pool)
        .await?;

        for member in members {
            let roles = self.roles_of_member(server_id, &member.user_id).await?;
            if roles
                .iter()
                .any(|r| r.permission_bits().contains(Permissions::ADMINISTRATOR))
            {
                return Ok(Some(member.user_id));
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Bans
    // ------------------------------------------------------------------

    pub async fn ban(&self, server_id: &str, user_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO server_bans (server_id, user_id, banned_at) VALUES (?, ?, ?)",
        )
        .bind(server_id)
        .bind(user_id)
        .bind(now_secs())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn unban(&self, server_id: &str, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM server_bans WHERE server_id = ? AND user_id = ?")
            .bind(server_id)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn is_banned(&self, server_id: &str, user_id: &str) -> Result<bool, StoreError> {
        Ok(sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM server_bans WHERE server_id = ? AND user_id = ?)",
        )
        .bind(server_id)
        .bind(user_id)
        .fetch_one(self.pool)
        .await?)
    }

    // ------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------

    pub async fn create_role(
        &self,
        role_id: &str,
        server_id: &str,
        name: &str,
        color: &str,
        permissions: Permissions,
    ) -> Result<RoleRow, StoreError> {
        let position: i64 = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(position) FROM roles WHERE server_id = ?",
        )
        .bind(server_id)
        .fetch_one(self.pool)
        .await?
        .unwrap_or(0);

        sqlx::query(
            "INSERT INTO roles (id, server_id, name, color, permissions, position) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(role_id)
        .bind(server_id)
        .bind(name)
        .bind(color)
        .bind(i64::from(permissions.bits()))
        .bind(position + 1)
        .execute(self.pool)
        .await?;

        self.role_by_id(role_id).await
    }

    pub async fn role_by_id(&self, role_id: &str) -> Result<RoleRow, StoreError> {
        sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE id = ?")
            .bind(role_id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn update_role(
        &self,
        role_id: &str,
        name: Option<&str>,
        color: Option<&str>,
        permissions: Option<Permissions>,
        position: Option<i64>,
    ) -> Result<RoleRow, StoreError> {
        let current = self.role_by_id(role_id).await?;
        sqlx::query("UPDATE roles SET name = ?, color = ?, permissions = ?, position = ? WHERE id = ?")
            .bind(name.unwrap_or(&current.name))
            .bind(color.unwrap_or(&current.color))
            .bind(permissions.map_or(current.permissions, |p| i64::from(p.bits())))
            .bind(position.unwrap_or(current.position))
            .bind(role_id)
            .execute(self.pool)
            .await?;
        self.role_by_id(role_id).await
    }

    /// Delete a role and every assignment of it. Rejects `@everyone`.
    pub async fn delete_role(&self, role_id: &str) -> Result<(), StoreError> {
        let role = self.role_by_id(role_id).await?;
        if role.is_everyone != 0 {
            return Err(StoreError::Conflict("@everyone cannot be deleted".into()));
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM member_roles WHERE role_id = ?")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM channel_overrides WHERE subject_kind = 'role' AND subject_id = ?")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn roles_of_server(&self, server_id: &str) -> Result<Vec<RoleRow>, StoreError> {
        Ok(sqlx::query_as::<_, RoleRow>(
            "SELECT * FROM roles WHERE server_id = ? ORDER BY position DESC",
        )
        .bind(server_id)
        .fetch_all(self.pool)
        .await?)
    }

    /// Roles of a member, `@everyone` always included.
    pub async fn roles_of_member(
        &self,
        server_id: &str,
        user_id: &str,
    ) -> Result<Vec<RoleRow>, StoreError> {
        Ok(sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT r.* FROM roles r
            WHERE r.server_id = ?1
              AND (r.is_everyone = 1
                   OR r.id IN (SELECT role_id FROM member_roles WHERE user_id = ?2 AND server_id = ?1))
            ORDER BY r.position DESC
            "#,
        )
        .bind(server_id)
        .bind(user_id)
        .fetch_all(self.pool)
        .await?)
    }

    pub async fn assign_role(
        &self,
        server_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO member_roles (user_id, server_id, role_id) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(server_id)
        .bind(role_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn unassign_role(
        &self,
        server_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM member_roles WHERE user_id = ? AND server_id = ? AND role_id = ?")
            .bind(user_id)
            .bind(server_id)
            .bind(role_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Highest role position a member holds (0 = `@everyone` only).
    pub async fn highest_position(
        &self,
        server_id: &str,
        user_id: &str,
    ) -> Result<i64, StoreError> {
        let roles = self.roles_of_member(server_id, user_id).await?;
        Ok(roles.iter().map(|r| r.position).max().unwrap_or(0))
    }

    // ------------------------------------------------------------------
    // Categories and channels
    // ------------------------------------------------------------------

    pub async fn create_category(
        &self,
        category_id: &str,
        server_id: &str,
        name: &str,
    ) -> Result<CategoryRow, StoreError> {
        let position: i64 = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(position) FROM categories WHERE server_id = ?",
        )
        .bind(server_id)
        .fetch_one(self.pool)
        .await?
        .unwrap_or(-1);
        sqlx::query("INSERT INTO categories (id, server_id, name, position) VALUES (?, ?, ?, ?)")
            .bind(category_id)
            .bind(server_id)
            .bind(name)
            .bind(position + 1)
            .execute(self.pool)
            .await?;
        self.category_by_id(category_id).await
    }

    pub async fn category_by_id(&self, category_id: &str) -> Result<CategoryRow, StoreError> {
        sqlx::query_as::<_, CategoryRow>("SELECT * FROM categories WHERE id = ?")
            .bind(category_id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn categories_of(&self, server_id: &str) -> Result<Vec<CategoryRow>, StoreError> {
        Ok(sqlx::query_as::<_, CategoryRow>(
            "SELECT * FROM categories WHERE server_id = ? ORDER BY position",
        )
        .bind(server_id)
        .fetch_all(self.pool)
        .await?)
    }

    pub async fn channel_by_id(&self, channel_id: &str) -> Result<ChannelRow, StoreError> {
        sqlx::query_as::<_, ChannelRow>("SELECT * FROM channels WHERE id = ?")
            .bind(channel_id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    /// Channel-name uniqueness within (server, category, kind).
    pub async fn channel_name_taken(
        &self,
        server_id: &str,
        category_id: Option<&str>,
        kind: &str,
        name: &str,
    ) -> Result<bool, StoreError> {
        Ok(sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM channels
                WHERE server_id = ? AND kind = ? AND name = ? COLLATE NOCASE
                  AND ((category_id IS NULL AND ? IS NULL) OR category_id = ?)
            )
            "#,
        )
        .bind(server_id)
        .bind(kind)
        .bind(name)
        .bind(category_id)
        .bind(category_id)
        .fetch_one(self.pool)
        .await?)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_channel(
        &self,
        channel_id: &str,
        server_id: Option<&str>,
        category_id: Option<&str>,
        kind: &str,
        name: &str,
        is_private: bool,
    ) -> Result<ChannelRow, StoreError> {
        let position: i64 = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(position) FROM channels WHERE category_id = ?",
        )
        .bind(category_id)
        .fetch_one(self.pool)
        .await?
        .unwrap_or(-1);
        sqlx::query(
            r#"
            INSERT INTO channels (id, server_id, category_id, kind, name, is_private, position, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(channel_id)
        .bind(server_id)
        .bind(category_id)
        .bind(kind)
        .bind(name)
        .bind(is_private)
        .bind(position + 1)
        .bind(now_secs())
        .execute(self.pool)
        .await?;
        self.channel_by_id(channel_id).await
    }

    pub async fn update_channel(
        &self,
        channel_id: &str,
        name: Option<&str>,
        description: Option<&str>,
        is_private: Option<bool>,
    ) -> Result<ChannelRow, StoreError> {
        let current = self.channel_by_id(channel_id).await?;
        sqlx::query("UPDATE channels SET name = ?, description = ?, is_private = ? WHERE id = ?")
            .bind(name.unwrap_or(&current.name))
            .bind(description.or(current.description.as_deref()))
            .bind(is_private.unwrap_or(current.is_private != 0))
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        self.channel_by_id(channel_id).await
    }

    /// Delete a channel with its messages, reactions, overrides and webhooks.
    pub async fn delete_channel(&self, channel_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM reactions WHERE message_id IN (SELECT id FROM messages WHERE channel_id = ?)")
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM messages WHERE channel_id = ?")
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM channel_overrides WHERE channel_id = ?")
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM webhooks WHERE channel_id = ?")
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM dm_participants WHERE channel_id = ?")
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn channels_of_category(
        &self,
        category_id: &str,
    ) -> Result<Vec<ChannelRow>, StoreError> {
        Ok(sqlx::query_as::<_, ChannelRow>(
            "SELECT * FROM channels WHERE category_id = ? ORDER BY position",
        )
        .bind(category_id)
        .fetch_all(self.pool)
        .await?)
    }

    /// Reorder the channels of a category. Transactional: the id list must
    /// be a permutation of the category's channels or nothing changes.
    pub async fn reorder_channels(
        &self,
        category_id: &str,
        channel_ids: &[String],
    ) -> Result<(), StoreError> {
        let current = self.channels_of_category(category_id).await?;
        if current.len() != channel_ids.len()
            || !current.iter().all(|c| channel_ids.contains(&c.id))
        {
            return Err(StoreError::Conflict(
                "reorder list does not match category contents".into(),
            ));
        }
        let mut tx = self.pool.begin().await?;
        for (position, channel_id) in channel_ids.iter().enumerate() {
            sqlx::query("UPDATE channels SET position = ? WHERE id = ? AND category_id = ?")
                .bind(position as i64)
                .bind(channel_id)
                .bind(category_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Reorder the categories of a server. Same all-or-nothing contract.
    pub async fn reorder_categories(
        &self,
        server_id: &str,
        category_ids: &[String],
    ) -> Result<(), StoreError> {
        let current = self.categories_of(server_id).await?;
        if current.len() != category_ids.len()
            || !current.iter().all(|c| category_ids.contains(&c.id))
        {
            return Err(StoreError::Conflict(
                "reorder list does not match server categories".into(),
            ));
        }
        let mut tx = self.pool.begin().await?;
        for (position, category_id) in category_ids.iter().enumerate() {
            sqlx::query("UPDATE categories SET position = ? WHERE id = ? AND server_id = ?")
                .bind(position as i64)
                .bind(category_id)
                .bind(server_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Move a channel to another category, appending unless a position is
    /// given.
    pub async fn move_channel(
        &self,
        channel_id: &str,
        category_id: &str,
        position: Option<i64>,
    ) -> Result<(), StoreError> {
        let position = match position {
            Some(p) => p,
            None => {
                sqlx::query_scalar::<_, Option<i64>>(
                    "SELECT MAX(position) FROM channels WHERE category_id = ?",
                )
                .bind(category_id)
                .fetch_one(self.pool)
                .await?
                .unwrap_or(-1)
                    + 1
            }
        };
        sqlx::query("UPDATE channels SET category_id = ?, position = ? WHERE id = ?")
            .bind(category_id)
            .bind(position)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Channel overrides
    // ------------------------------------------------------------------

    pub async fn overrides_of_channel(
        &self,
        channel_id: &str,
    ) -> Result<Vec<OverrideRow>, StoreError> {
        Ok(sqlx::query_as::<_, OverrideRow>(
            "SELECT * FROM channel_overrides WHERE channel_id = ?",
        )
        .bind(channel_id)
        .fetch_all(self.pool)
        .await?)
    }

    pub async fn set_override(
        &self,
        channel_id: &str,
        subject_kind: &str,
        subject_id: &str,
        allow: Permissions,
        deny: Permissions,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO channel_overrides (channel_id, subject_kind, subject_id, allow_bits, deny_bits)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (channel_id, subject_kind, subject_id)
            DO UPDATE SET allow_bits = excluded.allow_bits, deny_bits = excluded.deny_bits
            "#,
        )
        .bind(channel_id)
        .bind(subject_kind)
        .bind(subject_id)
        .bind(i64::from(allow.bits()))
        .bind(i64::from(deny.bits()))
        .execute(self.pool)
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    /// Assemble the full wire snapshot fanned out on structural mutations.
    /// Member statuses are the declared ones; the caller overlays presence.
    pub async fn snapshot(&self, server_id: &str) -> Result<ServerSnapshot, StoreError> {
        let server = self.by_id(server_id).await?;
        let categories = self.categories_of(server_id).await?;
        let roles = self.roles_of_server(server_id).await?;

        let mut category_wires = Vec::with_capacity(categories.len());
        for category in &categories {
            let channels = self.channels_of_category(&category.id).await?;
            category_wires.push(CategoryWire {
                id: category.id.clone(),
                name: category.name.clone(),
                position: category.position,
                channels: channels.iter().map(ChannelRow::wire).collect(),
            });
        }

        let members = sqlx::query_as::<_, MembershipRow>(
            "SELECT * FROM memberships WHERE server_id = ? ORDER BY joined_at",
        )
        .bind(server_id)
        .fetch_all(self.pool)
        .await?;

        let mut member_wires = Vec::with_capacity(members.len());
        for member in &members {
            let user = sqlx::query_as::<_, super::UserRow>("SELECT * FROM users WHERE id = ?")
                .bind(&member.user_id)
                .fetch_optional(self.pool)
                .await?;
            let Some(user) = user else { continue };
            let role_ids = sqlx::query_scalar::<_, String>(
                "SELECT role_id FROM member_roles WHERE user_id = ? AND server_id = ?",
            )
            .bind(&member.user_id)
            .bind(server_id)
            .fetch_all(self.pool)
            .await?;
            member_wires.push(MemberWire {
                user: user.profile_with_status(UserStatus::Offline),
                joined_at: to_datetime(member.joined_at),
                role_ids,
                timeout_until: member.timeout_until.map(to_datetime),
            });
        }

        Ok(ServerSnapshot {
            id: server.id,
            name: server.name,
            owner_id: server.owner_id,
            icon: server.icon,
            is_personal: server.is_personal != 0,
            categories: category_wires,
            roles: roles.iter().map(RoleRow::wire).collect(),
            members: member_wires,
        })
    }
}
