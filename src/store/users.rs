//! User and session repository.
//!
//! Covers registration, profile edits, the per-user settings blob, session
//! tokens, and the soft-retire path of account deletion.

use super::{StoreError, now_secs};
use nexus_proto::model::{UserProfile, UserStatus};
use sqlx::SqlitePool;

/// A stored user.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub status: String,
    pub color: String,
    pub avatar: String,
    pub custom_avatar: Option<String>,
    pub settings: String,
    pub created_at: i64,
    pub deleted: i64,
}

impl UserRow {
    /// Declared status as stored. The presence tracker overlays liveness.
    pub fn declared_status(&self) -> UserStatus {
        match self.status.as_str() {
            "online" => UserStatus::Online,
            "idle" => UserStatus::Idle,
            "dnd" => UserStatus::Dnd,
            _ => UserStatus::Offline,
        }
    }

    /// Wire profile with an explicit effective status.
    pub fn profile_with_status(&self, status: UserStatus) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            username: self.username.clone(),
            status,
            color: self.color.clone(),
            avatar: self.avatar.clone(),
            custom_avatar: self.custom_avatar.clone(),
        }
    }
}

/// A stored session token.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub token: String,
    pub user_id: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub revoked: i64,
}

impl SessionRow {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user. The UNIQUE NOCASE constraint on username enforces
    /// case-insensitive uniqueness even under concurrent registration.
    pub async fn create(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        color: &str,
        avatar: &str,
    ) -> Result<UserRow, StoreError> {
        let now = now_secs();
        sqlx::query(
            r#"
            INSERT INTO users (id, username, password_hash, status, color, avatar, settings, created_at)
            VALUES (?, ?, ?, 'online', ?, ?, '{}', ?)
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(password_hash)
        .bind(color)
        .bind(avatar)
        .bind(now)
        .execute(self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(format!("username {username} is taken"))
            }
            _ => StoreError::Sqlx(e),
        })?;

        self.by_id(id).await
    }

    pub async fn by_id(&self, id: &str) -> Result<UserRow, StoreError> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn by_username(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        Ok(sqlx::query_as::<_, UserRow>(
            "SELECT * FROM users WHERE username = ? COLLATE NOCASE AND deleted = 0",
        )
        .bind(username)
        .fetch_optional(self.pool)
        .await?)
    }

    pub async fn set_declared_status(&self, id: &str, status: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_custom_avatar(&self, id: &str, avatar: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET custom_avatar = ? WHERE id = ?")
            .bind(avatar)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_settings(&self, id: &str, settings: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET settings = ? WHERE id = ?")
            .bind(settings)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Soft-retire an account: revoke sessions, drop memberships, anonymize
    /// authored messages to a tombstone author. One transaction.
    pub async fn soft_delete(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE users SET deleted = 1, settings = '{}', custom_avatar = NULL WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE sessions SET revoked = 1 WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM memberships WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM member_roles WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE messages SET author_user_id = NULL, content = '' WHERE author_user_id = ? AND deleted = 0")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub async fn insert_session(
        &self,
        token: &str,
        user_id: &str,
        ttl_secs: i64,
    ) -> Result<(), StoreError> {
        let now = now_secs();
        sqlx::query(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token)
        .bind(user_id)
        .bind(now)
        .bind(now + ttl_secs)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn session(&self, token: &str) -> Result<Option<SessionRow>, StoreError> {
        Ok(
            sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE token = ?")
                .bind(token)
                .fetch_optional(self.pool)
                .await?,
        )
    }

    pub async fn revoke_session(&self, token: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE sessions SET revoked = 1 WHERE token = ?")
            .bind(token)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Drop expired and revoked sessions. Returns rows removed.
    pub async fn prune_sessions(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE revoked = 1 OR expires_at <= ?")
            .bind(now_secs())
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Wire profile for a user id with the given effective status, falling
    /// back to a tombstone profile for deleted/unknown users.
    pub async fn profile_or_tombstone(
        &self,
        id: &str,
        status: nexus_proto::model::UserStatus,
    ) -> Result<UserProfile, StoreError> {
        match self.by_id(id).await {
            Ok(row) if row.deleted == 0 => Ok(row.profile_with_status(status)),
            Ok(row) => Ok(UserProfile {
                id: row.id,
                username: "deleted-user".to_string(),
                status: nexus_proto::model::UserStatus::Offline,
                color: "#777777".to_string(),
                avatar: "×".to_string(),
                custom_avatar: None,
            }),
            Err(StoreError::NotFound) => Ok(UserProfile {
                id: id.to_string(),
                username: "deleted-user".to_string(),
                status: nexus_proto::model::UserStatus::Offline,
                color: "#777777".to_string(),
                avatar: "×".to_string(),
                custom_avatar: None,
            }),
            Err(e) => Err(e),
        }
    }
}
