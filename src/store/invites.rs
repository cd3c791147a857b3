//! Invite repository. The uses counter only ever grows, inside its own
//! transactional scope, so concurrent redemptions of a limited invite
//! cannot oversubscribe it.

use super::{StoreError, now_secs, to_datetime};
use nexus_proto::model::InviteWire;
use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InviteRow {
    pub code: String,
    pub server_id: String,
    pub created_by: String,
    pub max_uses: Option<i64>,
    pub uses: i64,
    pub expires_at: Option<i64>,
    pub revoked: i64,
    pub created_at: i64,
}

impl InviteRow {
    pub fn is_usable(&self, now: i64) -> bool {
        self.revoked == 0
            && self.expires_at.is_none_or(|exp| exp > now)
            && self.max_uses.is_none_or(|max| self.uses < max)
    }

    pub fn wire(&self) -> InviteWire {
        InviteWire {
            code: self.code.clone(),
            server_id: self.server_id.clone(),
            created_by: self.created_by.clone(),
            max_uses: self.max_uses,
            uses: self.uses,
            expires_at: self.expires_at.map(to_datetime),
        }
    }
}

pub struct InviteRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> InviteRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        code: &str,
        server_id: &str,
        created_by: &str,
        max_uses: Option<i64>,
        expires_at: Option<i64>,
    ) -> Result<InviteRow, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO invites (code, server_id, created_by, max_uses, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(code)
        .bind(server_id)
        .bind(created_by)
        .bind(max_uses)
        .bind(expires_at)
        .bind(now_secs())
        .execute(self.pool)
        .await?;
        self.by_code(code).await
    }

    pub async fn by_code(&self, code: &str) -> Result<InviteRow, StoreError> {
        sqlx::query_as::<_, InviteRow>("SELECT * FROM invites WHERE code = ?")
            .bind(code)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    /// Atomically consume one use. The guarded UPDATE fails closed when the
    /// invite expired, was revoked, or is out of uses.
    pub async fn consume_use(&self, code: &str) -> Result<InviteRow, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE invites SET uses = uses + 1
            WHERE code = ?
              AND revoked = 0
              AND (expires_at IS NULL OR expires_at > ?)
              AND (max_uses IS NULL OR uses < max_uses)
            "#,
        )
        .bind(code)
        .bind(now_secs())
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict("invite is no longer usable".into()));
        }
        self.by_code(code).await
    }

    pub async fn revoke(&self, code: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE invites SET revoked = 1 WHERE code = ?")
            .bind(code)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}
