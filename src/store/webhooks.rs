//! Webhook repository. Raw tokens are never stored: the row keeps a SHA-256
//! digest and the ingest path compares digests in constant time.

use super::{StoreError, now_secs};
use nexus_proto::model::WebhookWire;
use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookRow {
    pub id: String,
    pub channel_id: String,
    pub token_digest: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub created_at: i64,
}

impl WebhookRow {
    /// Wire form without the token (the token appears exactly once, at
    /// creation, and is attached by the service).
    pub fn wire(&self) -> WebhookWire {
        WebhookWire {
            id: self.id.clone(),
            channel_id: self.channel_id.clone(),
            display_name: self.display_name.clone(),
            avatar: self.avatar.clone(),
            token: None,
        }
    }
}

pub struct WebhookRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> WebhookRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        id: &str,
        channel_id: &str,
        token_digest: &str,
        display_name: &str,
    ) -> Result<WebhookRow, StoreError> {
        sqlx::query(
            "INSERT INTO webhooks (id, channel_id, token_digest, display_name, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(channel_id)
        .bind(token_digest)
        .bind(display_name)
        .bind(now_secs())
        .execute(self.pool)
        .await?;
        self.by_id(id).await
    }

    pub async fn by_id(&self, id: &str) -> Result<WebhookRow, StoreError> {
        sqlx::query_as::<_, WebhookRow>("SELECT * FROM webhooks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM webhooks WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn of_channel(&self, channel_id: &str) -> Result<Vec<WebhookRow>, StoreError> {
        Ok(sqlx::query_as::<_, WebhookRow>(
            "SELECT * FROM webhooks WHERE channel_id = ? ORDER BY created_at",
        )
        .bind(channel_id)
        .fetch_all(self.pool)
        .await?)
    }
}
