//! Report repository. Reported messages are snapshotted (content + channel)
//! so moderation survives later edits and deletes.

use super::{StoreError, now_secs};
use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReportRow {
    pub id: String,
    pub reporter_id: String,
    pub reported_id: String,
    pub message_id: Option<String>,
    pub message_content: Option<String>,
    pub message_channel: Option<String>,
    pub kind: String,
    pub description: String,
    pub status: String,
    pub created_at: i64,
}

pub struct ReportRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ReportRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        id: &str,
        reporter_id: &str,
        reported_id: &str,
        message_id: Option<&str>,
        message_content: Option<&str>,
        message_channel: Option<&str>,
        kind: &str,
        description: &str,
    ) -> Result<ReportRow, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO reports (id, reporter_id, reported_id, message_id, message_content,
                                 message_channel, kind, description, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(reporter_id)
        .bind(reported_id)
        .bind(message_id)
        .bind(message_content)
        .bind(message_channel)
        .bind(kind)
        .bind(description)
        .bind(now_secs())
        .execute(self.pool)
        .await?;
        self.by_id(id).await
    }

    pub async fn by_id(&self, id: &str) -> Result<ReportRow, StoreError> {
        sqlx::query_as::<_, ReportRow>("SELECT * FROM reports WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn open_reports(&self) -> Result<Vec<ReportRow>, StoreError> {
        Ok(sqlx::query_as::<_, ReportRow>(
            "SELECT * FROM reports WHERE status = 'open' ORDER BY created_at",
        )
        .fetch_all(self.pool)
        .await?)
    }

    pub async fn set_status(&self, id: &str, status: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE reports SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}
