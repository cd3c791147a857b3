//! Message repository: append, edit, tombstone, reactions, history pages.
//!
//! Appends run inside the (channel + messages) transactional scope; together
//! with the per-channel id guard this keeps ids strictly increasing within a
//! channel.

use super::{StoreError, now_secs, to_datetime};
use nexus_proto::model::{Author, CustomEmojiWire, MessageWire, Mentions};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

/// Everything needed to persist one message.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    pub channel_id: String,
    pub author: Author,
    pub content: String,
    pub reply_to: Option<String>,
    pub mentions: Mentions,
    pub channel_links: Vec<String>,
    pub custom_emojis: Vec<CustomEmojiWire>,
    pub embeds: Vec<serde_json::Value>,
    pub attachments: Vec<String>,
    pub command_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub author_user_id: Option<String>,
    pub webhook_id: Option<String>,
    pub webhook_name: Option<String>,
    pub webhook_avatar: Option<String>,
    pub content: String,
    pub created_at: i64,
    pub edited_at: Option<i64>,
    pub reply_to: Option<String>,
    pub mentions: String,
    pub channel_links: String,
    pub custom_emojis: String,
    pub embeds: String,
    pub attachments: String,
    pub command_data: Option<String>,
    pub deleted: i64,
}

impl MessageRow {
    pub fn author(&self) -> Author {
        match (&self.author_user_id, &self.webhook_id) {
            (Some(id), _) => Author::User { id: id.clone() },
            (None, Some(id)) => Author::Webhook {
                id: id.clone(),
                display_name: self.webhook_name.clone().unwrap_or_default(),
                avatar: self.webhook_avatar.clone(),
            },
            // Tombstone author after account deletion.
            (None, None) => Author::User {
                id: String::new(),
            },
        }
    }

    /// Wire form. Reactions are joined in by the repository.
    pub fn wire(&self, reactions: BTreeMap<String, Vec<String>>) -> MessageWire {
        MessageWire {
            id: self.id.clone(),
            channel_id: self.channel_id.clone(),
            author: self.author(),
            content: self.content.clone(),
            created_at: to_datetime(self.created_at),
            edited_at: self.edited_at.map(to_datetime),
            reply_to: self.reply_to.clone(),
            mentions: serde_json::from_str(&self.mentions).unwrap_or_default(),
            channel_links: serde_json::from_str(&self.channel_links).unwrap_or_default(),
            custom_emojis: serde_json::from_str(&self.custom_emojis).unwrap_or_default(),
            embeds: serde_json::from_str(&self.embeds).unwrap_or_default(),
            attachments: serde_json::from_str(&self.attachments).unwrap_or_default(),
            reactions,
            command_data: self
                .command_data
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
        }
    }
}

pub struct MessageRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MessageRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &MessageRecord) -> Result<MessageRow, StoreError> {
        let (author_user_id, webhook_id, webhook_name, webhook_avatar) = match &record.author {
            Author::User { id } => (Some(id.clone()), None, None, None),
            Author::Webhook {
                id,
                display_name,
                avatar,
            } => (None, Some(id.clone()), Some(display_name.clone()), avatar.clone()),
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO messages (id, channel_id, author_user_id, webhook_id, webhook_name,
                                  webhook_avatar, content, created_at, reply_to, mentions,
                                  channel_links, custom_emojis, embeds, attachments, command_data)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.channel_id)
        .bind(&author_user_id)
        .bind(&webhook_id)
        .bind(&webhook_name)
        .bind(&webhook_avatar)
        .bind(&record.content)
        .bind(now_secs())
        .bind(&record.reply_to)
        .bind(serde_json::to_string(&record.mentions).unwrap_or_else(|_| "{}".into()))
        .bind(serde_json::to_string(&record.channel_links).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&record.custom_emojis).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&record.embeds).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&record.attachments).unwrap_or_else(|_| "[]".into()))
        .bind(
            record
                .command_data
                .as_ref()
                .map(|v| serde_json::to_string(v).unwrap_or_default()),
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.by_id(&record.id).await
    }

    pub async fn by_id(&self, id: &str) -> Result<MessageRow, StoreError> {
        sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = ? AND deleted = 0")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn edit_content(&self, id: &str, content: &str) -> Result<MessageRow, StoreError> {
        sqlx::query("UPDATE messages SET content = ?, edited_at = ? WHERE id = ? AND deleted = 0")
            .bind(content)
            .bind(now_secs())
            .bind(id)
            .execute(self.pool)
            .await?;
        self.by_id(id).await
    }

    /// Flip the tombstone flag. Content stays for the store's history
    /// retention; the wire never sees it again.
    pub async fn tombstone(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE messages SET deleted = 1 WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Page of history strictly before `before` (or the newest page),
    /// newest first. Returns `(rows, has_more)`.
    pub async fn page(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<MessageRow>, bool), StoreError> {
        let limit = limit.min(50) as i64;
        let rows = match before {
            Some(before) => {
                sqlx::query_as::<_, MessageRow>(
                    r#"
                    SELECT * FROM messages
                    WHERE channel_id = ? AND deleted = 0 AND id < ?
                    ORDER BY id DESC LIMIT ?
                    "#,
                )
                .bind(channel_id)
                .bind(before)
                .bind(limit + 1)
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, MessageRow>(
                    r#"
                    SELECT * FROM messages
                    WHERE channel_id = ? AND deleted = 0
                    ORDER BY id DESC LIMIT ?
                    "#,
                )
                .bind(channel_id)
                .bind(limit + 1)
                .fetch_all(self.pool)
                .await?
            }
        };
        let has_more = rows.len() as i64 > limit;
        let mut rows = rows;
        rows.truncate(limit as usize);
        Ok((rows, has_more))
    }

    /// Count of messages in a channel with id greater than the cursor.
    pub async fn count_after(
        &self,
        channel_id: &str,
        after: Option<&str>,
    ) -> Result<i64, StoreError> {
        let count = match after {
            Some(after) => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM messages WHERE channel_id = ? AND deleted = 0 AND id > ?",
                )
                .bind(channel_id)
                .bind(after)
                .fetch_one(self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM messages WHERE channel_id = ? AND deleted = 0",
                )
                .bind(channel_id)
                .fetch_one(self.pool)
                .await?
            }
        };
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Reactions
    // ------------------------------------------------------------------

    /// Idempotent per (message, emoji, user).
    pub async fn add_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO reactions (message_id, emoji, user_id) VALUES (?, ?, ?)",
        )
        .bind(message_id)
        .bind(emoji)
        .bind(user_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM reactions WHERE message_id = ? AND emoji = ? AND user_id = ?")
            .bind(message_id)
            .bind(emoji)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Full reactions map for one message.
    pub async fn reactions_of(
        &self,
        message_id: &str,
    ) -> Result<BTreeMap<String, Vec<String>>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT emoji, user_id FROM reactions WHERE message_id = ? ORDER BY emoji, user_id",
        )
        .bind(message_id)
        .fetch_all(self.pool)
        .await?;
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (emoji, user_id) in rows {
            map.entry(emoji).or_default().push(user_id);
        }
        Ok(map)
    }

    /// Wire form of one row with its reactions joined in.
    pub async fn wire(&self, row: &MessageRow) -> Result<MessageWire, StoreError> {
        let reactions = self.reactions_of(&row.id).await?;
        Ok(row.wire(reactions))
    }
}
