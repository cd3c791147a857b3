//! DM repository: 1:1 and group channels, per-participant state
//! (request/open, archive, hide), and mark-read cursors.

use super::{ChannelRow, StoreError, now_secs};
use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DmParticipantRow {
    pub channel_id: String,
    pub user_id: String,
    pub state: String,
    pub archived: i64,
    pub hidden: i64,
    pub last_read_id: Option<String>,
    pub joined_at: i64,
}

pub struct DmRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DmRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a 1:1 DM channel. The channel hangs off the initiator's
    /// Personal server; the target's participant row starts in `state`
    /// (`request` when the pair are not friends).
    pub async fn create_dm(
        &self,
        channel_id: &str,
        personal_server_id: &str,
        initiator: &str,
        target: &str,
        target_state: &str,
    ) -> Result<ChannelRow, StoreError> {
        let now = now_secs();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO channels (id, server_id, kind, name, position, created_at) VALUES (?, ?, 'dm', '', 0, ?)",
        )
        .bind(channel_id)
        .bind(personal_server_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO dm_participants (channel_id, user_id, state, joined_at) VALUES (?, ?, 'open', ?)",
        )
        .bind(channel_id)
        .bind(initiator)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO dm_participants (channel_id, user_id, state, joined_at) VALUES (?, ?, ?, ?)",
        )
        .bind(channel_id)
        .bind(target)
        .bind(target_state)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        sqlx::query_as::<_, ChannelRow>("SELECT * FROM channels WHERE id = ?")
            .bind(channel_id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    /// Create a group DM with the given participants (initiator first).
    pub async fn create_group(
        &self,
        channel_id: &str,
        name: &str,
        participant_ids: &[String],
    ) -> Result<ChannelRow, StoreError> {
        let now = now_secs();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO channels (id, kind, name, position, created_at) VALUES (?, 'group-dm', ?, 0, ?)",
        )
        .bind(channel_id)
        .bind(name)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        for user_id in participant_ids {
            sqlx::query(
                "INSERT INTO dm_participants (channel_id, user_id, state, joined_at) VALUES (?, ?, 'open', ?)",
            )
            .bind(channel_id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        sqlx::query_as::<_, ChannelRow>("SELECT * FROM channels WHERE id = ?")
            .bind(channel_id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    /// Existing 1:1 DM channel between a pair, if any.
    pub async fn dm_between(&self, a: &str, b: &str) -> Result<Option<ChannelRow>, StoreError> {
        Ok(sqlx::query_as::<_, ChannelRow>(
            r#"
            SELECT c.* FROM channels c
            WHERE c.kind = 'dm'
              AND EXISTS(SELECT 1 FROM dm_participants p WHERE p.channel_id = c.id AND p.user_id = ?1)
              AND EXISTS(SELECT 1 FROM dm_participants p WHERE p.channel_id = c.id AND p.user_id = ?2)
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_optional(self.pool)
        .await?)
    }

    pub async fn participants_of(
        &self,
        channel_id: &str,
    ) -> Result<Vec<DmParticipantRow>, StoreError> {
        Ok(sqlx::query_as::<_, DmParticipantRow>(
            "SELECT * FROM dm_participants WHERE channel_id = ? ORDER BY joined_at",
        )
        .bind(channel_id)
        .fetch_all(self.pool)
        .await?)
    }

    pub async fn participant(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<Option<DmParticipantRow>, StoreError> {
        Ok(sqlx::query_as::<_, DmParticipantRow>(
            "SELECT * FROM dm_participants WHERE channel_id = ? AND user_id = ?",
        )
        .bind(channel_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?)
    }

    pub async fn add_participant(&self, channel_id: &str, user_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO dm_participants (channel_id, user_id, state, joined_at) VALUES (?, ?, 'open', ?)",
        )
        .bind(channel_id)
        .bind(user_id)
        .bind(now_secs())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_participant(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM dm_participants WHERE channel_id = ? AND user_id = ?")
            .bind(channel_id)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_state(
        &self,
        channel_id: &str,
        user_id: &str,
        state: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE dm_participants SET state = ? WHERE channel_id = ? AND user_id = ?")
            .bind(state)
            .bind(channel_id)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_archived(
        &self,
        channel_id: &str,
        user_id: &str,
        archived: bool,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE dm_participants SET archived = ? WHERE channel_id = ? AND user_id = ?")
            .bind(archived)
            .bind(channel_id)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Per-user hide: the channel and its messages survive for the other
    /// participants.
    pub async fn set_hidden(
        &self,
        channel_id: &str,
        user_id: &str,
        hidden: bool,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE dm_participants SET hidden = ? WHERE channel_id = ? AND user_id = ?")
            .bind(hidden)
            .bind(channel_id)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_last_read(
        &self,
        channel_id: &str,
        user_id: &str,
        message_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE dm_participants SET last_read_id = ? WHERE channel_id = ? AND user_id = ?",
        )
        .bind(message_id)
        .bind(channel_id)
        .bind(user_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// All DM channels visible to a user (not hidden), with the user's own
    /// participant row.
    pub async fn channels_of(
        &self,
        user_id: &str,
    ) -> Result<Vec<(ChannelRow, DmParticipantRow)>, StoreError> {
        let participants = sqlx::query_as::<_, DmParticipantRow>(
            "SELECT * FROM dm_participants WHERE user_id = ? AND hidden = 0 ORDER BY joined_at DESC",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        let mut out = Vec::with_capacity(participants.len());
        for participant in participants {
            let channel = sqlx::query_as::<_, ChannelRow>("SELECT * FROM channels WHERE id = ?")
                .bind(&participant.channel_id)
                .fetch_optional(self.pool)
                .await?;
            if let Some(channel) = channel {
                out.push((channel, participant));
            }
        }
        Ok(out)
    }
}
