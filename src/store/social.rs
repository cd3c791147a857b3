//! Social-graph repository: friendship edges and directed blocks.

use super::{StoreError, now_secs};
use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FriendshipRow {
    pub id: String,
    pub requester_id: String,
    pub target_id: String,
    pub state: String,
    pub created_at: i64,
}

impl FriendshipRow {
    pub fn involves(&self, user_id: &str) -> bool {
        self.requester_id == user_id || self.target_id == user_id
    }

    pub fn other_side(&self, user_id: &str) -> &str {
        if self.requester_id == user_id {
            &self.target_id
        } else {
            &self.requester_id
        }
    }
}

pub struct SocialRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SocialRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    // ------------------------------------------------------------------
    // Friendships
    // ------------------------------------------------------------------

    /// Any edge between the pair, in either direction and any state except
    /// rejected (rejected edges are deleted on rejection, kept here for the
    /// transition window).
    pub async fn edge_between(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Option<FriendshipRow>, StoreError> {
        Ok(sqlx::query_as::<_, FriendshipRow>(
            r#"
            SELECT * FROM friendships
            WHERE (requester_id = ?1 AND target_id = ?2)
               OR (requester_id = ?2 AND target_id = ?1)
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_optional(self.pool)
        .await?)
    }

    pub async fn create_pending(
        &self,
        id: &str,
        requester: &str,
        target: &str,
    ) -> Result<FriendshipRow, StoreError> {
        sqlx::query(
            "INSERT INTO friendships (id, requester_id, target_id, state, created_at) VALUES (?, ?, ?, 'pending', ?)",
        )
        .bind(id)
        .bind(requester)
        .bind(target)
        .bind(now_secs())
        .execute(self.pool)
        .await?;
        self.by_id(id).await
    }

    pub async fn by_id(&self, id: &str) -> Result<FriendshipRow, StoreError> {
        sqlx::query_as::<_, FriendshipRow>("SELECT * FROM friendships WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn set_state(&self, id: &str, state: &str) -> Result<FriendshipRow, StoreError> {
        sqlx::query("UPDATE friendships SET state = ? WHERE id = ?")
            .bind(state)
            .bind(id)
            .execute(self.pool)
            .await?;
        self.by_id(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM friendships WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Remove any friendship edge between a pair.
    pub async fn delete_between(&self, a: &str, b: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM friendships
            WHERE (requester_id = ?1 AND target_id = ?2)
               OR (requester_id = ?2 AND target_id = ?1)
            "#,
        )
        .bind(a)
        .bind(b)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn are_friends(&self, a: &str, b: &str) -> Result<bool, StoreError> {
        Ok(self
            .edge_between(a, b)
            .await?
            .is_some_and(|edge| edge.state == "accepted"))
    }

    /// Every edge the user is on (accepted friendships plus pendings in
    /// both directions), newest first.
    pub async fn edges_of(&self, user_id: &str) -> Result<Vec<FriendshipRow>, StoreError> {
        Ok(sqlx::query_as::<_, FriendshipRow>(
            r#"
            SELECT * FROM friendships
            WHERE (requester_id = ? OR target_id = ?) AND state != 'rejected'
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(self.pool)
        .await?)
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    pub async fn block(&self, blocker: &str, blocked: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO blocks (blocker_id, blocked_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(blocker)
        .bind(blocked)
        .bind(now_secs())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn unblock(&self, blocker: &str, blocked: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM blocks WHERE blocker_id = ? AND blocked_id = ?")
            .bind(blocker)
            .bind(blocked)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Directed check: has `blocker` blocked `blocked`?
    pub async fn has_blocked(&self, blocker: &str, blocked: &str) -> Result<bool, StoreError> {
        Ok(sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM blocks WHERE blocker_id = ? AND blocked_id = ?)",
        )
        .bind(blocker)
        .bind(blocked)
        .fetch_one(self.pool)
        .await?)
    }

    /// Bidirectional gate used by DMs, calls and friend requests.
    pub async fn blocked_either_way(&self, a: &str, b: &str) -> Result<bool, StoreError> {
        Ok(sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM blocks
                WHERE (blocker_id = ?1 AND blocked_id = ?2)
                   OR (blocker_id = ?2 AND blocked_id = ?1)
            )
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_one(self.pool)
        .await?)
    }
}
