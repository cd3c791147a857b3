//! Durable state behind the realtime core.
//!
//! Async SQLite access through SQLx. The `Store` handle owns the pool and
//! hands out per-domain repositories; migrations are embedded and applied at
//! startup. Transactional scopes: (user profile), (server + categories +
//! channels + roles + memberships), (channel + messages), (friendship edge),
//! (invite + uses counter).

mod dms;
mod invites;
mod messages;
mod reports;
mod servers;
mod social;
mod users;
mod webhooks;

pub use dms::{DmParticipantRow, DmRepository};
pub use invites::{InviteRepository, InviteRow};
pub use messages::{MessageRecord, MessageRepository, MessageRow};
pub use reports::{ReportRepository, ReportRow};
pub use servers::{CategoryRow, ChannelRow, OverrideRow, RoleRow, ServerRepository, ServerRow};
pub use social::{FriendshipRow, SocialRepository};
pub use users::{SessionRow, UserRepository, UserRow};
pub use webhooks::{WebhookRepository, WebhookRow};

use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("row not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    /// True when the underlying failure is a UNIQUE constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Sqlx(sqlx::Error::Database(db)) => db.is_unique_violation(),
            Self::Conflict(_) => true,
            _ => false,
        }
    }
}

/// Store handle with connection pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open the store, running migrations if needed.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = if url == ":memory:" {
            // Shared-cache in-memory mode so the pool's connections see one database.
            let options = SqliteConnectOptions::new()
                .filename("file::memory:")
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(url).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "failed to create store directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(url)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(url = %url, "store connected");

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the embedded schema. Every statement is idempotent.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
        let migration = include_str!("../../migrations/001_init.sql");
        for statement in migration.split(';') {
            let sql: Vec<&str> = statement
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with("--"))
                .collect();
            if sql.is_empty() {
                continue;
            }
            let sql = sql.join("\n");
            if let Err(e) = sqlx::query(&sql).execute(pool).await {
                let err_str = e.to_string();
                if !err_str.contains("already exists") {
                    tracing::warn!(sql = %sql, error = %e, "migration statement failed");
                }
            }
        }
        info!("store migrations applied");
        Ok(())
    }

    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.pool)
    }

    pub fn servers(&self) -> ServerRepository<'_> {
        ServerRepository::new(&self.pool)
    }

    pub fn messages(&self) -> MessageRepository<'_> {
        MessageRepository::new(&self.pool)
    }

    pub fn social(&self) -> SocialRepository<'_> {
        SocialRepository::new(&self.pool)
    }

    pub fn invites(&self) -> InviteRepository<'_> {
        InviteRepository::new(&self.pool)
    }

    pub fn dms(&self) -> DmRepository<'_> {
        DmRepository::new(&self.pool)
    }

    pub fn webhooks(&self) -> WebhookRepository<'_> {
        WebhookRepository::new(&self.pool)
    }

    pub fn reports(&self) -> ReportRepository<'_> {
        ReportRepository::new(&self.pool)
    }
}

/// Current wall clock as stored integer seconds.
pub(crate) fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// Stored integer seconds back to a `DateTime<Utc>`.
pub(crate) fn to_datetime(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}
