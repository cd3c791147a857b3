//! The Hub - central shared state for the realtime core.
//!
//! The Hub acts as a dependency injection container for the domain trackers
//! and capabilities every handler needs: the room registry, presence,
//! typing, voice rosters, rate limiting, sessions, permission resolution,
//! and the store handle.
//!
//! # Lock order (deadlock prevention)
//!
//! 1. DashMap shard lock (acquired during `.get()` / `.iter()`)
//! 2. Voice room mutex
//!
//! Locks are never held across suspension points; the collect-then-emit
//! pattern applies everywhere fan-out follows a lock.

use crate::auth::SessionManager;
use crate::config::Config;
use crate::perms::PermissionEngine;
use crate::security::rate_limit::RateLimitManager;
use crate::state::{PresenceTracker, RoomRegistry, TypingTracker, VoiceRooms};
use crate::store::Store;
use dashmap::DashMap;
use nexus_proto::id::MessageIdGen;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct Hub {
    pub config: Config,
    pub store: Store,
    pub sessions: Arc<SessionManager>,
    pub perms: PermissionEngine,
    pub rooms: RoomRegistry,
    pub presence: PresenceTracker,
    pub typing: TypingTracker,
    pub voice: VoiceRooms,
    pub rate_limits: RateLimitManager,
    pub message_ids: MessageIdGen,
    pub http_client: reqwest::Client,
    /// Per-channel append locks: id issue + persist + fan-out enqueue run
    /// under the channel's lock so subscribers observe one total order.
    channel_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Hub {
    pub fn new(config: Config, store: Store) -> Arc<Self> {
        let sessions = SessionManager::new(store.clone(), &config);
        let rate_limits = RateLimitManager::new(config.rate_limits.clone());
        Arc::new(Self {
            perms: PermissionEngine::new(store.clone()),
            sessions,
            rate_limits,
            rooms: RoomRegistry::new(),
            presence: PresenceTracker::new(),
            typing: TypingTracker::new(),
            voice: VoiceRooms::new(),
            message_ids: MessageIdGen::new(),
            http_client: reqwest::Client::new(),
            channel_locks: DashMap::new(),
            store,
            config,
        })
    }

    /// The append lock of one channel.
    pub fn channel_lock(&self, channel_id: &str) -> Arc<Mutex<()>> {
        self.channel_locks
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop a deleted channel's append lock and id guard.
    pub fn forget_channel(&self, channel_id: &str) {
        self.channel_locks.remove(channel_id);
        self.message_ids.forget(channel_id);
    }

    /// Effective profile of a user: stored row overlaid with live presence.
    pub async fn profile(&self, user_id: &str) -> crate::error::AppResult<nexus_proto::model::UserProfile> {
        let status = self.presence.effective(user_id);
        Ok(self.store.users().profile_or_tombstone(user_id, status).await?)
    }
}
