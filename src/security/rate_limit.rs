//! Rate limiting for the event and webhook surfaces.
//!
//! Uses the `governor` crate's token bucket algorithm, one keyed map per
//! bucket so principals never interfere across buckets. Buckets are sized as
//! "limit per window" with the full limit available as burst, which matches
//! the sliding-window design limits for the traffic shapes involved.

use crate::config::{Bucket, RateLimitConfig};
use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovRateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

/// Type alias for governor's direct rate limiter.
type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Named buckets of the design table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateBucket {
    MessageSend,
    WebhookPost,
    FriendRequest,
    InviteCreate,
    AuthLogin,
    WsEventAny,
}

impl RateBucket {
    pub fn name(self) -> &'static str {
        match self {
            Self::MessageSend => "message.send",
            Self::WebhookPost => "webhook.post",
            Self::FriendRequest => "friend.request",
            Self::InviteCreate => "invite.create",
            Self::AuthLogin => "auth.login",
            Self::WsEventAny => "ws.event.any",
        }
    }
}

/// Thread-safe rate limit manager.
pub struct RateLimitManager {
    message_send: DashMap<String, DirectRateLimiter>,
    webhook_post: DashMap<String, DirectRateLimiter>,
    friend_request: DashMap<String, DirectRateLimiter>,
    invite_create: DashMap<String, DirectRateLimiter>,
    auth_login: DashMap<IpAddr, DirectRateLimiter>,
    ws_event: DashMap<String, DirectRateLimiter>,
    config: RateLimitConfig,
}

impl RateLimitManager {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            message_send: DashMap::new(),
            webhook_post: DashMap::new(),
            friend_request: DashMap::new(),
            invite_create: DashMap::new(),
            auth_login: DashMap::new(),
            ws_event: DashMap::new(),
            config,
        }
    }

    /// Check a string-keyed bucket. Returns `true` if the event is allowed.
    pub fn check(&self, bucket: RateBucket, key: &str) -> bool {
        let (map, shape) = match bucket {
            RateBucket::MessageSend => (&self.message_send, self.config.message_send),
            RateBucket::WebhookPost => (&self.webhook_post, self.config.webhook_post),
            RateBucket::FriendRequest => (&self.friend_request, self.config.friend_request),
            RateBucket::InviteCreate => (&self.invite_create, self.config.invite_create),
            RateBucket::WsEventAny => (&self.ws_event, self.config.ws_event),
            RateBucket::AuthLogin => {
                debug!("auth.login is IP-keyed; use check_ip");
                return true;
            }
        };
        let limiter = map
            .entry(key.to_string())
            .or_insert_with(|| make_limiter(shape));
        let allowed = limiter.check().is_ok();
        if !allowed {
            debug!(bucket = bucket.name(), key = %key, "rate limit exceeded");
        }
        allowed
    }

    /// Check the IP-keyed `auth.login` bucket.
    pub fn check_login(&self, ip: IpAddr) -> bool {
        let shape = self.config.auth_login;
        let limiter = self
            .auth_login
            .entry(ip)
            .or_insert_with(|| make_limiter(shape));
        let allowed = limiter.check().is_ok();
        if !allowed {
            debug!(ip = %ip, "login rate limit exceeded");
        }
        allowed
    }

    /// Seconds a caller should wait before retrying (HTTP `Retry-After`).
    pub fn retry_after_secs(&self, bucket: RateBucket) -> u64 {
        let shape = match bucket {
            RateBucket::MessageSend => self.config.message_send,
            RateBucket::WebhookPost => self.config.webhook_post,
            RateBucket::FriendRequest => self.config.friend_request,
            RateBucket::InviteCreate => self.config.invite_create,
            RateBucket::AuthLogin => self.config.auth_login,
            RateBucket::WsEventAny => self.config.ws_event,
        };
        (shape.window.as_secs() / u64::from(shape.limit)).max(1)
    }

    /// Remove per-principal limiters on disconnect.
    pub fn remove_principal(&self, user_id: &str, socket_id: &str) {
        self.message_send.remove(user_id);
        self.friend_request.remove(user_id);
        self.invite_create.remove(user_id);
        self.ws_event.remove(socket_id);
    }

    /// Bound memory growth. Called from the periodic maintenance task.
    pub fn cleanup(&self) {
        const MAX_ENTRIES: usize = 10_000;
        fn prune<K: Eq + std::hash::Hash>(name: &str, map: &DashMap<K, DirectRateLimiter>) {
            if map.len() > MAX_ENTRIES {
                debug!(map = name, entries = map.len(), "clearing oversized rate limiter map");
                map.clear();
            }
        }
        prune("message_send", &self.message_send);
        prune("webhook_post", &self.webhook_post);
        prune("friend_request", &self.friend_request);
        prune("invite_create", &self.invite_create);
        prune("auth_login", &self.auth_login);
        prune("ws_event", &self.ws_event);
    }
}

impl Default for RateLimitManager {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Build a governor limiter for "limit per window" with full-limit burst.
fn make_limiter(shape: Bucket) -> DirectRateLimiter {
    let limit = NonZeroU32::new(shape.limit).unwrap_or(NonZeroU32::new(1).unwrap());
    let period = shape
        .window
        .checked_div(shape.limit)
        .unwrap_or(Duration::from_secs(1))
        .max(Duration::from_millis(1));
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(limit))
        .allow_burst(limit);
    GovRateLimiter::direct(quota)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Bucket;

    fn tight_config() -> RateLimitConfig {
        RateLimitConfig {
            message_send: Bucket::new(3, 60),
            webhook_post: Bucket::new(10, 10),
            friend_request: Bucket::new(2, 3_600),
            invite_create: Bucket::new(2, 3_600),
            auth_login: Bucket::new(2, 10),
            ws_event: Bucket::new(5, 1),
        }
    }

    #[test]
    fn burst_is_the_window_limit() {
        let manager = RateLimitManager::new(tight_config());
        for _ in 0..3 {
            assert!(manager.check(RateBucket::MessageSend, "u_1"));
        }
        assert!(!manager.check(RateBucket::MessageSend, "u_1"));
    }

    #[test]
    fn webhook_bucket_overflows_at_limit() {
        let manager = RateLimitManager::new(tight_config());
        let mut rejected = 0;
        for _ in 0..12 {
            if !manager.check(RateBucket::WebhookPost, "wh_1") {
                rejected += 1;
            }
        }
        assert!(rejected >= 1, "12 rapid posts must trip a 10/10s bucket");
    }

    #[test]
    fn principals_are_independent() {
        let manager = RateLimitManager::new(tight_config());
        for _ in 0..2 {
            assert!(manager.check(RateBucket::FriendRequest, "u_1"));
        }
        assert!(!manager.check(RateBucket::FriendRequest, "u_1"));
        assert!(manager.check(RateBucket::FriendRequest, "u_2"));
    }

    #[test]
    fn login_bucket_is_per_ip() {
        let manager = RateLimitManager::new(tight_config());
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(manager.check_login(ip));
        assert!(manager.check_login(ip));
        assert!(!manager.check_login(ip));
        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(manager.check_login(other));
    }

    #[test]
    fn removal_resets_a_principal() {
        let manager = RateLimitManager::new(tight_config());
        for _ in 0..3 {
            manager.check(RateBucket::MessageSend, "u_1");
        }
        assert!(!manager.check(RateBucket::MessageSend, "u_1"));
        manager.remove_principal("u_1", "sock-1");
        assert!(manager.check(RateBucket::MessageSend, "u_1"));
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let manager = RateLimitManager::new(tight_config());
        assert!(manager.retry_after_secs(RateBucket::WebhookPost) >= 1);
    }
}
