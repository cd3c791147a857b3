//! Per-user presence aggregated over all of a user's sockets.
//!
//! A user is online iff at least one socket is connected and they have not
//! declared `offline`. `online` degrades to `idle` after ten minutes without
//! a client activity event; the periodic sweep applies that transition.

use dashmap::DashMap;
use nexus_proto::model::UserStatus;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Idle threshold: ten minutes without activity.
pub const IDLE_AFTER: Duration = Duration::from_secs(10 * 60);

#[derive(Default)]
pub struct PresenceTracker {
    sockets_of: DashMap<String, HashSet<String>>,
    declared: DashMap<String, UserStatus>,
    last_activity: DashMap<String, Instant>,
    idle: DashMap<String, bool>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a socket bind. Returns true when this is the user's first
    /// live socket (offline -> online transition).
    pub fn socket_connected(&self, user_id: &str, socket_id: &str, declared: UserStatus) -> bool {
        let mut sockets = self.sockets_of.entry(user_id.to_string()).or_default();
        let came_online = sockets.is_empty();
        sockets.insert(socket_id.to_string());
        drop(sockets);
        self.declared.insert(user_id.to_string(), declared);
        self.last_activity.insert(user_id.to_string(), Instant::now());
        self.idle.insert(user_id.to_string(), false);
        if came_online {
            crate::metrics::ONLINE_USERS.inc();
        }
        came_online
    }

    /// Record a socket drop. Returns true when it was the user's last
    /// socket (online -> offline transition).
    pub fn socket_disconnected(&self, user_id: &str, socket_id: &str) -> bool {
        let went_offline = match self.sockets_of.get_mut(user_id) {
            Some(mut sockets) => {
                sockets.remove(socket_id);
                sockets.is_empty()
            }
            None => false,
        };
        if went_offline {
            self.sockets_of.remove(user_id);
            self.idle.remove(user_id);
            self.last_activity.remove(user_id);
            crate::metrics::ONLINE_USERS.dec();
        }
        went_offline
    }

    pub fn set_declared(&self, user_id: &str, status: UserStatus) {
        self.declared.insert(user_id.to_string(), status);
    }

    /// Client activity: resets the idle clock and clears idleness.
    /// Returns true when the user left the idle state.
    pub fn touch(&self, user_id: &str) -> bool {
        self.last_activity
            .insert(user_id.to_string(), Instant::now());
        self.idle
            .insert(user_id.to_string(), false)
            .unwrap_or(false)
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.sockets_of
            .get(user_id)
            .is_some_and(|sockets| !sockets.is_empty())
    }

    /// Effective status: offline without sockets or by declaration, else
    /// the declared status with automatic idle layered on `online`.
    pub fn effective(&self, user_id: &str) -> UserStatus {
        if !self.is_connected(user_id) {
            return UserStatus::Offline;
        }
        let declared = self
            .declared
            .get(user_id)
            .map(|s| *s)
            .unwrap_or(UserStatus::Online);
        match declared {
            UserStatus::Offline => UserStatus::Offline,
            UserStatus::Online => {
                if self.idle.get(user_id).is_some_and(|idle| *idle) {
                    UserStatus::Idle
                } else {
                    UserStatus::Online
                }
            }
            other => other,
        }
    }

    /// Ids of every connected user.
    pub fn online_user_ids(&self) -> Vec<String> {
        self.sockets_of
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Mark users idle whose activity clock passed the threshold. Returns
    /// the users that transitioned (for `user:updated` fan-out).
    pub fn sweep_idle(&self, idle_after: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut transitioned = Vec::new();
        for entry in self.last_activity.iter() {
            let user_id = entry.key();
            if now.duration_since(*entry.value()) < idle_after {
                continue;
            }
            if !self.is_connected(user_id) {
                continue;
            }
            let was_idle = self
                .idle
                .insert(user_id.clone(), true)
                .unwrap_or(false);
            if !was_idle {
                transitioned.push(user_id.clone());
            }
        }
        transitioned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let presence = PresenceTracker::new();
        assert!(presence.socket_connected("u_1", "a", UserStatus::Online));
        assert!(!presence.socket_connected("u_1", "b", UserStatus::Online));
        assert_eq!(presence.effective("u_1"), UserStatus::Online);

        assert!(!presence.socket_disconnected("u_1", "a"));
        assert!(presence.socket_disconnected("u_1", "b"));
        assert_eq!(presence.effective("u_1"), UserStatus::Offline);
    }

    #[test]
    fn dnd_declaration_wins_while_connected() {
        let presence = PresenceTracker::new();
        presence.socket_connected("u_1", "a", UserStatus::Online);
        presence.set_declared("u_1", UserStatus::Dnd);
        assert_eq!(presence.effective("u_1"), UserStatus::Dnd);
    }

    #[test]
    fn declared_offline_hides_the_user() {
        let presence = PresenceTracker::new();
        presence.socket_connected("u_1", "a", UserStatus::Offline);
        assert_eq!(presence.effective("u_1"), UserStatus::Offline);
    }

    #[test]
    fn idle_sweep_transitions_once() {
        let presence = PresenceTracker::new();
        presence.socket_connected("u_1", "a", UserStatus::Online);
        // Zero threshold: everything is instantly idle.
        let first = presence.sweep_idle(Duration::ZERO);
        assert_eq!(first, vec!["u_1".to_string()]);
        assert_eq!(presence.effective("u_1"), UserStatus::Idle);
        // Second sweep reports nothing new.
        assert!(presence.sweep_idle(Duration::ZERO).is_empty());
        // Activity clears it.
        assert!(presence.touch("u_1"));
        assert_eq!(presence.effective("u_1"), UserStatus::Online);
    }
}
