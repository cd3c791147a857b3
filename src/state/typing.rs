//! Ephemeral typing indicators with auto-expiry.
//!
//! One scheduler sweep services every entry; there are no per-entry timers.
//! A `start` within the window refreshes the deadline.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Typing entries expire eight seconds after the last refresh.
pub const TYPING_TTL: Duration = Duration::from_secs(8);

#[derive(Default)]
pub struct TypingTracker {
    /// (channel, user) -> deadline.
    entries: DashMap<(String, String), Instant>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record typing. Returns true when this starts a fresh indicator
    /// (a refresh within the window returns false).
    pub fn start(&self, channel_id: &str, user_id: &str) -> bool {
        self.entries
            .insert(
                (channel_id.to_string(), user_id.to_string()),
                Instant::now() + TYPING_TTL,
            )
            .is_none()
    }

    pub fn stop(&self, channel_id: &str, user_id: &str) -> bool {
        self.entries
            .remove(&(channel_id.to_string(), user_id.to_string()))
            .is_some()
    }

    /// Channels the user is currently typing in; used on disconnect to fan
    /// `typing:stop` everywhere at once.
    pub fn stop_all(&self, user_id: &str) -> Vec<String> {
        let channels: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().1 == user_id)
            .map(|entry| entry.key().0.clone())
            .collect();
        for channel_id in &channels {
            self.entries
                .remove(&(channel_id.clone(), user_id.to_string()));
        }
        channels
    }

    /// Expire overdue entries, returning (channel, user) pairs that need a
    /// `typing:stop` fan-out.
    pub fn sweep(&self) -> Vec<(String, String)> {
        let now = Instant::now();
        let expired: Vec<(String, String)> = self
            .entries
            .iter()
            .filter(|entry| *entry.value() <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_is_fresh_once() {
        let typing = TypingTracker::new();
        assert!(typing.start("c_1", "u_1"));
        assert!(!typing.start("c_1", "u_1"));
        assert!(typing.stop("c_1", "u_1"));
        assert!(typing.start("c_1", "u_1"));
    }

    #[test]
    fn stop_all_collects_every_channel() {
        let typing = TypingTracker::new();
        typing.start("c_1", "u_1");
        typing.start("c_2", "u_1");
        typing.start("c_1", "u_2");

        let mut channels = typing.stop_all("u_1");
        channels.sort();
        assert_eq!(channels, vec!["c_1".to_string(), "c_2".to_string()]);
        // u_2's entry survives.
        assert!(!typing.start("c_1", "u_2"));
    }

    #[test]
    fn sweep_only_takes_expired() {
        let typing = TypingTracker::new();
        typing.start("c_1", "u_1");
        assert!(typing.sweep().is_empty());

        // Force the deadline into the past.
        typing
            .entries
            .insert(("c_1".into(), "u_1".into()), Instant::now() - Duration::from_secs(1));
        let expired = typing.sweep();
        assert_eq!(expired, vec![("c_1".to_string(), "u_1".to_string())]);
    }
}
