//! Room registry: pub/sub by opaque key with a reverse index for O(k)
//! disconnect cleanup.
//!
//! The registry is the only component that writes to sockets. Services
//! resolve a key, the registry fans the event to every subscribed socket's
//! outbound queue.

use super::socket::SocketHandle;
use dashmap::DashMap;
use nexus_proto::ServerEvent;
use std::collections::HashSet;
use std::sync::Arc;

pub fn server_key(server_id: &str) -> String {
    format!("server:{server_id}")
}

pub fn channel_key(channel_id: &str) -> String {
    format!("channel:{channel_id}")
}

pub fn user_key(user_id: &str) -> String {
    format!("user:{user_id}")
}

pub fn voice_key(channel_id: &str) -> String {
    format!("voice:{channel_id}")
}

pub fn personal_key(user_id: &str) -> String {
    format!("personal:{user_id}")
}

#[derive(Default)]
pub struct RoomRegistry {
    /// key -> subscribed sockets.
    rooms: DashMap<String, HashSet<String>>,
    /// socket -> keys it joined (reverse index).
    by_socket: DashMap<String, HashSet<String>>,
    /// socket -> outbound handle.
    sockets: DashMap<String, SocketHandle>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket's outbound handle. Must precede any `join`.
    pub fn register_socket(&self, handle: SocketHandle) {
        self.sockets.insert(handle.socket_id.clone(), handle);
    }

    /// Remove the socket from every room and drop its handle.
    pub fn unregister_socket(&self, socket_id: &str) {
        if let Some((_, keys)) = self.by_socket.remove(socket_id) {
            for key in keys {
                if let Some(mut members) = self.rooms.get_mut(&key) {
                    members.remove(socket_id);
                    if members.is_empty() {
                        drop(members);
                        self.rooms.remove_if(&key, |_, members| members.is_empty());
                    }
                }
            }
        }
        self.sockets.remove(socket_id);
    }

    pub fn socket(&self, socket_id: &str) -> Option<SocketHandle> {
        self.sockets.get(socket_id).map(|h| h.clone())
    }

    pub fn join(&self, socket_id: &str, key: &str) {
        self.rooms
            .entry(key.to_string())
            .or_default()
            .insert(socket_id.to_string());
        self.by_socket
            .entry(socket_id.to_string())
            .or_default()
            .insert(key.to_string());
    }

    pub fn leave(&self, socket_id: &str, key: &str) {
        if let Some(mut members) = self.rooms.get_mut(key) {
            members.remove(socket_id);
        }
        if let Some(mut keys) = self.by_socket.get_mut(socket_id) {
            keys.remove(key);
        }
    }

    pub fn members_of(&self, key: &str) -> HashSet<String> {
        self.rooms
            .get(key)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    /// Fan an event to every socket subscribed to `key`.
    pub fn emit_to(&self, key: &str, event: &ServerEvent) {
        self.emit_to_except(key, event, None);
    }

    /// Fan an event to `key`, optionally skipping one socket (the sender).
    pub fn emit_to_except(&self, key: &str, event: &ServerEvent, except: Option<&str>) {
        let members = self.members_of(key);
        if members.is_empty() {
            return;
        }
        let event = Arc::new(event.clone());
        for socket_id in members {
            if except.is_some_and(|skip| skip == socket_id) {
                continue;
            }
            self.deliver(&socket_id, Arc::clone(&event));
        }
    }

    /// Deliver to every socket of one user.
    pub fn emit_to_user(&self, user_id: &str, event: &ServerEvent) {
        self.emit_to(&user_key(user_id), event);
    }

    /// Deliver to exactly one socket.
    pub fn emit_to_socket(&self, socket_id: &str, event: &ServerEvent) {
        self.deliver(socket_id, Arc::new(event.clone()));
    }

    fn deliver(&self, socket_id: &str, event: Arc<ServerEvent>) {
        if let Some(handle) = self.sockets.get(socket_id) {
            // A failed delivery never aborts the other subscribers'.
            if handle.deliver(event) {
                crate::metrics::FANOUT_DELIVERIES.inc();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::socket::SocketHandle;

    fn attach(registry: &RoomRegistry, socket_id: &str) -> tokio::sync::mpsc::Receiver<Arc<ServerEvent>> {
        let (handle, rx) = SocketHandle::new(socket_id.into());
        registry.register_socket(handle);
        rx
    }

    fn error_event() -> ServerEvent {
        ServerEvent::Error {
            message: "m".into(),
            kind: "validation".into(),
        }
    }

    #[tokio::test]
    async fn fan_out_reaches_only_subscribers() {
        let registry = RoomRegistry::new();
        let mut rx_a = attach(&registry, "a");
        let mut rx_b = attach(&registry, "b");
        registry.join("a", "channel:c_1");

        registry.emit_to("channel:c_1", &error_event());

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn except_skips_the_sender() {
        let registry = RoomRegistry::new();
        let mut rx_a = attach(&registry, "a");
        let mut rx_b = attach(&registry, "b");
        registry.join("a", "channel:c_1");
        registry.join("b", "channel:c_1");

        registry.emit_to_except("channel:c_1", &error_event(), Some("a"));

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unregister_cleans_reverse_index() {
        let registry = RoomRegistry::new();
        let _rx = attach(&registry, "a");
        registry.join("a", "channel:c_1");
        registry.join("a", "server:s_1");

        registry.unregister_socket("a");

        assert!(registry.members_of("channel:c_1").is_empty());
        assert!(registry.members_of("server:s_1").is_empty());
        assert!(registry.socket("a").is_none());
    }
}
