//! Transient voice-room rosters.
//!
//! Memory-only: channel id -> ordered peer list plus screen-share state.
//! Each room sits behind its own mutex, taken briefly for join/leave/signal
//! validation and never held across an outbound write. Rooms are evicted
//! when the last peer leaves. Voice does not survive reconnect; a fresh
//! socket re-joins explicitly.

use dashmap::DashMap;
use nexus_proto::model::VoicePeerWire;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

/// One socket inside a voice room.
#[derive(Debug, Clone)]
pub struct VoicePeer {
    pub socket_id: String,
    pub user_id: String,
    pub username: String,
    pub is_muted: bool,
    pub is_deafened: bool,
    pub joined_at: Instant,
    pub screen_sharing: bool,
    pub watchers: HashSet<String>,
}

impl VoicePeer {
    pub fn new(socket_id: &str, user_id: &str, username: &str, muted: bool, deafened: bool) -> Self {
        Self {
            socket_id: socket_id.to_string(),
            user_id: user_id.to_string(),
            username: username.to_string(),
            is_muted: muted,
            is_deafened: deafened,
            joined_at: Instant::now(),
            screen_sharing: false,
            watchers: HashSet::new(),
        }
    }

    pub fn wire(&self) -> VoicePeerWire {
        VoicePeerWire {
            socket_id: self.socket_id.clone(),
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            is_muted: self.is_muted,
            is_deafened: self.is_deafened,
            screen_sharing: self.screen_sharing,
        }
    }
}

#[derive(Debug, Default)]
struct VoiceRoom {
    peers: Vec<VoicePeer>,
    screen_sharer: Option<String>,
}

/// Outcome of a peer leaving, for the caller's fan-out.
#[derive(Debug)]
pub struct VoiceLeave {
    pub channel_id: String,
    pub socket_id: String,
    pub user_id: String,
    pub was_sharer: bool,
    pub now_empty: bool,
}

#[derive(Default)]
pub struct VoiceRooms {
    rooms: DashMap<String, Mutex<VoiceRoom>>,
    /// socket -> channel reverse index.
    socket_room: DashMap<String, String>,
    /// user -> last (muted, deafened), restored on the next join.
    saved_prefs: DashMap<String, (bool, bool)>,
    /// dm channel -> socket that started the ringing call.
    call_initiator: DashMap<String, String>,
}

impl VoiceRooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer. Returns the pre-existing peer snapshots and the current
    /// screen sharer so the joiner can initiate PeerConnections.
    pub fn join(&self, channel_id: &str, peer: VoicePeer) -> (Vec<VoicePeerWire>, Option<String>) {
        let socket_id = peer.socket_id.clone();
        let room = self
            .rooms
            .entry(channel_id.to_string())
            .or_default();
        let mut room = room.lock();
        let existing: Vec<VoicePeerWire> = room.peers.iter().map(VoicePeer::wire).collect();
        let sharer = room.screen_sharer.clone();
        room.peers.retain(|p| p.socket_id != socket_id);
        room.peers.push(peer);
        drop(room);
        self.socket_room
            .insert(socket_id, channel_id.to_string());
        (existing, sharer)
    }

    /// Remove a socket from its room, evicting the room when it empties.
    pub fn leave(&self, socket_id: &str) -> Option<VoiceLeave> {
        let (_, channel_id) = self.socket_room.remove(socket_id)?;
        let mut outcome = None;
        if let Some(room) = self.rooms.get(&channel_id) {
            let mut room = room.lock();
            if let Some(pos) = room.peers.iter().position(|p| p.socket_id == socket_id) {
                let peer = room.peers.remove(pos);
                let was_sharer = room.screen_sharer.as_deref() == Some(socket_id);
                if was_sharer {
                    room.screen_sharer = None;
                }
                // Drop this socket from every watcher set.
                for other in &mut room.peers {
                    other.watchers.remove(socket_id);
                }
                outcome = Some(VoiceLeave {
                    channel_id: channel_id.clone(),
                    socket_id: socket_id.to_string(),
                    user_id: peer.user_id,
                    was_sharer,
                    now_empty: room.peers.is_empty(),
                });
            }
        }
        if outcome.as_ref().is_some_and(|o| o.now_empty) {
            self.rooms
                .remove_if(&channel_id, |_, room| room.lock().peers.is_empty());
        }
        outcome
    }

    pub fn room_of(&self, socket_id: &str) -> Option<String> {
        self.socket_room.get(socket_id).map(|c| c.clone())
    }

    /// Last mute/deafen state the user had, applied on the next join.
    pub fn saved_prefs(&self, user_id: &str) -> (bool, bool) {
        self.saved_prefs
            .get(user_id)
            .map(|p| *p)
            .unwrap_or((false, false))
    }

    pub fn remember_prefs(&self, user_id: &str, muted: bool, deafened: bool) {
        self.saved_prefs
            .insert(user_id.to_string(), (muted, deafened));
    }

    /// Track which socket started a DM call; the call ends when it leaves.
    pub fn set_call_initiator(&self, channel_id: &str, socket_id: &str) {
        self.call_initiator
            .insert(channel_id.to_string(), socket_id.to_string());
    }

    pub fn call_initiator(&self, channel_id: &str) -> Option<String> {
        self.call_initiator.get(channel_id).map(|s| s.clone())
    }

    pub fn clear_call(&self, channel_id: &str) {
        self.call_initiator.remove(channel_id);
    }

    /// Are both sockets currently in the same voice room?
    pub fn same_room(&self, a: &str, b: &str) -> bool {
        match (self.room_of(a), self.room_of(b)) {
            (Some(room_a), Some(room_b)) => room_a == room_b,
            _ => false,
        }
    }

    pub fn set_muted(&self, socket_id: &str, is_muted: bool) -> Option<String> {
        self.with_peer(socket_id, |peer| peer.is_muted = is_muted)
    }

    /// Deafening forces mute; undeafening leaves mute as-is.
    pub fn set_deafened(&self, socket_id: &str, is_deafened: bool) -> Option<(String, bool)> {
        let mut muted = false;
        let channel = self.with_peer(socket_id, |peer| {
            peer.is_deafened = is_deafened;
            if is_deafened {
                peer.is_muted = true;
            }
            muted = peer.is_muted;
        })?;
        Some((channel, muted))
    }

    /// Claim the room's single screen-share slot. Fails when someone else
    /// already shares.
    pub fn start_share(&self, socket_id: &str) -> Option<String> {
        let channel_id = self.room_of(socket_id)?;
        let room = self.rooms.get(&channel_id)?;
        let mut room = room.lock();
        if room
            .screen_sharer
            .as_deref()
            .is_some_and(|sharer| sharer != socket_id)
        {
            return None;
        }
        room.screen_sharer = Some(socket_id.to_string());
        if let Some(peer) = room.peers.iter_mut().find(|p| p.socket_id == socket_id) {
            peer.screen_sharing = true;
        }
        Some(channel_id)
    }

    pub fn stop_share(&self, socket_id: &str) -> Option<String> {
        let channel_id = self.room_of(socket_id)?;
        let room = self.rooms.get(&channel_id)?;
        let mut room = room.lock();
        if room.screen_sharer.as_deref() != Some(socket_id) {
            return None;
        }
        room.screen_sharer = None;
        if let Some(peer) = room.peers.iter_mut().find(|p| p.socket_id == socket_id) {
            peer.screen_sharing = false;
            peer.watchers.clear();
        }
        Some(channel_id)
    }

    /// Register `viewer` as a watcher of `sharer`. Both must share a room
    /// and the sharer must actually be sharing.
    pub fn watch(&self, sharer_id: &str, viewer_id: &str) -> bool {
        if !self.same_room(sharer_id, viewer_id) {
            return false;
        }
        self.with_peer_checked(sharer_id, |peer| {
            if peer.screen_sharing {
                peer.watchers.insert(viewer_id.to_string());
                true
            } else {
                false
            }
        })
        .unwrap_or(false)
    }

    pub fn unwatch(&self, sharer_id: &str, viewer_id: &str) -> bool {
        self.with_peer_checked(sharer_id, |peer| peer.watchers.remove(viewer_id))
            .unwrap_or(false)
    }

    /// Roster of one room.
    pub fn roster(&self, channel_id: &str) -> Vec<VoicePeerWire> {
        self.rooms
            .get(channel_id)
            .map(|room| room.lock().peers.iter().map(VoicePeer::wire).collect())
            .unwrap_or_default()
    }

    /// Every occupied room, for `init` hydration.
    pub fn rosters(&self) -> BTreeMap<String, Vec<VoicePeerWire>> {
        self.rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().lock().peers.iter().map(VoicePeer::wire).collect()))
            .collect()
    }

    /// Every socket currently tracked in some voice room.
    pub fn tracked_sockets(&self) -> Vec<String> {
        self.socket_room
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Belt-and-braces sweep: drop peers whose socket is gone. The
    /// disconnect hook is the primary cleanup path.
    pub fn sweep_dead(&self, is_alive: impl Fn(&str) -> bool) -> Vec<VoiceLeave> {
        let dead: Vec<String> = self
            .tracked_sockets()
            .into_iter()
            .filter(|socket_id| !is_alive(socket_id))
            .collect();
        dead.into_iter().filter_map(|socket_id| self.leave(&socket_id)).collect()
    }

    fn with_peer(&self, socket_id: &str, f: impl FnOnce(&mut VoicePeer)) -> Option<String> {
        let channel_id = self.room_of(socket_id)?;
        let room = self.rooms.get(&channel_id)?;
        let mut room = room.lock();
        let peer = room.peers.iter_mut().find(|p| p.socket_id == socket_id)?;
        f(peer);
        Some(channel_id)
    }

    fn with_peer_checked<T>(&self, socket_id: &str, f: impl FnOnce(&mut VoicePeer) -> T) -> Option<T> {
        let channel_id = self.room_of(socket_id)?;
        let room = self.rooms.get(&channel_id)?;
        let mut room = room.lock();
        let peer = room.peers.iter_mut().find(|p| p.socket_id == socket_id)?;
        Some(f(peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(socket: &str, user: &str) -> VoicePeer {
        VoicePeer::new(socket, user, user, false, false)
    }

    #[test]
    fn join_returns_existing_peers() {
        let rooms = VoiceRooms::new();
        let (existing, sharer) = rooms.join("c_v", peer("a", "u_1"));
        assert!(existing.is_empty());
        assert!(sharer.is_none());

        let (existing, _) = rooms.join("c_v", peer("b", "u_2"));
        assert_eq!(existing.len(), 1);
        assert_eq!(existing[0].socket_id, "a");
        assert!(rooms.same_room("a", "b"));
    }

    #[test]
    fn last_leaver_evicts_the_room() {
        let rooms = VoiceRooms::new();
        rooms.join("c_v", peer("a", "u_1"));
        rooms.join("c_v", peer("b", "u_2"));

        let first = rooms.leave("a").unwrap();
        assert!(!first.now_empty);
        let last = rooms.leave("b").unwrap();
        assert!(last.now_empty);
        assert!(rooms.roster("c_v").is_empty());
        assert!(rooms.leave("b").is_none());
    }

    #[test]
    fn deafen_forces_mute() {
        let rooms = VoiceRooms::new();
        rooms.join("c_v", peer("a", "u_1"));
        let (_, muted) = rooms.set_deafened("a", true).unwrap();
        assert!(muted);
        let roster = rooms.roster("c_v");
        assert!(roster[0].is_muted && roster[0].is_deafened);
    }

    #[test]
    fn single_sharer_per_room() {
        let rooms = VoiceRooms::new();
        rooms.join("c_v", peer("a", "u_1"));
        rooms.join("c_v", peer("b", "u_2"));
        assert!(rooms.start_share("a").is_some());
        assert!(rooms.start_share("b").is_none());
        assert!(rooms.stop_share("b").is_none());
        assert!(rooms.stop_share("a").is_some());
        assert!(rooms.start_share("b").is_some());
    }

    #[test]
    fn sharer_leave_clears_share() {
        let rooms = VoiceRooms::new();
        rooms.join("c_v", peer("a", "u_1"));
        rooms.join("c_v", peer("b", "u_2"));
        rooms.start_share("a");
        assert!(rooms.watch("a", "b"));

        let leave = rooms.leave("a").unwrap();
        assert!(leave.was_sharer);
        let (_, sharer) = rooms.join("c_v", peer("c", "u_3"));
        assert!(sharer.is_none());
    }

    #[test]
    fn watch_requires_sharing_and_same_room() {
        let rooms = VoiceRooms::new();
        rooms.join("c_v", peer("a", "u_1"));
        rooms.join("c_v", peer("b", "u_2"));
        rooms.join("c_other", peer("x", "u_9"));

        assert!(!rooms.watch("a", "b"), "not sharing yet");
        rooms.start_share("a");
        assert!(!rooms.watch("a", "x"), "different room");
        assert!(rooms.watch("a", "b"));
        assert!(rooms.unwatch("a", "b"));
        assert!(!rooms.unwatch("a", "b"));
    }

    #[test]
    fn sweep_removes_dead_sockets() {
        let rooms = VoiceRooms::new();
        rooms.join("c_v", peer("a", "u_1"));
        rooms.join("c_v", peer("b", "u_2"));
        let leaves = rooms.sweep_dead(|socket| socket == "b");
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].socket_id, "a");
        assert_eq!(rooms.roster("c_v").len(), 1);
    }
}
