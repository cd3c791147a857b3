//! Shared in-memory state.
//!
//! The [`Hub`] is the central container; the other modules are the domain
//! trackers it owns. Locks here are never held across await points: callers
//! collect targets under the lock, release, then emit.

mod hub;
mod presence;
mod rooms;
mod socket;
mod typing;
mod voice;

pub use hub::Hub;
pub use presence::{IDLE_AFTER, PresenceTracker};
pub use rooms::{RoomRegistry, channel_key, personal_key, server_key, user_key, voice_key};
pub use socket::{OUTBOUND_HIGH_WATER, SocketHandle, SocketState};
pub use typing::TypingTracker;
pub use voice::{VoiceLeave, VoicePeer, VoiceRooms};
