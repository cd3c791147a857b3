//! Wire types for the Nexus realtime core.
//!
//! Everything a client and the server agree on lives here: the tagged event
//! enums exchanged over the WebSocket, the data-transfer models they carry,
//! the permission bit-set, and id generation.

pub mod event;
pub mod id;
pub mod model;
pub mod perms;

pub use event::{ClientEvent, ServerEvent};
pub use perms::Permissions;
