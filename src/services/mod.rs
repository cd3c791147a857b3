//! Domain services.
//!
//! Each service is a set of async functions over the [`Hub`]: authorize,
//! mutate the store, then fan out through the room registry. Services return
//! typed errors; the dispatcher maps them onto wire `error` events.

pub mod channels;
pub mod dms;
pub mod mentions;
pub mod messages;
pub mod servers;
pub mod session;
pub mod social;
pub mod voice;
pub mod webhooks;

use crate::error::AppResult;
use crate::state::{Hub, server_key};
use nexus_proto::ServerEvent;
use nexus_proto::model::{DmChannelWire, DmState, FriendshipState, FriendshipWire, ServerSnapshot};
use crate::store::{ChannelRow, DmParticipantRow, FriendshipRow};

/// Store snapshot with live presence overlaid on member statuses.
pub async fn snapshot_with_presence(hub: &Hub, server_id: &str) -> AppResult<ServerSnapshot> {
    let mut snapshot = hub.store.servers().snapshot(server_id).await?;
    for member in &mut snapshot.members {
        member.user.status = hub.presence.effective(&member.user.id);
    }
    Ok(snapshot)
}

/// Fan the full server snapshot to everyone subscribed to the server.
pub async fn broadcast_server_update(hub: &Hub, server_id: &str) -> AppResult<ServerSnapshot> {
    let snapshot = snapshot_with_presence(hub, server_id).await?;
    hub.rooms.emit_to(
        &server_key(server_id),
        &ServerEvent::ServerUpdated(Box::new(snapshot.clone())),
    );
    Ok(snapshot)
}

/// Ids of the server's members that are currently online.
pub async fn online_members_of(hub: &Hub, server_id: &str) -> AppResult<Vec<String>> {
    let members = hub.store.servers().member_ids(server_id).await?;
    Ok(members
        .into_iter()
        .filter(|user_id| hub.presence.is_connected(user_id))
        .collect())
}

/// Wire form of a DM channel from one participant's point of view.
pub async fn dm_channel_wire(
    hub: &Hub,
    channel: &ChannelRow,
    viewer: &DmParticipantRow,
) -> AppResult<DmChannelWire> {
    let participants = hub.store.dms().participants_of(&channel.id).await?;
    let mut profiles = Vec::with_capacity(participants.len());
    for participant in &participants {
        profiles.push(hub.profile(&participant.user_id).await?);
    }
    let unread = hub
        .store
        .messages()
        .count_after(&channel.id, viewer.last_read_id.as_deref())
        .await?;
    Ok(DmChannelWire {
        channel: channel.wire(),
        participants: profiles,
        state: if viewer.state == "request" {
            DmState::Request
        } else {
            DmState::Open
        },
        archived: viewer.archived != 0,
        unread,
    })
}

/// Subscribe every live socket of a user to a room key.
pub fn subscribe_user_sockets(hub: &Hub, user_id: &str, key: &str) {
    for socket_id in hub.rooms.members_of(&crate::state::user_key(user_id)) {
        hub.rooms.join(&socket_id, key);
    }
}

/// Remove every live socket of a user from a room key.
pub fn unsubscribe_user_sockets(hub: &Hub, user_id: &str, key: &str) {
    for socket_id in hub.rooms.members_of(&crate::state::user_key(user_id)) {
        hub.rooms.leave(&socket_id, key);
    }
}

/// Wire form of a friendship edge with both profiles resolved.
pub async fn friendship_wire(hub: &Hub, row: &FriendshipRow) -> AppResult<FriendshipWire> {
    Ok(FriendshipWire {
        id: row.id.clone(),
        requester: hub.profile(&row.requester_id).await?,
        target: hub.profile(&row.target_id).await?,
        state: match row.state.as_str() {
            "accepted" => FriendshipState::Accepted,
            "rejected" => FriendshipState::Rejected,
            _ => FriendshipState::Pending,
        },
    })
}
