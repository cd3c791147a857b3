//! The dispatcher: one decode path per socket.
//!
//! Pipeline: decode -> identify principal -> rate-limit -> route to the
//! owning service -> queue replies on the sender's outbound channel.
//! Routing is a match over the compile-time event enumeration, so an
//! unknown event name is data (ignored) while a missing route is a build
//! error. Handler panics are recovered and surfaced as `error{internal}`;
//! they never kill the socket.

use crate::error::{AppError, AppResult};
use crate::security::rate_limit::RateBucket;
use crate::services;
use crate::services::messages::Draft;
use crate::state::{Hub, SocketState};
use futures_util::FutureExt;
use nexus_proto::{ClientEvent, ServerEvent};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, error};

/// Default handler deadline (store-touching events).
const HANDLER_DEADLINE: Duration = Duration::from_secs(10);
/// Tighter deadline for voice signaling relays.
const SIGNAL_DEADLINE: Duration = Duration::from_secs(5);

/// Outcome the connection loop acts on.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Auth failures close the socket after the error frame.
    pub close: bool,
}

/// Handle one inbound event for one socket.
pub async fn dispatch(
    hub: &Hub,
    socket_id: &str,
    state: &mut SocketState,
    event: ClientEvent,
) -> Outcome {
    // Unknown event names are silently ignored (forward-compatibility).
    if matches!(event, ClientEvent::Unknown) {
        return Outcome::default();
    }
    crate::metrics::EVENTS_DISPATCHED
        .with_label_values(&[event.name()])
        .inc();

    // Soft per-socket firehose bucket ahead of everything else.
    if !hub.rate_limits.check(RateBucket::WsEventAny, socket_id) {
        reject(hub, socket_id, &AppError::RateLimited);
        return Outcome::default();
    }

    if state.principal.is_none() && !services::session::allowed_unauthenticated(&event) {
        reject(hub, socket_id, &AppError::AuthInvalid);
        return Outcome { close: true };
    }

    // Per-event buckets, keyed by principal.
    if let Some(bucket) = event_bucket(&event) {
        let key = state.user_id().unwrap_or(socket_id).to_string();
        if !hub.rate_limits.check(bucket, &key) {
            reject(hub, socket_id, &AppError::RateLimited);
            return Outcome::default();
        }
    }

    let deadline = match &event {
        ClientEvent::WebrtcOffer { .. }
        | ClientEvent::WebrtcAnswer { .. }
        | ClientEvent::WebrtcIce { .. } => SIGNAL_DEADLINE,
        _ => HANDLER_DEADLINE,
    };

    let name = event.name();
    let routed = AssertUnwindSafe(route(hub, socket_id, state, event))
        .catch_unwind();
    let result = match tokio::time::timeout(deadline, routed).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "opaque panic payload".into());
            error!(event = name, socket = %socket_id, detail = %detail, "handler panicked");
            Err(AppError::Internal(format!("panic in {name}")))
        }
        Err(_) => {
            error!(event = name, socket = %socket_id, "handler deadline exceeded");
            Err(AppError::Internal(format!("deadline exceeded in {name}")))
        }
    };

    match result {
        Ok(replies) => {
            for reply in replies {
                hub.rooms.emit_to_socket(socket_id, &reply);
            }
            Outcome::default()
        }
        Err(err) => {
            debug!(event = name, socket = %socket_id, kind = err.kind(), "event rejected");
            reject(hub, socket_id, &err);
            Outcome {
                close: err.is_fatal(),
            }
        }
    }
}

fn reject(hub: &Hub, socket_id: &str, err: &AppError) {
    crate::metrics::EVENTS_REJECTED
        .with_label_values(&[err.kind()])
        .inc();
    hub.rooms.emit_to_socket(socket_id, &err.to_event());
}

/// Per-event rate bucket, where the design table assigns one.
fn event_bucket(event: &ClientEvent) -> Option<RateBucket> {
    match event {
        ClientEvent::MessageSend { .. } => Some(RateBucket::MessageSend),
        ClientEvent::FriendRequest { .. } => Some(RateBucket::FriendRequest),
        ClientEvent::InviteCreate { .. } => Some(RateBucket::InviteCreate),
        _ => None,
    }
}

/// The route table: event -> service call. Replies are queued on the
/// sender's socket in order.
async fn route(
    hub: &Hub,
    socket_id: &str,
    state: &mut SocketState,
    event: ClientEvent,
) -> AppResult<Vec<ServerEvent>> {
    // Everything below `join` runs with a bound principal.
    let user = state.user_id().unwrap_or_default().to_string();

    match event {
        ClientEvent::Join { token } => {
            let init = services::session::handle_join(hub, socket_id, state, &token).await?;
            Ok(vec![init])
        }
        ClientEvent::ActivityPing => {
            services::session::activity_ping(hub, &user).await?;
            Ok(vec![])
        }
        ClientEvent::StatusSet { status } => {
            services::session::set_status(hub, &user, status).await?;
            Ok(vec![])
        }
        ClientEvent::SettingsUpdate { settings } => {
            services::session::update_settings(hub, &user, &settings).await?;
            Ok(vec![])
        }

        ClientEvent::ChannelJoin { channel_id } => Ok(vec![
            services::messages::open_channel(hub, &user, socket_id, &channel_id).await?,
        ]),
        ClientEvent::MessageFetch {
            channel_id,
            before,
            limit,
        } => Ok(vec![
            services::messages::fetch_older(hub, &user, &channel_id, before.as_deref(), limit)
                .await?,
        ]),
        ClientEvent::MessageSend {
            channel_id,
            content,
            reply_to,
            attachments,
            command_data,
        } => {
            services::messages::send_user_message(
                hub,
                &user,
                &channel_id,
                Draft {
                    content,
                    reply_to,
                    attachments,
                    embeds: Vec::new(),
                    command_data,
                },
            )
            .await?;
            Ok(vec![])
        }
        ClientEvent::MessageEdit {
            message_id,
            content,
        } => {
            services::messages::edit_message(hub, &user, &message_id, content).await?;
            Ok(vec![])
        }
        ClientEvent::MessageDelete { message_id } => {
            services::messages::delete_message(hub, &user, &message_id).await?;
            Ok(vec![])
        }
        ClientEvent::MessageReact {
            message_id,
            emoji,
            op,
        } => {
            services::messages::react(hub, &user, &message_id, &emoji, op).await?;
            Ok(vec![])
        }
        ClientEvent::TypingStart { channel_id } => {
            services::messages::typing_start(hub, &user, socket_id, &channel_id).await?;
            Ok(vec![])
        }

        ClientEvent::ChannelCreate {
            server_id,
            name,
            kind,
            category_id,
        } => {
            services::channels::create_channel(
                hub,
                &user,
                &server_id,
                &name,
                kind,
                category_id.as_deref(),
            )
            .await?;
            Ok(vec![])
        }
        ClientEvent::ChannelUpdate {
            channel_id,
            name,
            description,
            is_private,
        } => {
            services::channels::update_channel(
                hub,
                &user,
                &channel_id,
                name.as_deref(),
                description.as_deref(),
                is_private,
            )
            .await?;
            Ok(vec![])
        }
        ClientEvent::ChannelDelete { channel_id } => {
            services::channels::delete_channel(hub, &user, &channel_id).await?;
            Ok(vec![])
        }
        ClientEvent::ChannelMove {
            channel_id,
            category_id,
            position,
        } => {
            services::channels::move_channel(hub, &user, &channel_id, &category_id, position)
                .await?;
            Ok(vec![])
        }
        ClientEvent::ChannelReorder {
            category_id,
            channel_ids,
        } => {
            services::channels::reorder_channels(hub, &user, &category_id, &channel_ids).await?;
            Ok(vec![])
        }
        ClientEvent::ChannelOverrideSet {
            channel_id,
            subject_kind,
            subject_id,
            allow,
            deny,
        } => {
            services::channels::set_override(
                hub,
                &user,
                &channel_id,
                subject_kind,
                &subject_id,
                allow,
                deny,
            )
            .await?;
            Ok(vec![])
        }
        ClientEvent::CategoryCreate { server_id, name } => {
            services::channels::create_category(hub, &user, &server_id, &name).await?;
            Ok(vec![])
        }
        ClientEvent::CategoryReorder {
            server_id,
            category_ids,
        } => {
            services::channels::reorder_categories(hub, &user, &server_id, &category_ids).await?;
            Ok(vec![])
        }

        ClientEvent::ServerCreate { name } => {
            services::servers::create_server(hub, &user, &name).await?;
            Ok(vec![])
        }
        ClientEvent::ServerRename { server_id, name } => {
            services::servers::rename_server(hub, &user, &server_id, &name).await?;
            Ok(vec![])
        }
        ClientEvent::ServerDelete { server_id } => {
            services::servers::delete_server(hub, &user, &server_id).await?;
            Ok(vec![])
        }
        ClientEvent::ServerLeave { server_id } => {
            services::servers::leave_server(hub, &user, &server_id).await?;
            Ok(vec![])
        }

        ClientEvent::RoleCreate {
            server_id,
            name,
            color,
            permissions,
        } => {
            services::servers::create_role(hub, &user, &server_id, &name, &color, permissions)
                .await?;
            Ok(vec![])
        }
        ClientEvent::RoleUpdate {
            server_id,
            role_id,
            name,
            color,
            permissions,
            position,
        } => {
            services::servers::update_role(
                hub,
                &user,
                &server_id,
                &role_id,
                name.as_deref(),
                color.as_deref(),
                permissions,
                position,
            )
            .await?;
            Ok(vec![])
        }
        ClientEvent::RoleDelete { server_id, role_id } => {
            services::servers::delete_role(hub, &user, &server_id, &role_id).await?;
            Ok(vec![])
        }
        ClientEvent::RoleAssign {
            server_id,
            user_id,
            role_id,
        } => {
            services::servers::set_member_role(hub, &user, &server_id, &user_id, &role_id, true)
                .await?;
            Ok(vec![])
        }
        ClientEvent::RoleUnassign {
            server_id,
            user_id,
            role_id,
        } => {
            services::servers::set_member_role(hub, &user, &server_id, &user_id, &role_id, false)
                .await?;
            Ok(vec![])
        }

        ClientEvent::KickUser { server_id, user_id } => {
            services::servers::kick(hub, &user, &server_id, &user_id).await?;
            Ok(vec![])
        }
        ClientEvent::BanUser { server_id, user_id } => {
            services::servers::ban(hub, &user, &server_id, &user_id).await?;
            Ok(vec![])
        }
        ClientEvent::UnbanUser { server_id, user_id } => {
            services::servers::unban(hub, &user, &server_id, &user_id).await?;
            Ok(vec![])
        }
        ClientEvent::TimeoutUser {
            server_id,
            user_id,
            minutes,
        } => {
            services::servers::timeout(hub, &user, &server_id, &user_id, minutes).await?;
            Ok(vec![])
        }

        ClientEvent::InviteCreate {
            server_id,
            max_uses,
            expires_in_ms,
        } => Ok(vec![
            services::servers::create_invite(hub, &user, &server_id, max_uses, expires_in_ms)
                .await?,
        ]),
        ClientEvent::InvitePeek { code } => {
            Ok(vec![services::servers::peek_invite(hub, &code).await?])
        }
        ClientEvent::InviteUse { code } => {
            Ok(vec![services::servers::use_invite(hub, &user, &code).await?])
        }
        ClientEvent::InviteRevoke { code } => {
            Ok(vec![services::servers::revoke_invite(hub, &user, &code).await?])
        }

        ClientEvent::FriendRequest { target_username } => {
            services::social::request(hub, &user, &target_username).await?;
            Ok(vec![])
        }
        ClientEvent::FriendAccept { request_id } => {
            services::social::accept(hub, &user, &request_id).await?;
            Ok(vec![])
        }
        ClientEvent::FriendReject { request_id } => {
            services::social::reject(hub, &user, &request_id).await?;
            Ok(vec![])
        }
        ClientEvent::FriendRemove { user_id } => {
            services::social::remove(hub, &user, &user_id).await?;
            Ok(vec![])
        }
        ClientEvent::BlockUser { user_id } => {
            services::social::block(hub, &user, &user_id).await?;
            Ok(vec![])
        }
        ClientEvent::UnblockUser { user_id } => {
            services::social::unblock(hub, &user, &user_id).await?;
            Ok(vec![])
        }
        ClientEvent::ReportUser {
            user_id,
            message_id,
            kind,
            description,
        } => Ok(vec![
            services::social::report(hub, &user, &user_id, message_id.as_deref(), kind, &description)
                .await?,
        ]),

        ClientEvent::DmCreate { target_user_id } => {
            // The creation event also fans to both parties' sockets; the
            // direct reply keeps request/response clients simple.
            Ok(vec![services::dms::create_dm(hub, &user, &target_user_id).await?])
        }
        ClientEvent::DmCreateGroup {
            participant_ids,
            name,
        } => Ok(vec![
            services::dms::create_group(hub, &user, &participant_ids, name.as_deref()).await?,
        ]),
        ClientEvent::DmAddParticipant {
            channel_id,
            user_id,
        } => {
            services::dms::add_participant(hub, &user, &channel_id, &user_id).await?;
            Ok(vec![])
        }
        ClientEvent::DmRemoveParticipant {
            channel_id,
            user_id,
        } => {
            services::dms::remove_participant(hub, &user, &channel_id, &user_id).await?;
            Ok(vec![])
        }
        ClientEvent::DmRequestAccept { channel_id } => {
            services::dms::accept_request(hub, &user, &channel_id).await?;
            Ok(vec![])
        }
        ClientEvent::DmRequestReject { channel_id } => {
            services::dms::reject_request(hub, &user, &channel_id).await?;
            Ok(vec![])
        }
        ClientEvent::DmMarkRead {
            channel_id,
            message_id,
        } => {
            services::dms::mark_read(hub, &user, &channel_id, &message_id).await?;
            Ok(vec![])
        }
        ClientEvent::DmArchive { channel_id } => {
            services::dms::archive(hub, &user, &channel_id).await?;
            Ok(vec![])
        }
        ClientEvent::DmDelete { channel_id } => {
            services::dms::delete(hub, &user, &channel_id).await?;
            Ok(vec![])
        }

        ClientEvent::VoiceJoin { channel_id } => Ok(vec![
            services::voice::join(hub, &user, socket_id, &channel_id).await?,
        ]),
        ClientEvent::VoiceLeave => {
            services::voice::leave(hub, socket_id).await?;
            Ok(vec![])
        }
        ClientEvent::VoiceMute { is_muted } => {
            services::voice::set_mute(hub, &user, socket_id, is_muted).await?;
            Ok(vec![])
        }
        ClientEvent::VoiceDeafen { is_deafened } => {
            services::voice::set_deafen(hub, &user, socket_id, is_deafened).await?;
            Ok(vec![])
        }
        ClientEvent::VoiceIceConfig { server_id: _ } => {
            Ok(vec![services::voice::ice_config(hub)])
        }
        ClientEvent::WebrtcOffer { target_id, offer } => {
            services::voice::relay(hub, socket_id, &target_id, services::voice::Signal::Offer, offer)
                .await?;
            Ok(vec![])
        }
        ClientEvent::WebrtcAnswer { target_id, answer } => {
            services::voice::relay(
                hub,
                socket_id,
                &target_id,
                services::voice::Signal::Answer,
                answer,
            )
            .await?;
            Ok(vec![])
        }
        ClientEvent::WebrtcIce {
            target_id,
            candidate,
        } => {
            services::voice::relay(hub, socket_id, &target_id, services::voice::Signal::Ice, candidate)
                .await?;
            Ok(vec![])
        }
        ClientEvent::ScreenStart { channel_id } => {
            services::voice::screen_start(hub, &user, socket_id, &channel_id).await?;
            Ok(vec![])
        }
        ClientEvent::ScreenStop => {
            services::voice::screen_stop(hub, socket_id).await?;
            Ok(vec![])
        }
        ClientEvent::ScreenWatch { sharer_id } => {
            services::voice::screen_watch(hub, socket_id, &sharer_id).await?;
            Ok(vec![])
        }
        ClientEvent::ScreenUnwatch { sharer_id } => {
            services::voice::screen_unwatch(hub, socket_id, &sharer_id).await?;
            Ok(vec![])
        }
        ClientEvent::DmCallStart { channel_id } => {
            services::voice::dm_call_start(hub, &user, socket_id, &channel_id).await?;
            Ok(vec![])
        }
        ClientEvent::DmCallDecline { channel_id } => {
            services::voice::dm_call_decline(hub, &user, &channel_id).await?;
            Ok(vec![])
        }

        ClientEvent::WebhookCreate { channel_id, name } => Ok(vec![
            services::webhooks::create_webhook(hub, &user, &channel_id, &name).await?,
        ]),
        ClientEvent::WebhookDelete { webhook_id } => Ok(vec![
            services::webhooks::delete_webhook(hub, &user, &webhook_id).await?,
        ]),
        ClientEvent::WebhookList { channel_id } => Ok(vec![
            services::webhooks::list_webhooks(hub, &user, &channel_id).await?,
        ]),

        ClientEvent::Unknown => Ok(vec![]),
    }
}
