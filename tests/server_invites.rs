//! Server lifecycle, invites, moderation: the register -> create -> invite
//! -> peek -> use chain, ban enforcement, kick positions, ownership
//! transfer on owner leave, and timeouts.

mod common;

use nexus_proto::ClientEvent;
use nexus_proto::Permissions;
use nexusd::state::{SocketHandle, SocketState};

#[tokio::test]
async fn register_create_invite_peek() {
    let app = common::spawn().await;
    let mut alice = common::connect_new(&app, "alice").await;
    let server = common::create_server(&app, &mut alice, "Test").await;

    alice
        .send(
            &app,
            ClientEvent::InviteCreate {
                server_id: server.server_id.clone(),
                max_uses: None,
                expires_in_ms: None,
            },
        )
        .await;
    let created = alice.drain_named("invite:created");
    let code = created[0]["d"]["code"].as_str().unwrap().to_string();

    // A fresh, never-authenticated socket may peek.
    let (handle, mut rx) = SocketHandle::new("sock-fresh".into());
    app.hub.rooms.register_socket(handle);
    let mut state = SocketState::default();
    nexusd::dispatch::dispatch(
        &app.hub,
        "sock-fresh",
        &mut state,
        ClientEvent::InvitePeek { code: code.clone() },
    )
    .await;
    let peeked = serde_json::to_value(&*rx.try_recv().expect("peek reply")).unwrap();
    assert_eq!(peeked["t"], "invite:peek");
    assert_eq!(peeked["d"]["valid"], true);
    assert_eq!(peeked["d"]["server"]["name"], "Test");

    // Revoked codes peek as invalid.
    alice
        .send(&app, ClientEvent::InviteRevoke { code: code.clone() })
        .await;
    alice.drain();
    alice.send(&app, ClientEvent::InvitePeek { code }).await;
    let peeked = alice.drain_named("invite:peek");
    assert_eq!(peeked[0]["d"]["valid"], false);
}

#[tokio::test]
async fn invite_use_joins_and_notifies_the_room() {
    let app = common::spawn().await;
    let mut alice = common::connect_new(&app, "alice").await;
    let mut bob = common::connect_new(&app, "bob").await;
    let server = common::create_server(&app, &mut alice, "Test").await;

    alice
        .send(
            &app,
            ClientEvent::InviteCreate {
                server_id: server.server_id.clone(),
                max_uses: Some(1),
                expires_in_ms: None,
            },
        )
        .await;
    let code = alice.drain_named("invite:created")[0]["d"]["code"]
        .as_str()
        .unwrap()
        .to_string();

    bob.send(&app, ClientEvent::InviteUse { code: code.clone() })
        .await;
    let joined = bob.drain_named("invite:joined");
    assert_eq!(joined[0]["d"]["server"]["name"], "Test");
    assert!(
        app.hub
            .store
            .servers()
            .is_member(&server.server_id, &bob.user_id)
            .await
            .unwrap()
    );
    assert_eq!(alice.drain_named("user:joined").len(), 1);

    // maxUses=1 is exhausted: the next user fails closed.
    let mut charlie = common::connect_new(&app, "charlie").await;
    charlie.send(&app, ClientEvent::InviteUse { code }).await;
    assert_eq!(
        common::first_error_kind(&charlie.drain()).as_deref(),
        Some("blocked")
    );
}

#[tokio::test]
async fn double_join_is_a_conflict() {
    let app = common::spawn().await;
    let mut alice = common::connect_new(&app, "alice").await;
    let mut bob = common::connect_new(&app, "bob").await;
    let server = common::create_server(&app, &mut alice, "Test").await;
    common::join_server(&app, &alice, &server.server_id, &mut bob).await;

    alice
        .send(
            &app,
            ClientEvent::InviteCreate {
                server_id: server.server_id.clone(),
                max_uses: None,
                expires_in_ms: None,
            },
        )
        .await;
    let code = alice.drain_named("invite:created")[0]["d"]["code"]
        .as_str()
        .unwrap()
        .to_string();
    bob.send(&app, ClientEvent::InviteUse { code }).await;
    assert_eq!(
        common::first_error_kind(&bob.drain()).as_deref(),
        Some("conflict")
    );
}

#[tokio::test]
async fn ban_notifies_kicks_and_blocks_reentry() {
    let app = common::spawn().await;
    let mut alice = common::connect_new(&app, "alice").await;
    let mut bob = common::connect_new(&app, "bob").await;
    let server = common::create_server(&app, &mut alice, "Test").await;
    common::join_server(&app, &alice, &server.server_id, &mut bob).await;

    alice
        .send(
            &app,
            ClientEvent::BanUser {
                server_id: server.server_id.clone(),
                user_id: bob.user_id.clone(),
            },
        )
        .await;
    assert_eq!(bob.drain_named("user:banned").len(), 1);
    assert!(
        !app.hub
            .store
            .servers()
            .is_member(&server.server_id, &bob.user_id)
            .await
            .unwrap()
    );

    // Any invite now fails closed for bob.
    alice
        .send(
            &app,
            ClientEvent::InviteCreate {
                server_id: server.server_id.clone(),
                max_uses: None,
                expires_in_ms: None,
            },
        )
        .await;
    let code = alice.drain_named("invite:created")[0]["d"]["code"]
        .as_str()
        .unwrap()
        .to_string();
    bob.send(&app, ClientEvent::InviteUse { code }).await;
    assert_eq!(
        common::first_error_kind(&bob.drain()).as_deref(),
        Some("blocked")
    );
}

#[tokio::test]
async fn kick_requires_standing_above_the_target() {
    let app = common::spawn().await;
    let mut alice = common::connect_new(&app, "alice").await;
    let mut bob = common::connect_new(&app, "bob").await;
    let server = common::create_server(&app, &mut alice, "Test").await;
    common::join_server(&app, &alice, &server.server_id, &mut bob).await;

    // A plain member cannot kick at all, and never the owner.
    bob.send(
        &app,
        ClientEvent::KickUser {
            server_id: server.server_id.clone(),
            user_id: alice.user_id.clone(),
        },
    )
    .await;
    assert_eq!(
        common::first_error_kind(&bob.drain()).as_deref(),
        Some("unauthorized")
    );

    alice
        .send(
            &app,
            ClientEvent::KickUser {
                server_id: server.server_id.clone(),
                user_id: bob.user_id.clone(),
            },
        )
        .await;
    assert_eq!(bob.drain_named("user:kicked").len(), 1);
    assert!(
        !app.hub
            .store
            .servers()
            .is_member(&server.server_id, &bob.user_id)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn owner_leave_transfers_to_longest_joined_admin() {
    let app = common::spawn().await;
    let mut alice = common::connect_new(&app, "alice").await;
    let mut bob = common::connect_new(&app, "bob").await;
    let server = common::create_server(&app, &mut alice, "Test").await;
    common::join_server(&app, &alice, &server.server_id, &mut bob).await;

    alice
        .send(
            &app,
            ClientEvent::RoleCreate {
                server_id: server.server_id.clone(),
                name: "admin".into(),
                color: "#ff0000".into(),
                permissions: Permissions::ADMINISTRATOR,
            },
        )
        .await;
    let snapshot = alice.drain_named("server:updated");
    let roles = snapshot.last().unwrap()["d"]["roles"].as_array().unwrap().clone();
    let role_id = roles
        .iter()
        .find(|role| role["name"] == "admin")
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    alice
        .send(
            &app,
            ClientEvent::RoleAssign {
                server_id: server.server_id.clone(),
                user_id: bob.user_id.clone(),
                role_id,
            },
        )
        .await;
    alice.drain();
    bob.drain();

    alice
        .send(
            &app,
            ClientEvent::ServerLeave {
                server_id: server.server_id.clone(),
            },
        )
        .await;
    let row = app.hub.store.servers().by_id(&server.server_id).await.unwrap();
    assert_eq!(row.owner_id, bob.user_id, "longest-joined admin inherits");
}

#[tokio::test]
async fn owner_leave_without_heir_archives_the_server() {
    let app = common::spawn().await;
    let mut alice = common::connect_new(&app, "alice").await;
    let mut bob = common::connect_new(&app, "bob").await;
    let server = common::create_server(&app, &mut alice, "Test").await;
    common::join_server(&app, &alice, &server.server_id, &mut bob).await;
    bob.drain();

    alice
        .send(
            &app,
            ClientEvent::ServerLeave {
                server_id: server.server_id.clone(),
            },
        )
        .await;
    assert!(app.hub.store.servers().by_id(&server.server_id).await.is_err());
    assert_eq!(bob.drain_named("server:deleted").len(), 1);
}

#[tokio::test]
async fn timeout_strips_send_until_expiry() {
    let app = common::spawn().await;
    let mut alice = common::connect_new(&app, "alice").await;
    let mut bob = common::connect_new(&app, "bob").await;
    let server = common::create_server(&app, &mut alice, "Test").await;
    common::join_server(&app, &alice, &server.server_id, &mut bob).await;

    // Out-of-range minutes are rejected.
    alice
        .send(
            &app,
            ClientEvent::TimeoutUser {
                server_id: server.server_id.clone(),
                user_id: bob.user_id.clone(),
                minutes: 0,
            },
        )
        .await;
    assert_eq!(
        common::first_error_kind(&alice.drain()).as_deref(),
        Some("validation")
    );

    alice
        .send(
            &app,
            ClientEvent::TimeoutUser {
                server_id: server.server_id.clone(),
                user_id: bob.user_id.clone(),
                minutes: 10,
            },
        )
        .await;
    alice.drain();
    bob.drain();

    bob.send(
        &app,
        ClientEvent::MessageSend {
            channel_id: server.general_id.clone(),
            content: "muzzled".into(),
            reply_to: None,
            attachments: vec![],
            command_data: None,
        },
    )
    .await;
    assert_eq!(
        common::first_error_kind(&bob.drain()).as_deref(),
        Some("unauthorized")
    );
}

#[tokio::test]
async fn personal_server_rejects_invites() {
    let app = common::spawn().await;
    let mut alice = common::connect_new(&app, "alice").await;
    let personal = app
        .hub
        .store
        .servers()
        .personal_server_of(&alice.user_id)
        .await
        .unwrap()
        .unwrap();

    alice
        .send(
            &app,
            ClientEvent::InviteCreate {
                server_id: personal.id,
                max_uses: None,
                expires_in_ms: None,
            },
        )
        .await;
    assert_eq!(
        common::first_error_kind(&alice.drain()).as_deref(),
        Some("validation")
    );
}
