//! Social graph and DM semantics: friend requests, bidirectional block
//! gates, and message-request gating for non-friends.

mod common;

use nexus_proto::ClientEvent;

async fn pair() -> (common::TestApp, common::Client, common::Client) {
    let app = common::spawn().await;
    let alice = common::connect_new(&app, "alice").await;
    let bob = common::connect_new(&app, "bob").await;
    (app, alice, bob)
}

async fn befriend(app: &common::TestApp, a: &mut common::Client, b: &mut common::Client) {
    b.send(
        app,
        ClientEvent::FriendRequest {
            target_username: "alice".into(),
        },
    )
    .await;
    let received = a.drain_named("friend:request:received");
    let request_id = received[0]["d"]["id"].as_str().unwrap().to_string();
    a.send(app, ClientEvent::FriendAccept { request_id }).await;
    a.drain();
    b.drain();
}

#[tokio::test]
async fn friend_request_flow_notifies_both_sides() {
    let (app, mut alice, mut bob) = pair().await;

    bob.send(
        &app,
        ClientEvent::FriendRequest {
            target_username: "alice".into(),
        },
    )
    .await;
    assert_eq!(bob.drain_named("friend:request:sent").len(), 1);
    let received = alice.drain_named("friend:request:received");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["d"]["state"], "pending");

    let request_id = received[0]["d"]["id"].as_str().unwrap().to_string();
    alice
        .send(&app, ClientEvent::FriendAccept { request_id })
        .await;
    assert_eq!(alice.drain_named("friend:accepted").len(), 1);
    assert_eq!(bob.drain_named("friend:accepted").len(), 1);
}

#[tokio::test]
async fn duplicate_and_self_requests_are_rejected() {
    let (app, mut alice, mut bob) = pair().await;

    bob.send(
        &app,
        ClientEvent::FriendRequest {
            target_username: "alice".into(),
        },
    )
    .await;
    bob.drain();
    alice.drain();

    // Duplicate, and the mirror-direction duplicate.
    bob.send(
        &app,
        ClientEvent::FriendRequest {
            target_username: "alice".into(),
        },
    )
    .await;
    assert_eq!(common::first_error_kind(&bob.drain()).as_deref(), Some("conflict"));
    alice
        .send(
            &app,
            ClientEvent::FriendRequest {
                target_username: "bob".into(),
            },
        )
        .await;
    assert_eq!(common::first_error_kind(&alice.drain()).as_deref(), Some("conflict"));

    alice
        .send(
            &app,
            ClientEvent::FriendRequest {
                target_username: "alice".into(),
            },
        )
        .await;
    assert_eq!(common::first_error_kind(&alice.drain()).as_deref(), Some("validation"));
}

#[tokio::test]
async fn blocks_gate_dm_creation_in_both_directions() {
    let (app, mut alice, mut bob) = pair().await;

    alice
        .send(
            &app,
            ClientEvent::BlockUser {
                user_id: bob.user_id.clone(),
            },
        )
        .await;
    assert_eq!(alice.drain_named("user:blocked").len(), 1);

    bob.send(
        &app,
        ClientEvent::DmCreate {
            target_user_id: alice.user_id.clone(),
        },
    )
    .await;
    assert_eq!(common::first_error_kind(&bob.drain()).as_deref(), Some("blocked"));

    // The blocker is gated too.
    alice
        .send(
            &app,
            ClientEvent::DmCreate {
                target_user_id: bob.user_id.clone(),
            },
        )
        .await;
    assert_eq!(common::first_error_kind(&alice.drain()).as_deref(), Some("blocked"));
}

#[tokio::test]
async fn block_after_dm_refuses_new_sends() {
    let (app, mut alice, mut bob) = pair().await;
    befriend(&app, &mut alice, &mut bob).await;

    bob.send(
        &app,
        ClientEvent::DmCreate {
            target_user_id: alice.user_id.clone(),
        },
    )
    .await;
    let created = bob.drain_named("dm:created");
    let channel_id = created[0]["d"]["channel"]["channel"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    alice.drain();

    alice
        .send(
            &app,
            ClientEvent::BlockUser {
                user_id: bob.user_id.clone(),
            },
        )
        .await;
    alice.drain();

    bob.send(
        &app,
        ClientEvent::MessageSend {
            channel_id,
            content: "hello?".into(),
            reply_to: None,
            attachments: vec![],
            command_data: None,
        },
    )
    .await;
    assert_eq!(common::first_error_kind(&bob.drain()).as_deref(), Some("blocked"));
    assert!(alice.drain_named("message:new").is_empty());
}

#[tokio::test]
async fn non_friend_dm_lands_as_message_request_until_accepted() {
    let (app, mut alice, mut bob) = pair().await;

    bob.send(
        &app,
        ClientEvent::DmCreate {
            target_user_id: alice.user_id.clone(),
        },
    )
    .await;
    let bob_view = bob.drain_named("dm:created");
    assert_eq!(bob_view[0]["d"]["channel"]["state"], "open");
    let channel_id = bob_view[0]["d"]["channel"]["channel"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let alice_view = alice.drain_named("dm:created");
    assert_eq!(
        alice_view[0]["d"]["channel"]["state"], "request",
        "target sees the channel in message requests only"
    );

    // Messages still deliver while pending (they accumulate in the pane).
    bob.send(
        &app,
        ClientEvent::MessageSend {
            channel_id: channel_id.clone(),
            content: "hi there".into(),
            reply_to: None,
            attachments: vec![],
            command_data: None,
        },
    )
    .await;
    bob.drain();
    assert_eq!(alice.drain_named("message:new").len(), 1);

    alice
        .send(
            &app,
            ClientEvent::DmRequestAccept {
                channel_id: channel_id.clone(),
            },
        )
        .await;
    let updated = alice.drain_named("dm:updated");
    assert_eq!(updated.last().unwrap()["d"]["channel"]["state"], "open");

    bob.send(
        &app,
        ClientEvent::MessageSend {
            channel_id,
            content: "and after accept".into(),
            reply_to: None,
            attachments: vec![],
            command_data: None,
        },
    )
    .await;
    let received = alice.drain_named("message:new");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["d"]["content"], "and after accept");
}

#[tokio::test]
async fn dm_delete_hides_for_one_side_only() {
    let (app, mut alice, mut bob) = pair().await;
    befriend(&app, &mut alice, &mut bob).await;

    bob.send(
        &app,
        ClientEvent::DmCreate {
            target_user_id: alice.user_id.clone(),
        },
    )
    .await;
    let channel_id = bob.drain_named("dm:created")[0]["d"]["channel"]["channel"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    alice.drain();

    alice
        .send(
            &app,
            ClientEvent::DmDelete {
                channel_id: channel_id.clone(),
            },
        )
        .await;

    let alice_channels = nexusd::services::dms::channels_for_init(&app.hub, &alice.user_id)
        .await
        .unwrap();
    assert!(alice_channels.iter().all(|c| c.channel.id != channel_id));

    let bob_channels = nexusd::services::dms::channels_for_init(&app.hub, &bob.user_id)
        .await
        .unwrap();
    assert!(bob_channels.iter().any(|c| c.channel.id == channel_id));
}

#[tokio::test]
async fn mark_read_resets_unread_counts() {
    let (app, mut alice, mut bob) = pair().await;
    befriend(&app, &mut alice, &mut bob).await;

    bob.send(
        &app,
        ClientEvent::DmCreate {
            target_user_id: alice.user_id.clone(),
        },
    )
    .await;
    let channel_id = bob.drain_named("dm:created")[0]["d"]["channel"]["channel"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    alice.drain();

    bob.send(
        &app,
        ClientEvent::MessageSend {
            channel_id: channel_id.clone(),
            content: "unread me".into(),
            reply_to: None,
            attachments: vec![],
            command_data: None,
        },
    )
    .await;
    bob.drain();

    let counts = alice.drain_named("dm:unread-counts");
    assert_eq!(counts.last().unwrap()["d"]["counts"][&channel_id], 1);
    let (rows, _) = app
        .hub
        .store
        .messages()
        .page(&channel_id, None, 1)
        .await
        .unwrap();
    let newest = rows[0].id.clone();

    alice
        .send(
            &app,
            ClientEvent::DmMarkRead {
                channel_id: channel_id.clone(),
                message_id: newest,
            },
        )
        .await;
    let counts = alice.drain_named("dm:unread-counts");
    assert_eq!(counts.last().unwrap()["d"]["counts"][&channel_id], 0);
}
