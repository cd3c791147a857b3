//! Webhook authoring: constant-time token auth, first-class webhook
//! authors, identical fan-out to user sends, and the ingest rate bucket.

mod common;

use nexus_proto::ClientEvent;
use nexusd::security::{token_digest, token_matches};
use nexusd::security::rate_limit::{RateBucket, RateLimitManager};
use nexusd::services::messages::{self, Draft};
use serde_json::json;

#[tokio::test]
async fn webhook_message_fans_out_like_a_user_send() {
    let app = common::spawn().await;
    let mut alice = common::connect_new(&app, "alice").await;
    let server = common::create_server(&app, &mut alice, "Test").await;
    alice
        .send(
            &app,
            ClientEvent::ChannelJoin {
                channel_id: server.general_id.clone(),
            },
        )
        .await;
    alice.drain();

    alice
        .send(
            &app,
            ClientEvent::WebhookCreate {
                channel_id: server.general_id.clone(),
                name: "ci-bot".into(),
            },
        )
        .await;
    let created = alice.drain_named("webhook:created");
    let webhook_id = created[0]["d"]["id"].as_str().unwrap().to_string();
    let token = created[0]["d"]["token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 64, "64-hex token revealed exactly once");

    // Stored form is a digest; the raw token authenticates in constant time.
    let row = app.hub.store.webhooks().by_id(&webhook_id).await.unwrap();
    assert_ne!(row.token_digest, token);
    assert!(token_matches(&token, &row.token_digest));
    assert!(!token_matches("0000", &row.token_digest));
    assert_eq!(row.token_digest, token_digest(&token));

    let message = messages::send_webhook_message(
        &app.hub,
        &row,
        Some("Release Bot".into()),
        None,
        Draft {
            content: "hi".into(),
            embeds: vec![json!({ "title": "T" })],
            ..Draft::default()
        },
    )
    .await
    .expect("ingest");
    assert!(!message.id.is_empty());

    let frames = alice.drain_named("message:new");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["d"]["embeds"][0]["title"], "T");
    assert_eq!(frames[0]["d"]["author"]["kind"], "webhook");
    assert_eq!(frames[0]["d"]["author"]["display_name"], "Release Bot");
}

#[tokio::test]
async fn webhook_and_user_messages_share_one_order() {
    let app = common::spawn().await;
    let mut alice = common::connect_new(&app, "alice").await;
    let server = common::create_server(&app, &mut alice, "Test").await;
    alice
        .send(
            &app,
            ClientEvent::ChannelJoin {
                channel_id: server.general_id.clone(),
            },
        )
        .await;
    alice
        .send(
            &app,
            ClientEvent::WebhookCreate {
                channel_id: server.general_id.clone(),
                name: "ci-bot".into(),
            },
        )
        .await;
    let webhook_id = alice.drain_named("webhook:created")[0]["d"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let row = app.hub.store.webhooks().by_id(&webhook_id).await.unwrap();
    alice.drain();

    for i in 0..5 {
        if i % 2 == 0 {
            messages::send_webhook_message(
                &app.hub,
                &row,
                None,
                None,
                Draft {
                    content: format!("hook {i}"),
                    ..Draft::default()
                },
            )
            .await
            .unwrap();
        } else {
            messages::send_user_message(
                &app.hub,
                &alice.user_id,
                &server.general_id,
                Draft {
                    content: format!("user {i}"),
                    ..Draft::default()
                },
            )
            .await
            .unwrap();
        }
    }

    let ids: Vec<String> = alice
        .drain_named("message:new")
        .iter()
        .map(|f| f["d"]["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 5);
    for pair in ids.windows(2) {
        assert!(pair[0] < pair[1]);
    }
}

#[tokio::test]
async fn webhook_embed_count_is_capped() {
    let app = common::spawn().await;
    let mut alice = common::connect_new(&app, "alice").await;
    let server = common::create_server(&app, &mut alice, "Test").await;
    alice
        .send(
            &app,
            ClientEvent::WebhookCreate {
                channel_id: server.general_id.clone(),
                name: "ci-bot".into(),
            },
        )
        .await;
    let webhook_id = alice.drain_named("webhook:created")[0]["d"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let row = app.hub.store.webhooks().by_id(&webhook_id).await.unwrap();

    let err = messages::send_webhook_message(
        &app.hub,
        &row,
        None,
        None,
        Draft {
            content: "too many".into(),
            embeds: vec![json!({}); 11],
            ..Draft::default()
        },
    )
    .await
    .expect_err("11 embeds must fail");
    assert_eq!(err.kind(), "validation");
}

#[test]
fn twelve_rapid_posts_trip_the_default_bucket() {
    // Default limits, as the ingest path would see them.
    let limits = RateLimitManager::default();
    let mut rejected = 0;
    for _ in 0..12 {
        if !limits.check(RateBucket::WebhookPost, "wh-1") {
            rejected += 1;
        }
    }
    assert!(rejected >= 1, "10/10s bucket must reject within 12 rapid posts");
}

#[tokio::test]
async fn webhook_management_requires_permission() {
    let app = common::spawn().await;
    let mut alice = common::connect_new(&app, "alice").await;
    let mut bob = common::connect_new(&app, "bob").await;
    let server = common::create_server(&app, &mut alice, "Test").await;
    common::join_server(&app, &alice, &server.server_id, &mut bob).await;

    bob.send(
        &app,
        ClientEvent::WebhookCreate {
            channel_id: server.general_id.clone(),
            name: "nope".into(),
        },
    )
    .await;
    assert_eq!(
        common::first_error_kind(&bob.drain()).as_deref(),
        Some("unauthorized")
    );
}
