//! Voice coordination over real sockets: rosters, signaling relay
//! validation, screen share opt-in, disconnect cleanup, typing expiry.

mod common;

use nexus_proto::ClientEvent;
use serde_json::json;

async fn voice_setup() -> (
    common::TestApp,
    common::Client,
    common::Client,
    common::ProvisionedServer,
) {
    let app = common::spawn().await;
    let mut alice = common::connect_new(&app, "alice").await;
    let mut bob = common::connect_new(&app, "bob").await;
    let server = common::create_server(&app, &mut alice, "Test").await;
    common::join_server(&app, &alice, &server.server_id, &mut bob).await;
    alice.drain();
    bob.drain();
    (app, alice, bob, server)
}

#[tokio::test]
async fn join_hands_back_existing_peers() {
    let (app, mut alice, mut bob, server) = voice_setup().await;

    alice
        .send(
            &app,
            ClientEvent::VoiceJoin {
                channel_id: server.voice_id.clone(),
            },
        )
        .await;
    let joined = alice.drain_named("voice:joined");
    assert!(joined[0]["d"]["peers"].as_array().unwrap().is_empty());

    bob.send(
        &app,
        ClientEvent::VoiceJoin {
            channel_id: server.voice_id.clone(),
        },
    )
    .await;
    let joined = bob.drain_named("voice:joined");
    let peers = joined[0]["d"]["peers"].as_array().unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0]["socket_id"], alice.socket_id.as_str());

    let peer_joined = alice.drain_named("peer:joined");
    assert_eq!(peer_joined.len(), 1);
    assert_eq!(peer_joined[0]["d"]["socket_id"], bob.socket_id.as_str());
}

#[tokio::test]
async fn signaling_relays_within_the_room_and_drops_outsiders_silently() {
    let (app, mut alice, mut bob, server) = voice_setup().await;
    for client in [&mut alice, &mut bob] {
        client
            .send(
                &app,
                ClientEvent::VoiceJoin {
                    channel_id: server.voice_id.clone(),
                },
            )
            .await;
    }
    alice.drain();
    bob.drain();

    alice
        .send(
            &app,
            ClientEvent::WebrtcOffer {
                target_id: bob.socket_id.clone(),
                offer: json!({ "sdp": "opaque-offer" }),
            },
        )
        .await;
    let offers = bob.drain_named("webrtc:offer");
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0]["d"]["from"], alice.socket_id.as_str());
    assert_eq!(offers[0]["d"]["offer"]["sdp"], "opaque-offer");

    bob.send(
        &app,
        ClientEvent::WebrtcAnswer {
            target_id: alice.socket_id.clone(),
            answer: json!({ "sdp": "opaque-answer" }),
        },
    )
    .await;
    assert_eq!(alice.drain_named("webrtc:answer").len(), 1);

    // An outsider's offer vanishes: no delivery, no error (topology must
    // not leak).
    let mut mallory = common::connect_new(&app, "mallory").await;
    mallory.drain();
    mallory
        .send(
            &app,
            ClientEvent::WebrtcOffer {
                target_id: bob.socket_id.clone(),
                offer: json!({ "sdp": "evil" }),
            },
        )
        .await;
    assert!(bob.drain_named("webrtc:offer").is_empty());
    assert!(common::first_error_kind(&mallory.drain()).is_none());
}

#[tokio::test]
async fn third_peer_triggers_new_negotiations() {
    let (app, mut alice, mut bob, server) = voice_setup().await;
    for client in [&mut alice, &mut bob] {
        client
            .send(
                &app,
                ClientEvent::VoiceJoin {
                    channel_id: server.voice_id.clone(),
                },
            )
            .await;
    }
    let mut charlie = common::connect_new(&app, "charlie").await;
    common::join_server(&app, &alice, &server.server_id, &mut charlie).await;
    alice.drain();
    bob.drain();
    charlie.drain();

    charlie
        .send(
            &app,
            ClientEvent::VoiceJoin {
                channel_id: server.voice_id.clone(),
            },
        )
        .await;
    assert_eq!(alice.drain_named("peer:joined").len(), 1);
    assert_eq!(bob.drain_named("peer:joined").len(), 1);
    let joined = charlie.drain_named("voice:joined");
    assert_eq!(joined[0]["d"]["peers"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn one_sharer_per_room_with_opt_in_viewers() {
    let (app, mut alice, mut bob, server) = voice_setup().await;
    for client in [&mut alice, &mut bob] {
        client
            .send(
                &app,
                ClientEvent::VoiceJoin {
                    channel_id: server.voice_id.clone(),
                },
            )
            .await;
    }
    alice.drain();
    bob.drain();

    alice
        .send(
            &app,
            ClientEvent::ScreenStart {
                channel_id: server.voice_id.clone(),
            },
        )
        .await;
    assert_eq!(bob.drain_named("screen:started").len(), 1);

    bob.send(
        &app,
        ClientEvent::ScreenStart {
            channel_id: server.voice_id.clone(),
        },
    )
    .await;
    assert_eq!(
        common::first_error_kind(&bob.drain()).as_deref(),
        Some("conflict")
    );

    bob.send(
        &app,
        ClientEvent::ScreenWatch {
            sharer_id: alice.socket_id.clone(),
        },
    )
    .await;
    let add_viewer = alice.drain_named("screen:add-viewer");
    assert_eq!(add_viewer.len(), 1);
    assert_eq!(add_viewer[0]["d"]["viewer_id"], bob.socket_id.as_str());

    bob.send(
        &app,
        ClientEvent::ScreenUnwatch {
            sharer_id: alice.socket_id.clone(),
        },
    )
    .await;
    assert_eq!(alice.drain_named("screen:remove-viewer").len(), 1);
}

#[tokio::test]
async fn mute_and_deafen_broadcast_and_deafen_forces_mute() {
    let (app, mut alice, mut bob, server) = voice_setup().await;
    for client in [&mut alice, &mut bob] {
        client
            .send(
                &app,
                ClientEvent::VoiceJoin {
                    channel_id: server.voice_id.clone(),
                },
            )
            .await;
    }
    alice.drain();
    bob.drain();

    bob.send(&app, ClientEvent::VoiceMute { is_muted: true }).await;
    let muted = alice.drain_named("peer:mute:changed");
    assert_eq!(muted[0]["d"]["is_muted"], true);

    alice
        .send(&app, ClientEvent::VoiceDeafen { is_deafened: true })
        .await;
    let frames = bob.drain();
    assert!(frames.iter().any(|f| f["t"] == "peer:deafen:changed"));
    assert!(
        frames
            .iter()
            .any(|f| f["t"] == "peer:mute:changed" && f["d"]["is_muted"] == true),
        "deafening forces mute"
    );
}

#[tokio::test]
async fn disconnect_cleans_voice_screen_and_typing() {
    let (app, mut alice, mut bob, server) = voice_setup().await;
    for client in [&mut alice, &mut bob] {
        client
            .send(
                &app,
                ClientEvent::VoiceJoin {
                    channel_id: server.voice_id.clone(),
                },
            )
            .await;
        client
            .send(
                &app,
                ClientEvent::ChannelJoin {
                    channel_id: server.general_id.clone(),
                },
            )
            .await;
    }
    alice
        .send(
            &app,
            ClientEvent::ScreenStart {
                channel_id: server.voice_id.clone(),
            },
        )
        .await;
    alice
        .send(
            &app,
            ClientEvent::TypingStart {
                channel_id: server.general_id.clone(),
            },
        )
        .await;
    alice.drain();
    assert_eq!(bob.drain_named("typing:start").len(), 1);

    common::disconnect(&app, &alice).await;

    let frames = bob.drain();
    assert!(frames.iter().any(|f| f["t"] == "screen:stopped"));
    assert!(frames.iter().any(|f| f["t"] == "peer:left"));
    assert!(frames.iter().any(|f| f["t"] == "typing:stop"));
    assert!(frames.iter().any(|f| f["t"] == "user:left"));
    assert!(app.hub.voice.roster(&server.voice_id).len() == 1);
}

#[tokio::test]
async fn dm_call_rings_other_participants() {
    let app = common::spawn().await;
    let mut alice = common::connect_new(&app, "alice").await;
    let mut bob = common::connect_new(&app, "bob").await;

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
        ClientEvent::DmCallStart {
            channel_id: channel_id.clone(),
        },
    )
    .await;
    let incoming = alice.drain_named("dm:call-incoming");
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0]["d"]["is_group"], false);
    assert_eq!(incoming[0]["d"]["caller"]["username"], "bob");

    alice
        .send(&app, ClientEvent::DmCallDecline { channel_id })
        .await;
    assert_eq!(bob.drain_named("dm:call-declined").len(), 1);
}

#[tokio::test]
async fn typing_expires_on_its_own() {
    let (app, mut alice, mut bob, server) = voice_setup().await;
    for client in [&mut alice, &mut bob] {
        client
            .send(
                &app,
                ClientEvent::ChannelJoin {
                    channel_id: server.general_id.clone(),
                },
            )
            .await;
        client.drain();
    }

    app.hub.typing.start(&server.general_id, &alice.user_id);
    assert!(app.hub.typing.sweep().is_empty(), "fresh entries survive");
    // The tracker's own unit tests cover expiry; here we only assert the
    // sweep contract the scheduler task relies on.
    let stopped = app.hub.typing.stop_all(&alice.user_id);
    assert_eq!(stopped, vec![server.general_id.clone()]);
}
