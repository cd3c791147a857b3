//! In-process test infrastructure.
//!
//! Spawns a Hub over a temporary file-backed store and attaches fake
//! sockets (outbound queue receivers) so tests can observe fan-out exactly
//! as a connected client would.

#![allow(dead_code)]

use nexus_proto::{ClientEvent, ServerEvent};
use nexusd::auth::LoginOutcome;
use nexusd::config::{Bucket, Config};
use nexusd::dispatch;
use nexusd::state::{Hub, SocketHandle, SocketState};
use nexusd::store::Store;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static NEXT_SOCKET: AtomicU64 = AtomicU64::new(1);

pub struct TestApp {
    pub hub: Arc<Hub>,
    _tmp: tempfile::TempDir,
}

/// Spawn a Hub with rate limits opened wide; limiter behavior has its own
/// unit coverage and would otherwise interfere with burst-y tests.
pub async fn spawn() -> TestApp {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut config = Config::default();
    config.store_url = tmp
        .path()
        .join("test.db")
        .to_string_lossy()
        .into_owned();
    let wide = Bucket::new(100_000, 1);
    config.rate_limits.message_send = wide;
    config.rate_limits.webhook_post = wide;
    config.rate_limits.friend_request = wide;
    config.rate_limits.invite_create = wide;
    config.rate_limits.auth_login = wide;
    config.rate_limits.ws_event = wide;

    let store = Store::connect(&config.store_url).await.expect("store");
    TestApp {
        hub: Hub::new(config, store),
        _tmp: tmp,
    }
}

/// One fake connected client.
pub struct Client {
    pub socket_id: String,
    pub user_id: String,
    pub token: String,
    pub state: SocketState,
    pub rx: mpsc::Receiver<Arc<ServerEvent>>,
}

impl Client {
    /// Drain everything queued on the socket, as wire-shaped JSON values.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(serde_json::to_value(&*event).expect("serializable event"));
        }
        out
    }

    /// Events of one name from the queue.
    pub fn drain_named(&mut self, name: &str) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter(|frame| frame["t"] == name)
            .collect()
    }

    pub async fn send(&mut self, app: &TestApp, event: ClientEvent) -> dispatch::Outcome {
        dispatch::dispatch(&app.hub, &self.socket_id, &mut self.state, event).await
    }
}

pub async fn register(app: &TestApp, username: &str) -> LoginOutcome {
    app.hub
        .sessions
        .register(username, "Pw12345!!")
        .await
        .expect("register")
}

/// Attach a socket and authenticate it with `join{token}`. The `init`
/// frame is left in the queue for the caller to inspect or drain.
pub async fn connect(app: &TestApp, outcome: &LoginOutcome) -> Client {
    let socket_id = format!("sock-{}", NEXT_SOCKET.fetch_add(1, Ordering::Relaxed));
    let (handle, rx) = SocketHandle::new(socket_id.clone());
    app.hub.rooms.register_socket(handle);

    let mut client = Client {
        socket_id,
        user_id: outcome.user.id.clone(),
        token: outcome.token.clone(),
        state: SocketState::default(),
        rx,
    };
    let result = client
        .send(
            app,
            ClientEvent::Join {
                token: outcome.token.clone(),
            },
        )
        .await;
    assert!(!result.close, "join must not close the socket");
    client
}

/// Register and connect in one step.
pub async fn connect_new(app: &TestApp, username: &str) -> Client {
    let outcome = register(app, username).await;
    connect(app, &outcome).await
}

/// Simulate an abrupt socket disconnect.
pub async fn disconnect(app: &TestApp, client: &Client) {
    nexusd::services::session::handle_disconnect(&app.hub, &client.socket_id, &client.state).await;
}

/// Kind of the first `error` frame, if any.
pub fn first_error_kind(frames: &[Value]) -> Option<String> {
    frames
        .iter()
        .find(|frame| frame["t"] == "error")
        .and_then(|frame| frame["d"]["kind"].as_str())
        .map(str::to_string)
}

/// Ids of a freshly provisioned server.
pub struct ProvisionedServer {
    pub server_id: String,
    pub general_id: String,
    pub voice_id: String,
}

/// Create a server through the owner's socket and resolve the default
/// channel ids.
pub async fn create_server(app: &TestApp, owner: &mut Client, name: &str) -> ProvisionedServer {
    owner
        .send(
            app,
            ClientEvent::ServerCreate {
                name: name.to_string(),
            },
        )
        .await;
    let frames = owner.drain();
    assert!(
        frames.iter().any(|f| f["t"] == "server:updated"),
        "server creation must fan a snapshot"
    );

    let servers = app
        .hub
        .store
        .servers()
        .servers_of(&owner.user_id)
        .await
        .expect("servers_of");
    let server = servers.last().expect("server exists");

    let mut general_id = String::new();
    let mut voice_id = String::new();
    for category in app
        .hub
        .store
        .servers()
        .categories_of(&server.id)
        .await
        .expect("categories")
    {
        for channel in app
            .hub
            .store
            .servers()
            .channels_of_category(&category.id)
            .await
            .expect("channels")
        {
            match channel.kind.as_str() {
                "text" if general_id.is_empty() => general_id = channel.id,
                "voice" if voice_id.is_empty() => voice_id = channel.id,
                _ => {}
            }
        }
    }
    assert!(!general_id.is_empty() && !voice_id.is_empty());

    ProvisionedServer {
        server_id: server.id.clone(),
        general_id,
        voice_id,
    }
}

/// Bring a member into a server through the real invite flow.
pub async fn join_server(app: &TestApp, owner: &Client, server_id: &str, member: &mut Client) {
    let created = nexusd::services::servers::create_invite(
        &app.hub,
        &owner.user_id,
        server_id,
        None,
        None,
    )
    .await
    .expect("invite");
    let code = serde_json::to_value(&created).expect("wire")["d"]["code"]
        .as_str()
        .expect("code")
        .to_string();
    nexusd::services::servers::use_invite(&app.hub, &member.user_id, &code)
        .await
        .expect("use invite");
    member.drain();
}
