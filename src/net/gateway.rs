//! Gateway - binds the combined HTTP/WebSocket listener.
//!
//! One axum router serves the REST surface, the webhook ingest, metrics,
//! and the `/ws` upgrade; each accepted socket runs in its own task.

use crate::net::{connection, http};
use crate::state::Hub;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub struct Gateway {
    listener: TcpListener,
    router: Router,
}

impl Gateway {
    /// Bind the gateway to the configured port.
    pub async fn bind(hub: Arc<Hub>) -> std::io::Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], hub.config.port));
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "gateway listening");

        let router = Router::new()
            .route("/ws", get(ws_handler))
            .merge(http::router())
            .with_state(hub);

        Ok(Self { listener, router })
    }

    /// Serve until shutdown.
    pub async fn run(self) -> std::io::Result<()> {
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    }
}

/// `GET /ws` - upgrade and hand the socket to its connection task. The
/// socket authenticates afterwards with its first `join{token}` event.
async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> Response {
    ws.on_upgrade(move |socket| {
        let socket_id = uuid::Uuid::new_v4().to_string();
        connection::run(socket, socket_id, hub)
    })
}
