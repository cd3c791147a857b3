//! nexusd - the Nexus realtime core.
//!
//! The authoritative state machine behind persistent WebSocket sessions:
//! authenticated events in, authorized mutations and room fan-out back out.

use nexusd::config::{self, Config};
use nexusd::net::{self, gateway::Gateway};
use nexusd::state::Hub;
use nexusd::store::Store;
use nexusd::{metrics, services};
use nexus_proto::ServerEvent;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().map_err(|e| {
        eprintln!("ERROR: invalid configuration: {e}");
        e
    })?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match config.log_format {
        config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        config::LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    info!(port = config.port, store = %config.store_url, "starting nexusd");

    let store = Store::connect(&config.store_url).await?;
    let hub = Hub::new(config, store);
    info!("hub initialized");

    metrics::init();
    info!("metrics initialized");

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Signal handler for graceful shutdown.
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = sigint.recv() => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
            let _ = shutdown_tx.send(());
        });
    }

    // Typing expiry sweep: one scheduler tick services every entry.
    {
        let hub = Arc::clone(&hub);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for (channel_id, user_id) in hub.typing.sweep() {
                            hub.rooms.emit_to(
                                &nexusd::state::channel_key(&channel_id),
                                &ServerEvent::TypingStop { channel_id, user_id },
                            );
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // Presence idle sweep (every 30 seconds, idle after 10 minutes).
    {
        let hub = Arc::clone(&hub);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for user_id in hub.presence.sweep_idle(nexusd::state::IDLE_AFTER) {
                            if let Err(e) = services::session::broadcast_profile(&hub, &user_id).await {
                                tracing::warn!(user = %user_id, error = %e, "idle fan-out failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // Voice room sweeper: removes entries whose socket is gone (the
    // disconnect hook is primary; this is belt-and-braces).
    {
        let hub = Arc::clone(&hub);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let dead: Vec<String> = hub
                            .voice
                            .tracked_sockets()
                            .into_iter()
                            .filter(|socket_id| hub.rooms.socket(socket_id).is_none())
                            .collect();
                        for socket_id in dead {
                            if let Err(e) = services::voice::leave(&hub, &socket_id).await {
                                tracing::warn!(socket = %socket_id, error = %e, "voice sweep failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // Maintenance: rate limiter maps, expired sessions, OpenGraph cache.
    {
        let hub = Arc::clone(&hub);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        hub.rate_limits.cleanup();
                        net::http::og::sweep_cache();
                        match hub.store.users().prune_sessions().await {
                            Ok(removed) if removed > 0 => {
                                info!(removed = removed, "expired sessions pruned");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "session pruning failed"),
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }
    info!("maintenance tasks started");

    let gateway = Gateway::bind(Arc::clone(&hub)).await?;
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        result = gateway.run() => result?,
        _ = shutdown_rx.recv() => {}
    }

    info!("gateway stopped, draining");
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(())
}
