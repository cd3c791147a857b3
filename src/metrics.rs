//! Prometheus metrics collection for nexusd.
//!
//! Tracks socket population, event throughput by name, rejections by error
//! kind, fan-out volume, and webhook ingest. Served on `GET /metrics` by the
//! main HTTP router.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    /// Currently connected sockets.
    pub static ref CONNECTED_SOCKETS: IntGauge = IntGauge::new(
        "nexus_connected_sockets",
        "Currently connected WebSocket clients"
    ).unwrap();

    /// Users currently counted online by the presence tracker.
    pub static ref ONLINE_USERS: IntGauge = IntGauge::new(
        "nexus_online_users",
        "Users with at least one live socket"
    ).unwrap();

    /// Inbound events dispatched, by event name.
    pub static ref EVENTS_DISPATCHED: IntCounterVec = IntCounterVec::new(
        Opts::new("nexus_events_dispatched_total", "Inbound events dispatched"),
        &["event"]
    ).unwrap();

    /// Events rejected, by error kind.
    pub static ref EVENTS_REJECTED: IntCounterVec = IntCounterVec::new(
        Opts::new("nexus_events_rejected_total", "Events rejected by error kind"),
        &["kind"]
    ).unwrap();

    /// Outbound frames delivered through the room registry.
    pub static ref FANOUT_DELIVERIES: IntCounter = IntCounter::new(
        "nexus_fanout_deliveries_total",
        "Frames delivered to subscribed sockets"
    ).unwrap();

    /// Sockets terminated for an over-full outbound queue.
    pub static ref SLOW_SOCKETS_DROPPED: IntCounter = IntCounter::new(
        "nexus_slow_sockets_dropped_total",
        "Sockets terminated at the outbound high-water mark"
    ).unwrap();

    /// Accepted webhook ingests.
    pub static ref WEBHOOK_INGESTS: IntCounter = IntCounter::new(
        "nexus_webhook_ingests_total",
        "Webhook messages accepted"
    ).unwrap();
}

/// Register all metrics with the global registry. Call once at startup.
pub fn init() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(CONNECTED_SOCKETS.clone()),
        Box::new(ONLINE_USERS.clone()),
        Box::new(EVENTS_DISPATCHED.clone()),
        Box::new(EVENTS_REJECTED.clone()),
        Box::new(FANOUT_DELIVERIES.clone()),
        Box::new(SLOW_SOCKETS_DROPPED.clone()),
        Box::new(WEBHOOK_INGESTS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            tracing::warn!(error = %e, "metric registration failed");
        }
    }
}

/// Render all metrics in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "metrics encoding failed");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
