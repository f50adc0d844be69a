//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::drain::DrainPhase;

use super::{
    CLIENT_MESSAGES_TOTAL, CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL,
    DISPATCH_FANOUT, DRAIN_FORCED_CLOSURES_TOTAL, DRAIN_STATE, EVENTS_DELIVERED_TOTAL,
    EVENTS_DROPPED_TOTAL, EVENTS_PUBLISHED_TOTAL, HEARTBEAT_TIMEOUTS_TOTAL,
    SLOW_CONNECTIONS_TOTAL, UPGRADES_REJECTED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened(active: usize) {
        CONNECTIONS_OPENED_TOTAL.inc();
        CONNECTIONS_ACTIVE.set(active as i64);
    }

    pub fn record_closed(reason: &str, active: usize) {
        CONNECTIONS_CLOSED_TOTAL.with_label_values(&[reason]).inc();
        CONNECTIONS_ACTIVE.set(active as i64);
    }

    /// Called once per connection, the first time its queue overflows
    pub fn record_slow() {
        SLOW_CONNECTIONS_TOTAL.inc();
    }

    pub fn record_heartbeat_timeout() {
        HEARTBEAT_TIMEOUTS_TOTAL.inc();
    }
}

/// Helper struct for upgrade rejections
pub struct UpgradeMetrics;

impl UpgradeMetrics {
    pub fn record_rejected(reason: &str) {
        UPGRADES_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }
}

/// Helper struct for event dispatch metrics
pub struct EventMetrics;

impl EventMetrics {
    /// Record an event accepted from a publisher (`topic`, `user`, `users`)
    pub fn record_published(target: &str) {
        EVENTS_PUBLISHED_TOTAL.with_label_values(&[target]).inc();
    }

    /// Record the outcome of one fan-out
    pub fn record_delivery(delivered: u64, dropped: u64) {
        EVENTS_DELIVERED_TOTAL.inc_by(delivered);
        EVENTS_DROPPED_TOTAL.inc_by(dropped);
        DISPATCH_FANOUT.observe((delivered + dropped) as f64);
    }
}

/// Helper struct for drain metrics
pub struct DrainMetrics;

impl DrainMetrics {
    pub fn set_phase(phase: DrainPhase) {
        let value = match phase {
            DrainPhase::Healthy => 0,
            DrainPhase::Draining => 1,
            DrainPhase::Closed => 2,
        };
        DRAIN_STATE.set(value);
    }

    pub fn record_forced(count: u64) {
        DRAIN_FORCED_CLOSURES_TOTAL.inc_by(count);
    }
}

/// Helper struct for client frame metrics
pub struct WsMessageMetrics;

impl WsMessageMetrics {
    /// Record a client message by type
    pub fn record(message_type: &str) {
        CLIENT_MESSAGES_TOTAL
            .with_label_values(&[message_type])
            .inc();
    }
}
