//! Prometheus metrics for the gateway.
//!
//! - Connection metrics (active, opened, closed by reason, slow consumers)
//! - Event metrics (published by target, delivered, dropped)
//! - Drain metrics (phase, forced closures)
//! - Client frame metrics by message type

mod helpers;

pub use helpers::{
    encode_metrics, ConnectionMetrics, DrainMetrics, EventMetrics, UpgradeMetrics,
    WsMessageMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "gateway";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Active WebSocket connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of active WebSocket connections"
    ).unwrap();

    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total connections registered"
    ).unwrap();

    /// Closed connections by close reason
    pub static ref CONNECTIONS_CLOSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total connections closed",
        &["reason"]
    ).unwrap();

    /// Upgrades refused before the handshake
    pub static ref UPGRADES_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_upgrades_rejected_total", METRIC_PREFIX),
        "Total WebSocket upgrades rejected",
        &["reason"]
    ).unwrap();

    pub static ref SLOW_CONNECTIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_slow_connections_total", METRIC_PREFIX),
        "Connections whose outbound queue overflowed at least once"
    ).unwrap();

    pub static ref HEARTBEAT_TIMEOUTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_timeouts_total", METRIC_PREFIX),
        "Connections closed for missing heartbeats"
    ).unwrap();

    // ============================================================================
    // Event Metrics
    // ============================================================================

    /// Events accepted from publishers by target type
    pub static ref EVENTS_PUBLISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_published_total", METRIC_PREFIX),
        "Total events published",
        &["target"]
    ).unwrap();

    pub static ref EVENTS_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_delivered_total", METRIC_PREFIX),
        "Total events enqueued onto connections"
    ).unwrap();

    pub static ref EVENTS_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_dropped_total", METRIC_PREFIX),
        "Total events dropped because a connection queue was full or closed"
    ).unwrap();

    /// Recipients per dispatch
    pub static ref DISPATCH_FANOUT: Histogram = register_histogram!(
        format!("{}_dispatch_fanout", METRIC_PREFIX),
        "Distribution of recipients per dispatched event",
        vec![1.0, 2.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]
    ).unwrap();

    // ============================================================================
    // Drain Metrics
    // ============================================================================

    /// 0 = healthy, 1 = draining, 2 = closed
    pub static ref DRAIN_STATE: IntGauge = register_int_gauge!(
        format!("{}_drain_state", METRIC_PREFIX),
        "Drain state (0=healthy, 1=draining, 2=closed)"
    ).unwrap();

    pub static ref DRAIN_FORCED_CLOSURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_drain_forced_closures_total", METRIC_PREFIX),
        "Connections force-closed when the drain timeout elapsed"
    ).unwrap();

    // ============================================================================
    // Client Frame Metrics
    // ============================================================================

    /// Client frames received by message type
    pub static ref CLIENT_MESSAGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_client_messages_total", METRIC_PREFIX),
        "Total client messages received",
        &["type"]
    ).unwrap();
}
