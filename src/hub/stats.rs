//! Delivery and statistics structures

use serde::Serialize;
use std::collections::HashMap;

use crate::drain::DrainPhase;

/// Outcome of one publish: how many queues were tried, filled, or skipped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub recipients: usize,
    pub delivered: usize,
    /// Queue full (slow client) or connection already closing
    pub dropped: usize,
}

/// Counter snapshot from the hub; no map iteration
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub drain_state: DrainPhase,
    pub registered_total: u64,
    pub unregistered_total: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub topics: usize,
}

/// Point-in-time snapshot served at `/gateway/stats`
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub connections: usize,
    pub unique_users: usize,
    pub drain_state: DrainPhase,
    pub topics: HashMap<String, usize>,
    pub slow_connections: usize,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub uptime_seconds: u64,
}
