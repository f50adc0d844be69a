//! Connection directory, topic registry and fan-out
//!
//! This module provides:
//! - `SubscriptionRegistry`: topic <-> connection mapping
//! - `Hub`: active connections, broadcast and per-user delivery
//! - Delivery reports and statistics

mod manager;
mod registry;
mod stats;

pub use manager::{Hub, HubLimits};
pub use registry::SubscriptionRegistry;
pub use stats::{DeliveryReport, GatewayStats, HubStats};
