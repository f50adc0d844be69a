use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::connection::{CloseReason, ConnectionHandle, ConnectionId, EnqueueOutcome};
use crate::drain::DrainState;
use crate::error::GatewayError;
use crate::metrics::{ConnectionMetrics, EventMetrics};
use crate::topic::TopicKey;
use crate::websocket::{OutboundMessage, ServerMessage};

use super::registry::SubscriptionRegistry;
use super::stats::{DeliveryReport, HubStats};

/// Limits applied per connection
#[derive(Debug, Clone, Copy)]
pub struct HubLimits {
    pub max_subscriptions_per_connection: usize,
}

impl Default for HubLimits {
    fn default() -> Self {
        Self {
            max_subscriptions_per_connection: 200,
        }
    }
}

#[derive(Debug, Default)]
struct HubCounters {
    registered: AtomicU64,
    unregistered: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Directory of active connections and the single dispatch authority.
///
/// Locking: `connections` and the registry are sharded `DashMap`s; no
/// method holds a guard from one while enqueueing onto a connection, and
/// enqueueing itself never waits. Counters are atomics so `stats()` never
/// walks the maps.
pub struct Hub {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    registry: SubscriptionRegistry,
    drain: Arc<DrainState>,
    limits: HubLimits,
    active: AtomicUsize,
    counters: HubCounters,
    /// Woken whenever the last connection leaves
    idle: Notify,
}

impl Hub {
    pub fn new(drain: Arc<DrainState>) -> Self {
        Self::with_limits(drain, HubLimits::default())
    }

    pub fn with_limits(drain: Arc<DrainState>, limits: HubLimits) -> Self {
        Self {
            connections: DashMap::new(),
            registry: SubscriptionRegistry::new(),
            drain,
            limits,
            active: AtomicUsize::new(0),
            counters: HubCounters::default(),
            idle: Notify::new(),
        }
    }

    pub fn drain_state(&self) -> &Arc<DrainState> {
        &self.drain
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Admit a connection. Refused once a drain has started, so callers
    /// deny the session instead of accepting and evicting it.
    pub fn register(&self, handle: Arc<ConnectionHandle>) -> Result<(), GatewayError> {
        if !self.drain.is_healthy() {
            return Err(GatewayError::Draining {
                state: self.drain.phase(),
            });
        }

        let user_topic = TopicKey::user(&handle.user_id)
            .map_err(|e| GatewayError::Identity(e.to_string()))?;
        let connection_id = handle.id;

        self.connections.insert(connection_id, handle.clone());
        self.registry.subscribe(&user_topic, connection_id);

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.registered.fetch_add(1, Ordering::Relaxed);
        ConnectionMetrics::record_opened(active);

        // Checked again after the count is published: a drain that started
        // in between either sees this connection or it is rolled back here
        if !self.drain.is_healthy() {
            self.teardown(&handle, CloseReason::ServerClosed);
            return Err(GatewayError::Draining {
                state: self.drain.phase(),
            });
        }

        tracing::info!(
            connection_id = %connection_id,
            user_id = %handle.user_id,
            session_id = %handle.session_id,
            active = active,
            "Connection registered"
        );

        Ok(())
    }

    /// Remove a connection from the active set and the registry
    pub fn unregister(&self, connection_id: ConnectionId) -> bool {
        match self.connection(connection_id) {
            Some(handle) => self.teardown(&handle, CloseReason::ServerClosed),
            None => false,
        }
    }

    /// Single teardown path for every close cause. Safe to race: exactly one
    /// caller wins the handle's closed flag and unregisters it.
    pub fn teardown(&self, handle: &Arc<ConnectionHandle>, reason: CloseReason) -> bool {
        if !handle.mark_closed(reason) {
            return false;
        }
        self.remove_entry(handle, reason);
        true
    }

    fn remove_entry(&self, handle: &Arc<ConnectionHandle>, reason: CloseReason) {
        if self.connections.remove(&handle.id).is_none() {
            return;
        }
        let left = self.registry.remove_connection(handle.id);

        let active = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        self.counters.unregistered.fetch_add(1, Ordering::Relaxed);
        ConnectionMetrics::record_closed(reason.as_str(), active);

        let duration_secs = (chrono::Utc::now() - handle.connected_at).num_milliseconds() as f64 / 1000.0;
        tracing::info!(
            connection_id = %handle.id,
            user_id = %handle.user_id,
            reason = reason.as_str(),
            topics = left,
            dropped = handle.dropped_count(),
            duration_secs = duration_secs,
            "Connection unregistered"
        );

        if active == 0 {
            self.idle.notify_waiters();
        }
    }

    /// Subscribe on behalf of a client. User topics are gateway-managed.
    pub fn subscribe(&self, connection_id: ConnectionId, topic: &TopicKey) -> Result<bool, GatewayError> {
        if !topic.kind().client_managed() {
            return Err(GatewayError::ForbiddenTopic(topic.to_string()));
        }
        let handle = self
            .connection(connection_id)
            .ok_or(GatewayError::NotRegistered(connection_id))?;

        // The user topic is not counted against the limit
        let added = self.registry.try_subscribe(
            topic,
            connection_id,
            self.limits.max_subscriptions_per_connection + 1,
        )?;

        // Lost a race with teardown; do not leave a stale entry behind
        if handle.is_closed() {
            self.registry.unsubscribe(topic, connection_id);
            return Err(GatewayError::NotRegistered(connection_id));
        }

        if added {
            tracing::debug!(connection_id = %connection_id, topic = %topic, "Subscribed to topic");
        }
        Ok(added)
    }

    pub fn unsubscribe(&self, connection_id: ConnectionId, topic: &TopicKey) -> Result<bool, GatewayError> {
        if !topic.kind().client_managed() {
            return Err(GatewayError::ForbiddenTopic(topic.to_string()));
        }
        let removed = self.registry.unsubscribe(topic, connection_id);
        if removed {
            tracing::debug!(connection_id = %connection_id, topic = %topic, "Unsubscribed from topic");
        }
        Ok(removed)
    }

    /// Enqueue `event` onto every subscriber of `topic` without waiting on
    /// any of them.
    #[tracing::instrument(name = "hub.broadcast", skip_all, fields(topic = %topic))]
    pub fn broadcast(&self, topic: &TopicKey, event: &ServerMessage) -> DeliveryReport {
        let subscribers = self.registry.subscribers(topic);
        if subscribers.is_empty() {
            return DeliveryReport::default();
        }

        let outbound = match OutboundMessage::preserialize(event) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize event");
                return DeliveryReport::default();
            }
        };

        let handles = subscribers
            .into_iter()
            .filter_map(|id| self.connection(id));
        self.deliver(handles, outbound)
    }

    /// Deliver to every connection of `user_id` (multi-device fan-out)
    pub fn send_to_user(&self, user_id: &str, event: &ServerMessage) -> DeliveryReport {
        match TopicKey::user(user_id) {
            Ok(topic) => self.broadcast(&topic, event),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Cannot address user");
                DeliveryReport::default()
            }
        }
    }

    /// Deliver to every active connection (heartbeats, drain notices)
    pub fn broadcast_all(&self, event: &ServerMessage) -> DeliveryReport {
        let outbound = match OutboundMessage::preserialize(event) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize event");
                return DeliveryReport::default();
            }
        };
        self.deliver(self.all_connections().into_iter(), outbound)
    }

    fn deliver(
        &self,
        handles: impl Iterator<Item = Arc<ConnectionHandle>>,
        outbound: OutboundMessage,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for handle in handles {
            report.recipients += 1;
            match handle.try_enqueue(outbound.clone()) {
                EnqueueOutcome::Queued => report.delivered += 1,
                EnqueueOutcome::Dropped | EnqueueOutcome::Closed => report.dropped += 1,
            }
        }

        self.counters
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        EventMetrics::record_delivery(report.delivered as u64, report.dropped as u64);

        report
    }

    /// Force-close every remaining connection; returns how many were closed
    pub fn close_all(&self, reason: CloseReason) -> usize {
        self.all_connections()
            .iter()
            .filter(|handle| self.teardown(handle, reason))
            .count()
    }

    /// Resolve once no connection is active
    pub async fn wait_until_empty(&self) {
        loop {
            let notified = self.idle.notified();
            if self.connection_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn connection(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn user_connections(&self, user_id: &str) -> Vec<Arc<ConnectionHandle>> {
        let Ok(topic) = TopicKey::user(user_id) else {
            return Vec::new();
        };
        self.registry
            .subscribers(&topic)
            .into_iter()
            .filter_map(|id| self.connection(id))
            .collect()
    }

    pub fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn subscriptions_of(&self, connection_id: ConnectionId) -> Vec<TopicKey> {
        self.registry.topics_of(connection_id)
    }

    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Counter snapshot; reads atomics only
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connection_count(),
            drain_state: self.drain.phase(),
            registered_total: self.counters.registered.load(Ordering::Relaxed),
            unregistered_total: self.counters.unregistered.load(Ordering::Relaxed),
            events_delivered: self.counters.delivered.load(Ordering::Relaxed),
            events_dropped: self.counters.dropped.load(Ordering::Relaxed),
            topics: self.registry.topic_count(),
        }
    }

    pub fn topic_counts(&self) -> HashMap<String, usize> {
        self.registry.topic_counts()
    }
}
