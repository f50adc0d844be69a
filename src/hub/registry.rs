//! Topic subscription registry.
//!
//! Two sharded maps: topic -> subscribers and connection -> topics. Lock
//! order is always memberships before topics, and no guard on `topics` is
//! ever held while touching `memberships`, so the pair cannot deadlock.
//! Empty sets are removed under the shard lock with `remove_if`.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;

use crate::connection::ConnectionId;
use crate::error::GatewayError;
use crate::topic::TopicKey;

#[derive(Default)]
pub struct SubscriptionRegistry {
    topics: DashMap<TopicKey, HashSet<ConnectionId>>,
    memberships: DashMap<ConnectionId, HashSet<TopicKey>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection_id` under `topic`. Idempotent; returns whether the
    /// subscription is new.
    pub fn subscribe(&self, topic: &TopicKey, connection_id: ConnectionId) -> bool {
        let mut joined = self.memberships.entry(connection_id).or_default();
        if !joined.insert(topic.clone()) {
            return false;
        }
        self.topics
            .entry(topic.clone())
            .or_default()
            .insert(connection_id);
        true
    }

    /// Like [`subscribe`](Self::subscribe) but refuses once the connection
    /// already holds `max` subscriptions. Re-subscribing never counts.
    pub fn try_subscribe(
        &self,
        topic: &TopicKey,
        connection_id: ConnectionId,
        max: usize,
    ) -> Result<bool, GatewayError> {
        let mut joined = self.memberships.entry(connection_id).or_default();
        if joined.contains(topic) {
            return Ok(false);
        }
        if joined.len() >= max {
            return Err(GatewayError::SubscriptionLimit {
                current: joined.len(),
                max,
            });
        }
        joined.insert(topic.clone());
        self.topics
            .entry(topic.clone())
            .or_default()
            .insert(connection_id);
        Ok(true)
    }

    /// Remove `connection_id` from `topic`. Removing a non-member is a no-op.
    pub fn unsubscribe(&self, topic: &TopicKey, connection_id: ConnectionId) -> bool {
        let now_empty = {
            let Some(mut joined) = self.memberships.get_mut(&connection_id) else {
                return false;
            };
            if !joined.remove(topic) {
                return false;
            }
            self.remove_subscriber(topic, connection_id);
            joined.is_empty()
        };

        if now_empty {
            self.memberships
                .remove_if(&connection_id, |_, joined| joined.is_empty());
        }
        true
    }

    /// Snapshot of the subscribers of `topic`; safe to iterate while the
    /// registry keeps changing.
    pub fn subscribers(&self, topic: &TopicKey) -> Vec<ConnectionId> {
        self.topics
            .get(topic)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: &TopicKey) -> usize {
        self.topics.get(topic).map(|set| set.len()).unwrap_or(0)
    }

    pub fn is_subscribed(&self, topic: &TopicKey, connection_id: ConnectionId) -> bool {
        self.topics
            .get(topic)
            .map(|set| set.contains(&connection_id))
            .unwrap_or(false)
    }

    /// Topics `connection_id` currently belongs to
    pub fn topics_of(&self, connection_id: ConnectionId) -> Vec<TopicKey> {
        self.memberships
            .get(&connection_id)
            .map(|joined| joined.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop the connection from every topic; returns how many it left
    pub fn remove_connection(&self, connection_id: ConnectionId) -> usize {
        let Some((_, joined)) = self.memberships.remove(&connection_id) else {
            return 0;
        };
        for topic in &joined {
            self.remove_subscriber(topic, connection_id);
        }
        joined.len()
    }

    /// Number of topics with at least one subscriber
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Per-topic subscriber counts; visits one shard at a time
    pub fn topic_counts(&self) -> HashMap<String, usize> {
        self.topics
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().len()))
            .collect()
    }

    fn remove_subscriber(&self, topic: &TopicKey, connection_id: ConnectionId) {
        if let Some(mut set) = self.topics.get_mut(topic) {
            set.remove(&connection_id);
        }
        self.topics.remove_if(topic, |_, set| set.is_empty());
    }
}
