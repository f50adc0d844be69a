use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::hub::{DeliveryReport, Hub};
use crate::metrics::EventMetrics;
use crate::topic::TopicKey;
use crate::websocket::ServerMessage;

/// Where an event goes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTarget {
    /// Every subscriber of a topic
    Topic(TopicKey),
    /// Every connection of one user
    User(String),
    /// Every connection of each listed user
    Users(Vec<String>),
}

impl EventTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Topic(_) => "topic",
            Self::User(_) => "user",
            Self::Users(_) => "users",
        }
    }
}

/// A user-visible state change emitted by a domain service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    /// Event name, e.g. `MESSAGE_CREATE`
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub target: EventTarget,
}

impl GatewayEvent {
    pub fn new(event: impl Into<String>, data: serde_json::Value, target: EventTarget) -> Self {
        Self {
            event: event.into(),
            data,
            target,
        }
    }
}

/// Hub-backed publish entry point shared by the Redis subscriber and the
/// HTTP endpoints
#[derive(Clone)]
pub struct EventPublisher {
    hub: Arc<Hub>,
}

impl EventPublisher {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    #[tracing::instrument(
        name = "events.publish",
        skip_all,
        fields(event = %event.event, target = event.target.kind())
    )]
    pub fn publish(&self, event: GatewayEvent) -> DeliveryReport {
        EventMetrics::record_published(event.target.kind());

        let GatewayEvent {
            event,
            data,
            target,
        } = event;

        let report = match target {
            EventTarget::Topic(topic) => self.broadcast(&topic, event, data),
            EventTarget::User(user_id) => self.send_to_user(&user_id, event, data),
            EventTarget::Users(user_ids) => {
                user_ids
                    .iter()
                    .fold(DeliveryReport::default(), |acc, user_id| {
                        let report = self.send_to_user(user_id, event.clone(), data.clone());
                        DeliveryReport {
                            recipients: acc.recipients + report.recipients,
                            delivered: acc.delivered + report.delivered,
                            dropped: acc.dropped + report.dropped,
                        }
                    })
            }
        };

        tracing::debug!(
            recipients = report.recipients,
            delivered = report.delivered,
            dropped = report.dropped,
            "Event published"
        );
        report
    }

    /// Dispatch to every subscriber of `topic`
    pub fn broadcast(
        &self,
        topic: &TopicKey,
        event: impl Into<String>,
        data: serde_json::Value,
    ) -> DeliveryReport {
        let message = ServerMessage::Dispatch {
            topic: topic.to_string(),
            event: event.into(),
            data,
        };
        self.hub.broadcast(topic, &message)
    }

    /// Dispatch to every connection of `user_id`
    pub fn send_to_user(
        &self,
        user_id: &str,
        event: impl Into<String>,
        data: serde_json::Value,
    ) -> DeliveryReport {
        let topic = match TopicKey::user(user_id) {
            Ok(topic) => topic,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Cannot address user");
                return DeliveryReport::default();
            }
        };
        let message = ServerMessage::Dispatch {
            topic: topic.to_string(),
            event: event.into(),
            data,
        };
        self.hub.send_to_user(user_id, &message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::connection::ConnectionHandle;
    use crate::drain::DrainState;
    use crate::websocket::OutboundMessage;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn setup() -> (Arc<Hub>, EventPublisher) {
        let hub = Arc::new(Hub::new(Arc::new(DrainState::new())));
        (hub.clone(), EventPublisher::new(hub))
    }

    fn dispatched(rx: &mut mpsc::Receiver<OutboundMessage>) -> serde_json::Value {
        let message = rx.try_recv().expect("expected a queued message");
        serde_json::from_str(&message.to_json().unwrap()).unwrap()
    }

    #[test]
    fn test_event_wire_format() {
        let event: GatewayEvent = serde_json::from_value(json!({
            "event": "MESSAGE_CREATE",
            "data": {"content": "hi"},
            "target": {"topic": "channel:123"}
        }))
        .unwrap();
        assert_eq!(event.target, EventTarget::Topic(TopicKey::channel("123").unwrap()));

        let event: GatewayEvent = serde_json::from_value(json!({
            "event": "READ_STATE_UPDATE",
            "target": {"users": ["a", "b"]}
        }))
        .unwrap();
        assert_eq!(event.target.kind(), "users");
        assert!(event.data.is_null());
    }

    #[test]
    fn test_publish_to_topic() {
        let (hub, publisher) = setup();
        let (a, mut rx_a) = ConnectionHandle::with_queue(&Identity::new("a", "s"), 8);
        let (b, mut rx_b) = ConnectionHandle::with_queue(&Identity::new("b", "s"), 8);
        hub.register(a.clone()).unwrap();
        hub.register(b).unwrap();
        let topic = TopicKey::channel("123").unwrap();
        hub.subscribe(a.id, &topic).unwrap();

        let report = publisher.publish(GatewayEvent::new(
            "MESSAGE_CREATE",
            json!({"id": 1}),
            EventTarget::Topic(topic),
        ));

        assert_eq!(report.delivered, 1);
        let value = dispatched(&mut rx_a);
        assert_eq!(value["type"], "dispatch");
        assert_eq!(value["topic"], "channel:123");
        assert_eq!(value["event"], "MESSAGE_CREATE");
        assert_eq!(value["data"]["id"], 1);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_publish_to_users_sums_reports() {
        let (hub, publisher) = setup();
        let (a1, mut rx_a1) = ConnectionHandle::with_queue(&Identity::new("a", "s1"), 8);
        let (a2, mut rx_a2) = ConnectionHandle::with_queue(&Identity::new("a", "s2"), 8);
        let (b, mut rx_b) = ConnectionHandle::with_queue(&Identity::new("b", "s"), 8);
        hub.register(a1).unwrap();
        hub.register(a2).unwrap();
        hub.register(b).unwrap();

        let report = publisher.publish(GatewayEvent::new(
            "PRESENCE_UPDATE",
            json!({"status": "online"}),
            EventTarget::Users(vec!["a".into(), "b".into(), "nobody".into()]),
        ));

        assert_eq!(report.recipients, 3);
        assert_eq!(report.delivered, 3);
        assert_eq!(dispatched(&mut rx_a1)["topic"], "user:a");
        assert_eq!(dispatched(&mut rx_a2)["topic"], "user:a");
        assert_eq!(dispatched(&mut rx_b)["topic"], "user:b");
    }

    #[test]
    fn test_send_to_invalid_user_delivers_nothing() {
        let (_hub, publisher) = setup();
        let report = publisher.send_to_user("not a valid id", "X", json!(null));
        assert_eq!(report, DeliveryReport::default());
    }
}
