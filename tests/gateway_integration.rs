//! Gateway integration tests
//!
//! Connections are driven through in-memory channel halves standing in for
//! the WebSocket, so the full path runs: hello, read pump, inbound routing,
//! hub fan-out, write pump, teardown.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use serde_json::{json, Value};

use chat_gateway::auth::Identity;
use chat_gateway::config::GatewayConfig;
use chat_gateway::connection::ConnectionHandle;
use chat_gateway::drain::DrainPhase;
use chat_gateway::error::GatewayError;
use chat_gateway::events::EventPublisher;
use chat_gateway::gateway::Gateway;
use chat_gateway::intents::DiscardIntentForwarder;
use chat_gateway::topic::TopicKey;
use chat_gateway::websocket::ServerMessage;

/// Client side of a fake socket
struct TestClient {
    handle: Arc<ConnectionHandle>,
    to_server: UnboundedSender<Result<Message, Infallible>>,
    from_server: UnboundedReceiver<Message>,
}

impl TestClient {
    fn send(&self, value: Value) {
        self.to_server
            .unbounded_send(Ok(Message::Text(value.to_string().into())))
            .unwrap();
    }

    /// Next text frame as JSON
    async fn recv(&mut self) -> Value {
        let message = tokio::time::timeout(Duration::from_secs(2), self.from_server.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed");
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    /// Next frame, whatever it is; `None` once the server closed the sink
    async fn recv_raw(&mut self) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(3), self.from_server.next())
            .await
            .expect("timed out waiting for a frame")
    }

    /// Assert nothing else is queued right now
    async fn assert_idle(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(100), self.from_server.next()).await;
        assert!(next.is_err(), "unexpected frame: {:?}", next);
    }
}

fn test_config() -> GatewayConfig {
    GatewayConfig {
        outbound_queue_capacity: 16,
        heartbeat_interval_ms: 30_000,
        heartbeat_timeout_ms: 30_000,
        drain_timeout_ms: 50,
        reconnect_after_seconds: 2,
        notify_on_drain: true,
        max_subscriptions_per_connection: 10,
    }
}

fn gateway(config: GatewayConfig) -> Arc<Gateway> {
    Arc::new(Gateway::new(config, Arc::new(DiscardIntentForwarder)))
}

async fn connect(gateway: &Gateway, user: &str) -> TestClient {
    let (sink, from_server) = unbounded::<Message>();
    let (to_server, stream) = unbounded::<Result<Message, Infallible>>();
    let handle = gateway
        .handle_connection(sink, stream, Identity::new(user, format!("{user}-session")))
        .await
        .expect("connection should be admitted");

    let mut client = TestClient {
        handle,
        to_server,
        from_server,
    };
    let hello = client.recv().await;
    assert_eq!(hello["type"], "hello");
    client
}

async fn wait_for_connections(gateway: &Gateway, expected: usize) {
    for _ in 0..100 {
        if gateway.hub().connection_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} connections, have {}",
        expected,
        gateway.hub().connection_count()
    );
}

#[tokio::test]
async fn test_hello_is_first_frame() {
    let gateway = gateway(test_config());
    let (sink, mut from_server) = unbounded::<Message>();
    let (_to_server, stream) = unbounded::<Result<Message, Infallible>>();

    let handle = gateway
        .handle_connection(sink, stream, Identity::new("alice", "s-1"))
        .await
        .unwrap();

    let Some(Message::Text(text)) = from_server.next().await else {
        panic!("expected hello");
    };
    let hello: Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(hello["type"], "hello");
    assert_eq!(hello["connection_id"], handle.id.to_string());
    assert_eq!(hello["session_id"], "s-1");
    assert_eq!(hello["heartbeat_interval_ms"], 30_000);
}

#[tokio::test]
async fn test_subscribe_and_broadcast_end_to_end() {
    let gateway = gateway(test_config());
    let publisher = EventPublisher::new(gateway.hub().clone());

    let mut a = connect(&gateway, "a").await;
    let mut b = connect(&gateway, "b").await;

    a.send(json!({"type": "subscribe", "payload": {"topics": ["channel:123"]}}));
    let ack = a.recv().await;
    assert_eq!(ack["type"], "subscribed");
    assert_eq!(ack["topics"], json!(["channel:123"]));

    let topic = TopicKey::channel("123").unwrap();
    let report = publisher.broadcast(&topic, "MESSAGE_CREATE", json!({"content": "hello"}));
    assert_eq!(report.delivered, 1);

    let event = a.recv().await;
    assert_eq!(event["type"], "dispatch");
    assert_eq!(event["topic"], "channel:123");
    assert_eq!(event["event"], "MESSAGE_CREATE");
    assert_eq!(event["data"]["content"], "hello");

    a.assert_idle().await;
    b.assert_idle().await;
}

#[tokio::test]
async fn test_multi_device_fan_out() {
    let gateway = gateway(test_config());
    let mut phone = connect(&gateway, "u").await;
    let mut desktop = connect(&gateway, "u").await;
    let mut other = connect(&gateway, "v").await;

    let report = gateway.hub().send_to_user(
        "u",
        &ServerMessage::Dispatch {
            topic: "user:u".into(),
            event: "READ_STATE_UPDATE".into(),
            data: json!({"channel_id": "5"}),
        },
    );
    assert_eq!(report.recipients, 2);

    assert_eq!(phone.recv().await["event"], "READ_STATE_UPDATE");
    assert_eq!(desktop.recv().await["event"], "READ_STATE_UPDATE");
    phone.assert_idle().await;
    desktop.assert_idle().await;
    other.assert_idle().await;
}

#[tokio::test]
async fn test_heartbeat_and_error_frames() {
    let gateway = gateway(test_config());
    let mut client = connect(&gateway, "a").await;

    client.send(json!({"type": "heartbeat"}));
    assert_eq!(client.recv().await["type"], "heartbeat_ack");

    client
        .to_server
        .unbounded_send(Ok(Message::Text("{not json".into())))
        .unwrap();
    let error = client.recv().await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "INVALID_MESSAGE");

    client.send(json!({"type": "unsubscribe", "payload": {"topics": ["user:a"]}}));
    assert_eq!(client.recv().await["code"], "FORBIDDEN_TOPIC");

    // Still connected after bad input
    assert_eq!(gateway.hub().connection_count(), 1);
}

#[tokio::test]
async fn test_rejected_upgrade_while_draining() {
    let gateway = gateway(test_config());
    assert!(gateway.hub().drain_state().begin_draining());

    let (sink, mut from_server) = unbounded::<Message>();
    let (_to_server, stream) = unbounded::<Result<Message, Infallible>>();
    let result = gateway
        .handle_connection(sink, stream, Identity::new("late", "s"))
        .await;

    assert_eq!(
        result.unwrap_err(),
        GatewayError::Draining {
            state: DrainPhase::Draining
        }
    );
    assert!(from_server.next().await.is_none(), "socket should be closed");
    assert_eq!(gateway.get_stats().connections, 0);
    assert_eq!(gateway.hub().stats().registered_total, 0);
}

#[tokio::test]
async fn test_provider_style_user_id_is_admitted() {
    let gateway = gateway(test_config());
    let mut client = connect(&gateway, "auth0|42").await;

    let report = gateway.hub().send_to_user(
        "auth0|42",
        &ServerMessage::Dispatch {
            topic: "user:auth0|42".into(),
            event: "RELATIONSHIP_ADD".into(),
            data: json!({}),
        },
    );
    assert_eq!(report.delivered, 1);
    assert_eq!(client.recv().await["event"], "RELATIONSHIP_ADD");
}

#[tokio::test]
async fn test_unaddressable_identity_gets_policy_close() {
    let gateway = gateway(test_config());
    let (sink, mut from_server) = unbounded::<Message>();
    let (_to_server, stream) = unbounded::<Result<Message, Infallible>>();

    let result = gateway
        .handle_connection(sink, stream, Identity::new("", "s"))
        .await;
    assert!(matches!(result, Err(GatewayError::Identity(_))));

    match from_server.next().await {
        Some(Message::Close(Some(frame))) => assert_eq!(frame.code, 1008),
        other => panic!("expected policy close frame, got {:?}", other),
    }
    assert!(from_server.next().await.is_none());
    assert_eq!(gateway.hub().stats().registered_total, 0);
}

#[tokio::test]
async fn test_client_disconnect_tears_down() {
    let gateway = gateway(test_config());
    let client = connect(&gateway, "a").await;
    let id = client.handle.id;

    gateway
        .hub()
        .subscribe(id, &TopicKey::server("1").unwrap())
        .unwrap();

    drop(client);
    wait_for_connections(&gateway, 0).await;

    assert!(gateway.hub().subscriptions_of(id).is_empty());
    assert_eq!(gateway.get_stats().topics.len(), 0);
    assert_eq!(gateway.hub().stats().unregistered_total, 1);
}

#[tokio::test]
async fn test_heartbeat_timeout_closes_connection() {
    let gateway = gateway(GatewayConfig {
        heartbeat_timeout_ms: 200,
        ..test_config()
    });
    let mut client = connect(&gateway, "quiet").await;

    match client.recv_raw().await {
        Some(Message::Close(Some(frame))) => {
            assert_eq!(frame.code, chat_gateway::connection::CLOSE_HEARTBEAT_TIMEOUT);
        }
        other => panic!("expected close frame, got {:?}", other),
    }
    wait_for_connections(&gateway, 0).await;
}

#[tokio::test]
async fn test_drain_notifies_then_forces_closure() {
    let gateway = gateway(test_config());
    let mut client = connect(&gateway, "stubborn").await;

    let result = gateway.drain("deploy").await;

    assert!(result.started);
    assert!(result.timed_out);
    assert_eq!(result.clients_notified, 1);
    assert_eq!(result.connections_forced, 1);
    assert_eq!(gateway.drain_state(), DrainPhase::Closed);
    assert_eq!(gateway.hub().connection_count(), 0);

    let notice = client.recv().await;
    assert_eq!(notice["type"], "reconnect");
    assert_eq!(notice["reason"], "deploy");
    assert_eq!(notice["reconnect_after"], 2);

    assert!(matches!(client.recv_raw().await, Some(Message::Close(_))));
}

#[tokio::test]
async fn test_drain_completes_when_clients_leave() {
    let gateway = gateway(GatewayConfig {
        drain_timeout_ms: 10_000,
        ..test_config()
    });
    let mut client = connect(&gateway, "polite").await;

    let draining = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.drain("deploy").await })
    };

    assert_eq!(client.recv().await["type"], "reconnect");
    assert!(gateway.is_draining());
    drop(client);

    let result = draining.await.unwrap();
    assert!(!result.timed_out);
    assert_eq!(result.connections_closed, 1);
    assert_eq!(gateway.drain_state(), DrainPhase::Closed);
}
