//! Composition root: binds the transport, identity, hub and drain
//! controller together.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{Sink, SinkExt, Stream};
use tracing::Instrument;

use crate::auth::Identity;
use crate::config::GatewayConfig;
use crate::connection::{read_pump, write_pump, CloseReason, ConnectionHandle, InboundHandler};
use crate::drain::{DrainConfig, DrainController, DrainPhase, DrainResult};
use crate::error::GatewayError;
use crate::hub::{GatewayStats, Hub, HubLimits};
use crate::intents::{IntentForwarder, IntentOrigin};
use crate::metrics::UpgradeMetrics;
use crate::topic::{TopicKey, TopicKind};
use crate::websocket::{ClientMessage, ServerMessage, VoiceStateUpdate};

pub struct Gateway {
    hub: Arc<Hub>,
    drain: DrainController,
    router: Arc<InboundRouter>,
    config: GatewayConfig,
    started_at: Instant,
}

impl Gateway {
    pub fn new(config: GatewayConfig, forwarder: Arc<dyn IntentForwarder>) -> Self {
        let limits = HubLimits {
            max_subscriptions_per_connection: config.max_subscriptions_per_connection,
        };
        let hub = Arc::new(Hub::with_limits(Default::default(), limits));
        let drain = DrainController::new(hub.clone(), DrainConfig::from(&config));
        let router = Arc::new(InboundRouter {
            hub: hub.clone(),
            forwarder,
        });

        Self {
            hub,
            drain,
            router,
            config,
            started_at: Instant::now(),
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Admit an upgraded socket for an already-resolved identity.
    ///
    /// When the gateway is not healthy, or the identity's user id cannot be
    /// addressed, the socket is closed and no connection is created. Otherwise the handle is registered and its
    /// read and write pumps are spawned; the returned handle is for
    /// observation only.
    #[tracing::instrument(
        name = "gateway.connection",
        skip(self, sink, stream, identity),
        fields(user_id = %identity.user_id)
    )]
    pub async fn handle_connection<W, R, E>(
        &self,
        mut sink: W,
        stream: R,
        identity: Identity,
    ) -> Result<Arc<ConnectionHandle>, GatewayError>
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display + Send,
        R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        if !self.is_healthy() {
            return Err(self.reject(&mut sink).await);
        }
        if let Err(e) = identity.user_topic() {
            return Err(self.reject_identity(&mut sink, e).await);
        }

        let (handle, queue) =
            ConnectionHandle::with_queue(&identity, self.config.outbound_queue_capacity);

        // Queued before registration so it is always the first frame
        handle.send(ServerMessage::Hello {
            connection_id: handle.id,
            session_id: handle.session_id.clone(),
            heartbeat_interval_ms: self.config.heartbeat_interval().as_millis() as u64,
        });

        if let Err(e) = self.hub.register(handle.clone()) {
            if matches!(e, GatewayError::Draining { .. }) {
                return Err(self.reject(&mut sink).await);
            }
            let _ = sink.close().await;
            return Err(e);
        }

        let span = tracing::info_span!(
            "connection",
            connection_id = %handle.id,
            user_id = %handle.user_id
        );

        tokio::spawn({
            let hub = self.hub.clone();
            let handle = handle.clone();
            async move {
                if let Err(e) = write_pump(sink, queue, handle.clone()).await {
                    tracing::warn!(error = %e, "WebSocket send error");
                    hub.teardown(&handle, CloseReason::TransportError);
                }
            }
            .instrument(span.clone())
        });

        tokio::spawn({
            let hub = self.hub.clone();
            let handle = handle.clone();
            let router: Arc<dyn InboundHandler> = self.router.clone();
            let heartbeat_timeout = self.config.heartbeat_timeout();
            async move {
                let reason = read_pump(stream, handle.clone(), heartbeat_timeout, router).await;
                hub.teardown(&handle, reason);
            }
            .instrument(span)
        });

        Ok(handle)
    }

    async fn reject<W>(&self, sink: &mut W) -> GatewayError
    where
        W: Sink<Message> + Unpin,
    {
        let state = self.drain_state();
        UpgradeMetrics::record_rejected("draining");
        tracing::info!(state = %state, "Rejecting connection, gateway not accepting");
        let _ = sink.close().await;
        GatewayError::Draining { state }
    }

    async fn reject_identity<W>(&self, sink: &mut W, error: GatewayError) -> GatewayError
    where
        W: Sink<Message> + Unpin,
    {
        UpgradeMetrics::record_rejected("invalid_identity");
        tracing::warn!(error = %error, "Rejecting connection with unaddressable identity");
        let frame = CloseFrame {
            code: close_code::POLICY,
            reason: "invalid identity".into(),
        };
        let _ = sink.send(Message::Close(Some(frame))).await;
        let _ = sink.close().await;
        error
    }

    /// Point-in-time snapshot for observability
    pub fn get_stats(&self) -> GatewayStats {
        let hub_stats = self.hub.stats();
        let topics = self.hub.topic_counts();
        let unique_users = topics
            .keys()
            .filter(|topic| {
                topic
                    .split_once(':')
                    .is_some_and(|(kind, _)| kind == TopicKind::User.as_str())
            })
            .count();
        let slow_connections = self
            .hub
            .all_connections()
            .iter()
            .filter(|handle| handle.is_slow())
            .count();

        GatewayStats {
            connections: hub_stats.connections,
            unique_users,
            drain_state: hub_stats.drain_state,
            topics,
            slow_connections,
            events_delivered: hub_stats.events_delivered,
            events_dropped: hub_stats.events_dropped,
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.hub.drain_state().is_healthy()
    }

    pub fn is_draining(&self) -> bool {
        self.hub.drain_state().is_draining()
    }

    pub fn drain_state(&self) -> DrainPhase {
        self.hub.drain_state().phase()
    }

    /// Run the drain sequence; see [`DrainController::drain`]
    pub async fn drain(&self, reason: &str) -> DrainResult {
        self.drain.drain(reason).await
    }
}

/// Routes decoded client messages to the hub and the intent forwarder
struct InboundRouter {
    hub: Arc<Hub>,
    forwarder: Arc<dyn IntentForwarder>,
}

impl InboundRouter {
    fn change_subscriptions(&self, handle: &ConnectionHandle, topics: Vec<String>, subscribe: bool) {
        let mut accepted = Vec::with_capacity(topics.len());

        for raw in topics {
            let result = raw.parse::<TopicKey>().and_then(|topic| {
                if subscribe {
                    self.hub.subscribe(handle.id, &topic)
                } else {
                    self.hub.unsubscribe(handle.id, &topic)
                }
            });

            match result {
                Ok(_) => accepted.push(raw),
                Err(e) => {
                    tracing::debug!(connection_id = %handle.id, topic = %raw, error = %e, "Subscription change refused");
                    handle.send(ServerMessage::error(e.code(), e.to_string()));
                }
            }
        }

        if accepted.is_empty() {
            return;
        }
        let reply = if subscribe {
            ServerMessage::subscribed(accepted)
        } else {
            ServerMessage::unsubscribed(accepted)
        };
        handle.send(reply);
    }

    async fn forward_voice_state(&self, handle: &ConnectionHandle, update: VoiceStateUpdate) {
        let origin = IntentOrigin {
            user_id: handle.user_id.clone(),
            session_id: handle.session_id.clone(),
            connection_id: handle.id,
        };
        if let Err(e) = self.forwarder.voice_state_update(origin, update).await {
            tracing::warn!(connection_id = %handle.id, error = %e, "Failed to forward voice state update");
            handle.send(ServerMessage::error(
                "INTENT_FAILED",
                "Voice state update could not be delivered",
            ));
        }
    }
}

#[async_trait]
impl InboundHandler for InboundRouter {
    async fn on_client_message(&self, handle: &Arc<ConnectionHandle>, message: ClientMessage) {
        match message {
            ClientMessage::Heartbeat => {
                handle.send(ServerMessage::HeartbeatAck);
            }
            ClientMessage::Subscribe { topics } => self.change_subscriptions(handle, topics, true),
            ClientMessage::Unsubscribe { topics } => {
                self.change_subscriptions(handle, topics, false)
            }
            ClientMessage::VoiceStateUpdate(update) => {
                self.forward_voice_state(handle, update).await
            }
        }
    }
}
