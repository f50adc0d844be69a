use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::config::GatewayConfig;
use crate::connection::CloseReason;
use crate::hub::Hub;
use crate::metrics::DrainMetrics;
use crate::websocket::ServerMessage;

use super::state::{DrainPhase, DrainState};

/// Configuration for the drain sequence
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// How long to wait for clients to leave on their own
    pub drain_timeout: Duration,
    /// Reconnect delay hint sent to clients
    pub reconnect_after_seconds: u64,
    /// Send the `reconnect` event when the drain starts
    pub notify_clients: bool,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
            reconnect_after_seconds: 5,
            notify_clients: true,
        }
    }
}

impl From<&GatewayConfig> for DrainConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            drain_timeout: config.drain_timeout(),
            reconnect_after_seconds: config.reconnect_after_seconds,
            notify_clients: config.notify_on_drain,
        }
    }
}

/// Result of a drain
#[derive(Debug, Default)]
pub struct DrainResult {
    /// False when another caller had already started the drain
    pub started: bool,
    /// Connections that were sent the reconnect event
    pub clients_notified: usize,
    /// Connections that left before the timeout
    pub connections_closed: usize,
    /// Connections force-closed at the timeout
    pub connections_forced: usize,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Drives `Healthy -> Draining -> Closed` for a rolling deploy
pub struct DrainController {
    hub: Arc<Hub>,
    state: Arc<DrainState>,
    config: DrainConfig,
}

impl DrainController {
    pub fn new(hub: Arc<Hub>, config: DrainConfig) -> Self {
        let state = hub.drain_state().clone();
        Self { hub, state, config }
    }

    pub fn phase(&self) -> DrainPhase {
        self.state.phase()
    }

    /// Stop admitting connections, ask clients to reconnect elsewhere, wait
    /// for them to leave, then force-close whoever is left.
    ///
    /// Only the first call runs the sequence; later calls return immediately
    /// with `started == false`.
    #[tracing::instrument(
        name = "gateway.drain",
        skip(self),
        fields(connections = self.hub.connection_count())
    )]
    pub async fn drain(&self, reason: &str) -> DrainResult {
        let start = Instant::now();
        let mut result = DrainResult::default();

        if !self.state.begin_draining() {
            tracing::debug!(state = %self.state.phase(), "Drain already in progress");
            return result;
        }
        result.started = true;
        DrainMetrics::set_phase(DrainPhase::Draining);

        let initial = self.hub.connection_count();
        tracing::info!(
            reason = %reason,
            connections = initial,
            timeout_ms = self.config.drain_timeout.as_millis() as u64,
            "Drain started, refusing new connections"
        );

        if self.config.notify_clients && initial > 0 {
            let notice = ServerMessage::reconnect(reason, self.config.reconnect_after_seconds);
            result.clients_notified = self.hub.broadcast_all(&notice).delivered;
            tracing::info!(notified = result.clients_notified, "Reconnect notices queued");
        }

        match timeout(self.config.drain_timeout, self.hub.wait_until_empty()).await {
            Ok(()) => {
                result.connections_closed = initial;
            }
            Err(_) => {
                let remaining = self.hub.connection_count();
                result.timed_out = true;
                result.connections_closed = initial.saturating_sub(remaining);
                result.connections_forced = self.hub.close_all(CloseReason::DrainTimeout);
                DrainMetrics::record_forced(result.connections_forced as u64);
                tracing::warn!(
                    remaining = remaining,
                    forced = result.connections_forced,
                    "Drain timeout elapsed, closing remaining connections"
                );
            }
        }

        self.state.close();
        DrainMetrics::set_phase(DrainPhase::Closed);
        result.duration = start.elapsed();

        tracing::info!(
            clients_notified = result.clients_notified,
            connections_closed = result.connections_closed,
            connections_forced = result.connections_forced,
            duration_ms = result.duration.as_millis() as u64,
            "Drain completed"
        );

        result
    }
}
