use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::hub::Hub;
use crate::websocket::ServerMessage;

/// Sends a `heartbeat` frame to every connection on a fixed interval.
///
/// Enqueueing never waits, so one round costs a pass over the connection
/// set regardless of how slow individual clients are.
pub struct HeartbeatTask {
    interval: Duration,
    hub: Arc<Hub>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(interval: Duration, hub: Arc<Hub>, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            interval,
            hub,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = timer.tick() => self.send_heartbeats(),
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    fn send_heartbeats(&self) {
        if self.hub.connection_count() == 0 {
            return;
        }

        let start = Instant::now();
        let report = self.hub.broadcast_all(&ServerMessage::Heartbeat);

        tracing::debug!(
            delivered = report.delivered,
            dropped = report.dropped,
            elapsed_us = start.elapsed().as_micros() as u64,
            "Heartbeat round completed"
        );
    }
}
