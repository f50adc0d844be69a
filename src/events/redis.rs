use futures::StreamExt;
use tokio::sync::broadcast;

use crate::config::RedisConfig;

use super::backoff::ExponentialBackoff;
use super::publisher::{EventPublisher, GatewayEvent};

const DEFAULT_CHANNEL_PATTERN: &str = "gateway:events:*";

/// How a subscription session ended
enum SessionEnd {
    Shutdown,
    Lost(anyhow::Error),
}

/// Consumes domain events from Redis pub/sub and publishes them to clients.
///
/// Each message payload is one JSON [`GatewayEvent`]. Channel names only
/// select what this process listens to; the target comes from the payload.
pub struct RedisEventSubscriber {
    config: RedisConfig,
    publisher: EventPublisher,
    shutdown: broadcast::Sender<()>,
}

impl RedisEventSubscriber {
    pub fn new(
        config: RedisConfig,
        publisher: EventPublisher,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            config,
            publisher,
            shutdown,
        }
    }

    fn channels(&self) -> Vec<String> {
        if self.config.channels.is_empty() {
            vec![DEFAULT_CHANNEL_PATTERN.to_string()]
        } else {
            self.config.channels.clone()
        }
    }

    /// Subscribe and keep resubscribing until shutdown is signalled
    pub async fn run(self) -> anyhow::Result<()> {
        let channels = self.channels();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut backoff = ExponentialBackoff::new();

        tracing::info!(channels = ?channels, "Starting Redis event subscriber");

        loop {
            let session = tokio::select! {
                _ = shutdown_rx.recv() => SessionEnd::Shutdown,
                end = self.run_session(&channels, &mut backoff) => end,
            };

            match session {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost(e) => {
                    let delay = backoff.next_delay();
                    tracing::error!(
                        error = %e,
                        attempt = backoff.attempt(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Redis subscription lost, reconnecting"
                    );
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        tracing::info!("Redis event subscriber stopped");
        Ok(())
    }

    async fn run_session(&self, channels: &[String], backoff: &mut ExponentialBackoff) -> SessionEnd {
        let mut pubsub = match self.connect(channels).await {
            Ok(pubsub) => pubsub,
            Err(e) => return SessionEnd::Lost(e),
        };

        tracing::info!("Redis subscription established");
        backoff.reset();

        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let channel = msg.get_channel_name().to_string();
            match msg.get_payload::<String>() {
                Ok(payload) => self.handle_message(&channel, &payload),
                Err(e) => tracing::warn!(error = %e, channel = %channel, "Failed to read message payload"),
            }
        }

        SessionEnd::Lost(anyhow::anyhow!("Redis message stream ended"))
    }

    async fn connect(&self, channels: &[String]) -> anyhow::Result<redis::aio::PubSub> {
        let client = redis::Client::open(self.config.url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;

        for channel in channels {
            if is_pattern(channel) {
                pubsub.psubscribe(channel).await?;
                tracing::debug!(pattern = %channel, "Subscribed to pattern");
            } else {
                pubsub.subscribe(channel).await?;
                tracing::debug!(channel = %channel, "Subscribed to channel");
            }
        }

        Ok(pubsub)
    }

    fn handle_message(&self, channel: &str, payload: &str) {
        match parse_event(payload) {
            Ok(event) => {
                self.publisher.publish(event);
            }
            Err(e) => {
                tracing::warn!(error = %e, channel = %channel, "Discarding malformed event");
            }
        }
    }
}

fn is_pattern(channel: &str) -> bool {
    channel.contains(['*', '?', '['])
}

fn parse_event(payload: &str) -> Result<GatewayEvent, serde_json::Error> {
    serde_json::from_str(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventTarget;

    #[test]
    fn test_pattern_detection() {
        assert!(is_pattern("gateway:events:*"));
        assert!(is_pattern("gateway:events:?"));
        assert!(is_pattern("gateway:[ab]"));
        assert!(!is_pattern("gateway:events:messages"));
    }

    #[test]
    fn test_parse_event_payload() {
        let event = parse_event(
            r#"{"event":"VOICE_STATE_UPDATE","data":{"user_id":"7"},"target":{"topic":"server:9"}}"#,
        )
        .unwrap();
        assert_eq!(event.event, "VOICE_STATE_UPDATE");
        assert!(matches!(event.target, EventTarget::Topic(_)));

        assert!(parse_event(r#"{"event":"X","target":{"topic":"nope"}}"#).is_err());
        assert!(parse_event("not json").is_err());
    }

    #[test]
    fn test_default_channels() {
        let hub = std::sync::Arc::new(crate::hub::Hub::new(std::sync::Arc::new(
            crate::drain::DrainState::new(),
        )));
        let (shutdown, _) = broadcast::channel(1);
        let subscriber = RedisEventSubscriber::new(
            RedisConfig::default(),
            EventPublisher::new(hub),
            shutdown,
        );
        assert_eq!(subscriber.channels(), vec![DEFAULT_CHANNEL_PATTERN.to_string()]);
    }
}
