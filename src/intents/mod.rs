//! Forwarding of client domain intents to the services that own them.
//!
//! The gateway does not interpret voice state; it tags the update with the
//! sender's identity and hands it on.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use uuid::Uuid;

use crate::config::RedisConfig;
use crate::websocket::VoiceStateUpdate;

#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    #[error("Failed to encode intent: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Failed to publish intent: {0}")]
    Publish(#[from] redis::RedisError),
}

/// Who sent an intent
#[derive(Debug, Clone, Serialize)]
pub struct IntentOrigin {
    pub user_id: String,
    pub session_id: String,
    pub connection_id: Uuid,
}

#[async_trait]
pub trait IntentForwarder: Send + Sync {
    async fn voice_state_update(
        &self,
        origin: IntentOrigin,
        update: VoiceStateUpdate,
    ) -> Result<(), IntentError>;
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IntentEnvelope {
    VoiceStateUpdate {
        #[serde(flatten)]
        origin: IntentOrigin,
        payload: VoiceStateUpdate,
    },
}

/// Publishes intents as JSON onto a Redis channel
pub struct RedisIntentForwarder {
    connection: ConnectionManager,
    channel: String,
}

impl RedisIntentForwarder {
    pub async fn connect(config: &RedisConfig) -> Result<Self, IntentError> {
        let client = redis::Client::open(config.url.as_str())?;
        let connection = ConnectionManager::new(client).await?;
        tracing::info!(channel = %config.intents_channel, "Intent forwarder connected to Redis");
        Ok(Self {
            connection,
            channel: config.intents_channel.clone(),
        })
    }
}

#[async_trait]
impl IntentForwarder for RedisIntentForwarder {
    async fn voice_state_update(
        &self,
        origin: IntentOrigin,
        update: VoiceStateUpdate,
    ) -> Result<(), IntentError> {
        let payload = serde_json::to_string(&IntentEnvelope::VoiceStateUpdate {
            origin,
            payload: update,
        })?;
        let mut conn = self.connection.clone();
        let _: i64 = conn.publish(&self.channel, payload).await?;
        Ok(())
    }
}

/// Used when no intent backend is configured; intents are logged and dropped
#[derive(Debug, Default)]
pub struct DiscardIntentForwarder;

#[async_trait]
impl IntentForwarder for DiscardIntentForwarder {
    async fn voice_state_update(
        &self,
        origin: IntentOrigin,
        update: VoiceStateUpdate,
    ) -> Result<(), IntentError> {
        tracing::debug!(
            user_id = %origin.user_id,
            server_id = %update.server_id,
            channel_id = ?update.channel_id,
            "No intent backend configured, dropping voice state update"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let envelope = IntentEnvelope::VoiceStateUpdate {
            origin: IntentOrigin {
                user_id: "u1".into(),
                session_id: "s1".into(),
                connection_id: Uuid::nil(),
            },
            payload: VoiceStateUpdate {
                server_id: "9".into(),
                channel_id: Some("3".into()),
                self_mute: false,
                self_deaf: true,
            },
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "voice_state_update");
        assert_eq!(value["user_id"], "u1");
        assert_eq!(value["session_id"], "s1");
        assert_eq!(value["payload"]["channel_id"], "3");
        assert_eq!(value["payload"]["self_deaf"], true);
    }

    #[tokio::test]
    async fn test_discard_forwarder_accepts() {
        let forwarder = DiscardIntentForwarder;
        let origin = IntentOrigin {
            user_id: "u1".into(),
            session_id: "s1".into(),
            connection_id: Uuid::new_v4(),
        };
        let update = VoiceStateUpdate {
            server_id: "9".into(),
            channel_id: None,
            self_mute: false,
            self_deaf: false,
        };
        assert!(forwarder.voice_state_update(origin, update).await.is_ok());
    }
}
