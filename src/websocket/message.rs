use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Heartbeat,
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    VoiceStateUpdate(VoiceStateUpdate),
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::VoiceStateUpdate(_) => "voice_state_update",
        }
    }
}

/// Voice signaling intent; forwarded to the voice-state service untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceStateUpdate {
    pub server_id: String,
    /// `None` leaves voice
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub self_mute: bool,
    #[serde(default)]
    pub self_deaf: bool,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Hello {
        connection_id: Uuid,
        session_id: String,
        heartbeat_interval_ms: u64,
    },
    Dispatch {
        topic: String,
        event: String,
        data: serde_json::Value,
    },
    Subscribed {
        topics: Vec<String>,
    },
    Unsubscribed {
        topics: Vec<String>,
    },
    Heartbeat,
    HeartbeatAck,
    Reconnect {
        reason: String,
        reconnect_after: u64,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn subscribed(topics: Vec<String>) -> Self {
        Self::Subscribed { topics }
    }

    pub fn unsubscribed(topics: Vec<String>) -> Self {
        Self::Unsubscribed { topics }
    }

    pub fn reconnect(reason: impl Into<String>, reconnect_after: u64) -> Self {
        Self::Reconnect {
            reason: reason.into(),
            reconnect_after,
        }
    }
}

/// An entry in a connection's outbound queue.
///
/// Fan-out serializes a dispatch once and shares the text across every
/// recipient queue; control frames are serialized by the write pump.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Raw(ServerMessage),
    Preserialized(Arc<str>),
}

impl OutboundMessage {
    pub fn preserialize(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(message)?;
        Ok(Self::Preserialized(Arc::from(json)))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Raw(message) => serde_json::to_string(message),
            Self::Preserialized(json) => Ok(json.to_string()),
        }
    }
}

impl From<ServerMessage> for OutboundMessage {
    fn from(message: ServerMessage) -> Self {
        Self::Raw(message)
    }
}
