//! Topic keys identify a broadcast scope: a server, a channel, or a single
//! user's set of devices.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::GatewayError;

const MAX_ID_LEN: usize = 64;
/// User ids come from the identity provider verbatim (`auth0|42`, emails)
const MAX_USER_ID_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Server,
    Channel,
    User,
}

impl TopicKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Channel => "channel",
            Self::User => "user",
        }
    }

    /// User topics are managed by the gateway, never by client intents
    pub fn client_managed(&self) -> bool {
        !matches!(self, Self::User)
    }
}

/// `server:<id>`, `channel:<id>` or `user:<id>`.
///
/// The rendered key is kept behind an `Arc<str>` so registry lookups and
/// subscriber snapshots clone it without reallocating.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicKey {
    kind: TopicKind,
    key: Arc<str>,
}

impl TopicKey {
    pub fn server(id: &str) -> Result<Self, GatewayError> {
        Self::new(TopicKind::Server, id)
    }

    pub fn channel(id: &str) -> Result<Self, GatewayError> {
        Self::new(TopicKind::Channel, id)
    }

    pub fn user(id: &str) -> Result<Self, GatewayError> {
        Self::new(TopicKind::User, id)
    }

    pub fn new(kind: TopicKind, id: &str) -> Result<Self, GatewayError> {
        let valid = match kind {
            TopicKind::User => is_valid_user_id(id),
            TopicKind::Server | TopicKind::Channel => is_valid_id(id),
        };
        if !valid {
            return Err(GatewayError::InvalidTopic(format!("{}:{}", kind.as_str(), id)));
        }
        Ok(Self {
            kind,
            key: Arc::from(format!("{}:{}", kind.as_str(), id)),
        })
    }

    pub fn kind(&self) -> TopicKind {
        self.kind
    }

    /// The id portion after the `<kind>:` prefix
    pub fn id(&self) -> &str {
        &self.key[self.kind.as_str().len() + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

fn is_valid_id(id: &str) -> bool {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return false;
    }

    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Any non-empty id without control characters; kept as-is in the key
pub fn is_valid_user_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_USER_ID_LEN && !id.chars().any(char::is_control)
}

impl FromStr for TopicKey {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| GatewayError::InvalidTopic(s.to_string()))?;

        let kind = match kind {
            "server" => TopicKind::Server,
            "channel" => TopicKind::Channel,
            "user" => TopicKind::User,
            _ => return Err(GatewayError::InvalidTopic(s.to_string())),
        };

        Self::new(kind, id)
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl Serialize for TopicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key)
    }
}

impl<'de> Deserialize<'de> for TopicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
