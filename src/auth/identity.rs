use async_trait::async_trait;
use axum::http::{header, HeaderMap};

use crate::error::GatewayError;
use crate::topic::TopicKey;

/// A validated (user, session) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub session_id: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    /// The `user:` topic that backs delivery to this user's devices.
    /// Fails for ids that cannot be addressed, which callers treat as an
    /// authentication failure.
    pub fn user_topic(&self) -> Result<TopicKey, GatewayError> {
        TopicKey::user(&self.user_id)
            .map_err(|_| GatewayError::Identity(format!("Unaddressable user id {:?}", self.user_id)))
    }
}

/// Raw credentials carried by an upgrade request
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub token: Option<String>,
}

impl Credentials {
    /// Token from the `token` query parameter, else `Authorization: Bearer`
    pub fn from_request(query_token: Option<&str>, headers: &HeaderMap) -> Self {
        if let Some(token) = query_token {
            return Self {
                token: Some(token.to_string()),
            };
        }

        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);

        Self { token }
    }
}

/// Turns upgrade credentials into an identity. Supplied by the auth layer.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credentials: &Credentials) -> Result<Identity, GatewayError>;
}
