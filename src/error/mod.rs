use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::drain::DrainPhase;

/// Errors raised by the gateway core (hub, registry, connection admission)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Gateway is not accepting connections (state: {state})")]
    Draining { state: DrainPhase },

    #[error("Connection {0} is not registered")]
    NotRegistered(Uuid),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Topic {0} cannot be changed by clients")]
    ForbiddenTopic(String),

    #[error("Subscription limit exceeded ({current}/{max})")]
    SubscriptionLimit { current: usize, max: usize },

    #[error("Identity error: {0}")]
    Identity(String),
}

impl GatewayError {
    /// Short machine-readable code sent to clients in `error` frames
    pub fn code(&self) -> &'static str {
        match self {
            Self::Draining { .. } => "DRAINING",
            Self::NotRegistered(_) => "NOT_REGISTERED",
            Self::InvalidTopic(_) => "INVALID_TOPIC",
            Self::ForbiddenTopic(_) => "FORBIDDEN_TOPIC",
            Self::SubscriptionLimit { .. } => "SUBSCRIPTION_LIMIT",
            Self::Identity(_) => "UNAUTHORIZED",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, client_message, log_message) = match &self {
            AppError::Config(e) => {
                let log_msg = e.to_string();
                let client_msg = if is_production() {
                    "Configuration error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", client_msg, log_msg)
            }
            AppError::Auth(msg) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                msg.clone(),
                msg.clone(),
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                msg.clone(),
            ),
            AppError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "UNAVAILABLE",
                msg.clone(),
                msg.clone(),
            ),
            AppError::Internal(e) => {
                let log_msg = e.clone();
                let client_msg = if is_production() {
                    "Internal server error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", client_msg, log_msg)
            }
            AppError::Redis(e) => {
                let log_msg = e.to_string();
                let client_msg = if is_production() {
                    "Service temporarily unavailable".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "REDIS_ERROR", client_msg, log_msg)
            }
            AppError::Gateway(e) => {
                let status = match e {
                    GatewayError::Draining { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    GatewayError::Identity(_) => StatusCode::UNAUTHORIZED,
                    GatewayError::NotRegistered(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, e.code(), e.to_string(), e.to_string())
            }
        };

        if status.is_server_error() {
            tracing::error!(
                code = %code,
                status = %status.as_u16(),
                message = %log_message,
                "API error"
            );
        } else {
            tracing::warn!(
                code = %code,
                status = %status.as_u16(),
                message = %log_message,
                "API request rejected"
            );
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
