//! HTTP publish endpoints for services that cannot reach Redis

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::hub::DeliveryReport;
use crate::server::AppState;
use crate::topic::TopicKey;

use super::{EventTarget, GatewayEvent};

/// Body of `POST /api/v1/events/topic`
#[derive(Debug, Deserialize)]
pub struct TopicEventRequest {
    /// e.g. `channel:123`
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Body of `POST /api/v1/events/user`; set `user_id`, `user_ids`, or both
#[derive(Debug, Deserialize)]
pub struct UserEventRequest {
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_ids: Vec<String>,
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub recipients: usize,
    pub delivered: usize,
    pub dropped: usize,
    pub timestamp: DateTime<Utc>,
}

impl From<DeliveryReport> for PublishResponse {
    fn from(report: DeliveryReport) -> Self {
        Self {
            recipients: report.recipients,
            delivered: report.delivered,
            dropped: report.dropped,
            timestamp: Utc::now(),
        }
    }
}

fn require_event_name(event: &str) -> Result<()> {
    if event.trim().is_empty() {
        return Err(AppError::Validation("event must not be empty".to_string()));
    }
    Ok(())
}

/// Dispatch to every subscriber of a topic
pub async fn publish_to_topic(
    State(state): State<AppState>,
    Json(request): Json<TopicEventRequest>,
) -> Result<Json<PublishResponse>> {
    require_event_name(&request.event)?;
    let topic: TopicKey = request.topic.parse()?;

    let report = state.publisher.publish(GatewayEvent::new(
        request.event,
        request.data,
        EventTarget::Topic(topic),
    ));

    Ok(Json(report.into()))
}

/// Dispatch to every connection of one or more users
pub async fn publish_to_user(
    State(state): State<AppState>,
    Json(request): Json<UserEventRequest>,
) -> Result<Json<PublishResponse>> {
    require_event_name(&request.event)?;

    let mut user_ids = request.user_ids;
    if let Some(user_id) = request.user_id {
        user_ids.push(user_id);
    }
    let target = match user_ids.as_slice() {
        [] => {
            return Err(AppError::Validation(
                "user_id or user_ids is required".to_string(),
            ))
        }
        [only] => EventTarget::User(only.clone()),
        _ => EventTarget::Users(user_ids),
    };

    let report = state
        .publisher
        .publish(GatewayEvent::new(request.event, request.data, target));

    Ok(Json(report.into()))
}
