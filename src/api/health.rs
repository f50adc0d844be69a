//! Health, liveness, readiness and stats endpoints.
//!
//! Liveness never reflects drain state; readiness flips to 503 as soon as a
//! drain starts so load balancers stop routing new upgrades here.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::drain::DrainPhase;
use crate::hub::GatewayStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub drain_state: DrainPhase,
    pub connections: usize,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub alive: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ReadinessResponse {
    Ready {
        ready: bool,
        connections: usize,
    },
    NotReady {
        ready: bool,
        reason: &'static str,
        drain_state: DrainPhase,
    },
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    let gateway = &state.gateway;
    let healthy = gateway.is_healthy();
    let body = HealthResponse {
        status: if healthy { "ok" } else { "draining" },
        drain_state: gateway.drain_state(),
        connections: gateway.hub().connection_count(),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// GET /healthz
pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { alive: true })
}

/// GET /readyz
pub async fn readiness(State(state): State<AppState>) -> Response {
    let gateway = &state.gateway;
    if gateway.is_healthy() {
        let body = ReadinessResponse::Ready {
            ready: true,
            connections: gateway.hub().connection_count(),
        };
        return (StatusCode::OK, Json(body)).into_response();
    }

    let body = ReadinessResponse::NotReady {
        ready: false,
        reason: "draining",
        drain_state: gateway.drain_state(),
    };
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

/// GET /gateway/stats
pub async fn gateway_stats(State(state): State<AppState>) -> Json<GatewayStats> {
    Json(state.gateway.get_stats())
}
