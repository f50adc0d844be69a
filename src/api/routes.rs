use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;

use crate::events::http::{publish_to_topic, publish_to_user};
use crate::server::{api_key_auth, AppState};

use super::health::{gateway_stats, health, liveness, readiness};
use super::metrics::prometheus_metrics;

/// Upper bound on a published event body
const MAX_EVENT_BODY_BYTES: usize = 256 * 1024;

pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Orchestration probes
        .route("/health", get(health))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        // Observability
        .route("/gateway/stats", get(gateway_stats))
        .route("/metrics", get(prometheus_metrics))
        // Event publishing
        .nest(
            "/api/v1",
            Router::new()
                .route("/events/topic", post(publish_to_topic))
                .route("/events/user", post(publish_to_user))
                .route_layer(middleware::from_fn_with_state(state, api_key_auth))
                .layer(RequestBodyLimitLayer::new(MAX_EVENT_BODY_BYTES)),
        )
}
