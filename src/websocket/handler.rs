use axum::{
    extract::{ws::WebSocket, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;

use crate::auth::{Credentials, Identity};
use crate::error::{AppError, GatewayError};
use crate::gateway::Gateway;
use crate::metrics::UpgradeMetrics;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// Refuses with 503 before the handshake once the gateway is draining, and
/// with 401 when the identity resolver rejects the credentials or returns a
/// user id the hub cannot address.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    if !state.gateway.is_healthy() {
        UpgradeMetrics::record_rejected("draining");
        tracing::info!(state = %state.gateway.drain_state(), "Upgrade refused while draining");
        return AppError::from(GatewayError::Draining {
            state: state.gateway.drain_state(),
        })
        .into_response();
    }

    let credentials = Credentials::from_request(query.token.as_deref(), &headers);
    let resolved = state
        .identity_resolver
        .resolve(&credentials)
        .await
        .and_then(|identity| identity.user_topic().map(|_| identity));
    let identity = match resolved {
        Ok(identity) => identity,
        Err(e) => {
            UpgradeMetrics::record_rejected("unauthorized");
            tracing::warn!(error = %e, "Identity resolution failed");
            return AppError::from(e).into_response();
        }
    };

    tracing::info!(user_id = %identity.user_id, "WebSocket upgrade accepted");

    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, identity))
}

async fn handle_socket(socket: WebSocket, gateway: std::sync::Arc<Gateway>, identity: Identity) {
    let (sink, stream) = socket.split();
    if let Err(e) = gateway.handle_connection(sink, stream, identity).await {
        tracing::info!(error = %e, "Connection not admitted");
    }
}
