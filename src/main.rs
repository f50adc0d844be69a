use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use chat_gateway::config::Settings;
use chat_gateway::events::RedisEventSubscriber;
use chat_gateway::gateway::Gateway;
use chat_gateway::intents::{DiscardIntentForwarder, IntentForwarder, RedisIntentForwarder};
use chat_gateway::server::{create_app, AppState};
use chat_gateway::tasks::HeartbeatTask;
use chat_gateway::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    let forwarder: Arc<dyn IntentForwarder> = if settings.redis.enabled {
        Arc::new(RedisIntentForwarder::connect(&settings.redis).await?)
    } else {
        tracing::info!("Redis disabled, client intents will be discarded");
        Arc::new(DiscardIntentForwarder)
    };

    let state = AppState::new(settings.clone(), forwarder);
    tracing::info!("Application state initialized");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut background = Vec::new();

    if settings.redis.enabled {
        let subscriber = RedisEventSubscriber::new(
            settings.redis.clone(),
            state.publisher.clone(),
            shutdown_tx.clone(),
        );
        background.push(tokio::spawn(async move {
            if let Err(e) = subscriber.run().await {
                tracing::error!(error = %e, "Redis event subscriber failed");
            }
        }));
    }

    let heartbeat_task = HeartbeatTask::new(
        settings.gateway.heartbeat_interval(),
        state.gateway.hub().clone(),
        shutdown_tx.subscribe(),
    );
    background.push(tokio::spawn(heartbeat_task.run()));

    let gateway = state.gateway.clone();
    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_sequence(gateway, shutdown_tx))
        .await?;

    tracing::info!("Waiting for background tasks to finish...");
    futures::future::join_all(background).await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves once the process may stop serving HTTP: the signal arrived,
/// the drain finished, and background tasks were told to stop.
async fn shutdown_sequence(gateway: Arc<Gateway>, shutdown_tx: broadcast::Sender<()>) {
    wait_for_signal().await;

    let result = gateway.drain("server shutting down").await;
    tracing::info!(
        forced = result.connections_forced,
        timed_out = result.timed_out,
        "Drain finished, stopping background tasks"
    );

    let _ = shutdown_tx.send(());
}

async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting drain");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, starting drain");
        }
    }
}
