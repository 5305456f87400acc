use std::net::SocketAddr;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use moderation_realtime::config::Settings;
use moderation_realtime::server::{create_app, AppState};
use moderation_realtime::shutdown::GracefulShutdown;
use moderation_realtime::tasks::{HeartbeatTask, Reaper};
use moderation_realtime::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;
    settings.validate()?;
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    if settings.api.key.is_none() {
        tracing::warn!("No API key configured; service routes are open");
    }

    let state = AppState::new(settings.clone());
    tracing::info!(
        max_connections = settings.websocket.max_connections,
        "Application state initialized"
    );

    let reaper = Reaper::from_state(&state);
    let reaper_handle = tokio::spawn(reaper.run());
    let heartbeat_handle = tokio::spawn(HeartbeatTask::from_state(&state).run());

    let app = create_app(state.clone());

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    let shutdown_state = state.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let reason = shutdown_signal().await;
        GracefulShutdown::new(&shutdown_state).execute(reason).await;
    })
    .await?;

    tracing::info!("Waiting for background tasks to finish...");
    let _ = reaper_handle.await;
    let _ = heartbeat_handle.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM with the reason sent to clients.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    "server_shutdown"
}
