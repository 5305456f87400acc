//! Graceful shutdown.
//!
//! Clients get a `disconnected` event with a reconnect hint, background tasks
//! and connection loops are signalled, open sockets get a bounded window to
//! drain, and whatever is left is force-closed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::connection_manager::ConnectionManager;
use crate::notification::SubscriptionBroker;
use crate::server::AppState;
use crate::websocket::ServerMessage;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for connections to close on their own (default: 10 seconds)
    pub drain_timeout: Duration,
    /// Suggested reconnect delay to send to clients (default: 5 seconds)
    pub reconnect_after_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(10),
            reconnect_after_seconds: 5,
        }
    }
}

pub struct GracefulShutdown {
    connections: Arc<ConnectionManager>,
    broker: Arc<SubscriptionBroker>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(state: &AppState) -> Self {
        Self::with_config(state, ShutdownConfig::default())
    }

    pub fn with_config(state: &AppState, config: ShutdownConfig) -> Self {
        Self {
            connections: state.connections.clone(),
            broker: state.broker.clone(),
            shutdown_tx: state.shutdown_tx.clone(),
            config,
        }
    }

    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.connections.connection_count())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - notifying clients");
        let report = self.broker.broadcast(
            None,
            &ServerMessage::disconnected(reason, Some(self.config.reconnect_after_seconds)),
        );
        result.clients_notified = report.delivered;

        tracing::info!("Signaling background tasks and connection loops to stop");
        let _ = self.shutdown_tx.send(());

        result.connections_closed = self.wait_for_connections_to_close().await;
        result.connections_forced = self.connections.close_all();

        result.duration = start.elapsed();

        tracing::info!(
            clients_notified = result.clients_notified,
            connections_closed = result.connections_closed,
            connections_forced = result.connections_forced,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }

    /// Wait (bounded) for connection loops to unregister themselves
    async fn wait_for_connections_to_close(&self) -> usize {
        let initial = self.connections.connection_count();
        if initial == 0 {
            return 0;
        }

        let wait_future = async {
            while self.connections.connection_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };

        if timeout(self.config.drain_timeout, wait_future).await.is_err() {
            tracing::warn!(
                remaining_connections = self.connections.connection_count(),
                "Some connections did not close gracefully"
            );
        }

        initial.saturating_sub(self.connections.connection_count())
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    pub clients_notified: usize,
    /// Connections that closed on their own inside the drain window
    pub connections_closed: usize,
    /// Connections still open after the drain window
    pub connections_forced: usize,
    pub duration: Duration,
}
