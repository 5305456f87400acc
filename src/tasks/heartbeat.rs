use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::WebSocketConfig;
use crate::connection_manager::ConnectionManager;
use crate::metrics::HeartbeatMetrics;
use crate::notification::{DeliveryReport, SubscriptionBroker};
use crate::server::AppState;
use crate::websocket::ServerMessage;

/// Broadcasts `heartbeat {connections}` to every live connection on the
/// advertised `heartbeat_interval`. Recipients whose queue is closed or full
/// are dropped by the broker as part of the fan-out.
pub struct HeartbeatTask {
    broker: Arc<SubscriptionBroker>,
    connections: Arc<ConnectionManager>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        broker: Arc<SubscriptionBroker>,
        connections: Arc<ConnectionManager>,
        config: &WebSocketConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            broker,
            connections,
            interval: config.heartbeat_interval(),
            shutdown,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.broker.clone(),
            state.connections.clone(),
            &state.settings.websocket,
            state.shutdown_tx.subscribe(),
        )
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.interval.as_secs(),
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.send_heartbeats();
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// One heartbeat round. Returns `None` when nobody is connected.
    pub fn send_heartbeats(&self) -> Option<DeliveryReport> {
        let count = self.connections.connection_count();
        if count == 0 {
            return None;
        }

        let report = self
            .broker
            .broadcast(None, &ServerMessage::heartbeat(count));
        HeartbeatMetrics::record_broadcast(report.delivered, report.failed);

        if report.failed > 0 {
            tracing::info!(
                delivered = report.delivered,
                dropped = report.failed,
                "Heartbeat dropped dead connections"
            );
        } else {
            tracing::debug!(delivered = report.delivered, "Heartbeat sent");
        }

        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use tokio::sync::mpsc;

    fn test_state() -> AppState {
        AppState::new(Settings::with_jwt_secret("heartbeat-test-secret"))
    }

    #[tokio::test]
    async fn test_heartbeat_reaches_every_connection() {
        let state = test_state();
        let task = HeartbeatTask::from_state(&state);

        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        state.connections.connect(tx_a, None).unwrap();
        state
            .connections
            .connect(tx_b, Some("mod-1".to_string()))
            .unwrap();

        let report = task.send_heartbeats().unwrap();
        assert_eq!(report.delivered, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let json: serde_json::Value =
                serde_json::from_str(&rx.try_recv().unwrap().to_json().unwrap()).unwrap();
            assert_eq!(json["type"], "heartbeat");
            assert_eq!(json["data"]["connections"], 2);
        }
    }

    #[tokio::test]
    async fn test_heartbeat_drops_dead_connections() {
        let state = test_state();
        let task = HeartbeatTask::from_state(&state);

        let (tx_live, _rx_live) = mpsc::channel(4);
        let (tx_dead, rx_dead) = mpsc::channel(4);
        state.connections.connect(tx_live, None).unwrap();
        state.connections.connect(tx_dead, None).unwrap();
        drop(rx_dead);

        let report = task.send_heartbeats().unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(state.connections.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_no_round_without_connections() {
        let state = test_state();
        assert!(HeartbeatTask::from_state(&state).send_heartbeats().is_none());
    }

    #[tokio::test]
    async fn test_run_ticks_on_interval_until_shutdown() {
        let mut settings = Settings::with_jwt_secret("heartbeat-test-secret");
        settings.websocket.heartbeat_interval = 1;
        let state = AppState::new(settings);

        let (tx, mut rx) = mpsc::channel(4);
        state.connections.connect(tx, None).unwrap();

        let task = tokio::spawn(HeartbeatTask::from_state(&state).run());

        let msg = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("no heartbeat within the interval")
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "heartbeat");

        state.shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("heartbeat task did not stop")
            .unwrap();
    }
}
