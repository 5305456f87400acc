use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::connection_manager::{ConnectionError, ConnectionManager};
use crate::metrics::MessageMetrics;
use crate::websocket::{OutboundMessage, ServerMessage};

use super::events::{is_valid_channel_name, DomainEvent, EventType};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Connections resolved as recipients at call time
    pub recipients: usize,
    pub delivered: usize,
    /// Recipients dropped because their queue was full or closed
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct BrokerStats {
    pub total_messages: AtomicU64,
    pub total_delivered: AtomicU64,
    pub total_failed: AtomicU64,
    pub channel_broadcasts: AtomicU64,
    pub global_broadcasts: AtomicU64,
    pub user_messages: AtomicU64,
}

impl BrokerStats {
    pub fn snapshot(&self) -> BrokerStatsSnapshot {
        BrokerStatsSnapshot {
            total_messages: self.total_messages.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            channel_broadcasts: self.channel_broadcasts.load(Ordering::Relaxed),
            global_broadcasts: self.global_broadcasts.load(Ordering::Relaxed),
            user_messages: self.user_messages.load(Ordering::Relaxed),
        }
    }

    fn record(&self, delivered: usize, failed: usize) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        self.total_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.total_failed.fetch_add(failed as u64, Ordering::Relaxed);
        MessageMetrics::record_delivered(delivered as u64);
        MessageMetrics::record_failed(failed as u64);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerStatsSnapshot {
    pub total_messages: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub channel_broadcasts: u64,
    pub global_broadcasts: u64,
    pub user_messages: u64,
}

/// Resolves channel subscribers and fans messages out through the registry.
///
/// Enqueueing never waits on a client: a stalled recipient is disconnected by
/// the registry and counted as failed.
pub struct SubscriptionBroker {
    connections: Arc<ConnectionManager>,
    stats: BrokerStats,
}

impl SubscriptionBroker {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            connections,
            stats: BrokerStats::default(),
        }
    }

    pub fn stats(&self) -> BrokerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Idempotent. Returns true if the subscription is new.
    pub fn subscribe(&self, connection_id: Uuid, channel: &str) -> Result<bool, BrokerError> {
        if !is_valid_channel_name(channel) {
            return Err(BrokerError::InvalidChannel(channel.to_string()));
        }
        Ok(self.connections.subscribe(connection_id, channel)?)
    }

    /// Idempotent. Returns true if the subscription existed.
    pub fn unsubscribe(&self, connection_id: Uuid, channel: &str) -> Result<bool, BrokerError> {
        Ok(self.connections.unsubscribe(connection_id, channel)?)
    }

    /// Deliver to the subscribers of `channel` at call time, or to every connection if `None`.
    #[tracing::instrument(
        name = "broker.broadcast",
        skip(self, message),
        fields(event_type = %message.event_type)
    )]
    pub fn broadcast(&self, channel: Option<&str>, message: &ServerMessage) -> DeliveryReport {
        let recipients = match channel {
            Some(channel) => self.connections.channel_connections(channel),
            None => self.connections.get_all_connections(),
        };

        let outbound = Self::serialize_once(message);

        let mut delivered = 0;
        let mut failed = 0;
        for handle in &recipients {
            if self.connections.send_to(handle.id, outbound.clone()) {
                delivered += 1;
            } else {
                failed += 1;
            }
        }

        match channel {
            Some(_) => {
                self.stats.channel_broadcasts.fetch_add(1, Ordering::Relaxed);
                MessageMetrics::record_channel_sent(recipients.len());
            }
            None => {
                self.stats.global_broadcasts.fetch_add(1, Ordering::Relaxed);
                MessageMetrics::record_broadcast_sent(recipients.len());
            }
        }
        self.stats.record(delivered, failed);

        tracing::debug!(
            channel = channel.unwrap_or("*"),
            recipients = recipients.len(),
            delivered,
            failed,
            "Broadcast complete"
        );

        DeliveryReport {
            event_type: message.event_type,
            channel: channel.map(str::to_string),
            recipients: recipients.len(),
            delivered,
            failed,
        }
    }

    /// Deliver to every connection of one user.
    pub fn send_to_user(&self, user_id: &str, message: &ServerMessage) -> DeliveryReport {
        let recipients = self.connections.user_connections(user_id);
        let outbound = Self::serialize_once(message);

        let mut delivered = 0;
        let mut failed = 0;
        for handle in &recipients {
            if self.connections.send_to(handle.id, outbound.clone()) {
                delivered += 1;
            } else {
                failed += 1;
            }
        }

        self.stats.user_messages.fetch_add(1, Ordering::Relaxed);
        self.stats.record(delivered, failed);
        MessageMetrics::record_user_sent();

        DeliveryReport {
            event_type: message.event_type,
            channel: None,
            recipients: recipients.len(),
            delivered,
            failed,
        }
    }

    /// Reply on a single connection; a failed enqueue disconnects it.
    pub fn send_to_connection(&self, connection_id: Uuid, message: ServerMessage) -> bool {
        MessageMetrics::record_connection_sent();
        self.connections
            .send_to(connection_id, OutboundMessage::Raw(message))
    }

    /// Typed entry point for domain events raised elsewhere in the dashboard.
    pub fn publish(&self, event: &DomainEvent) -> Result<DeliveryReport, BrokerError> {
        event.validate().map_err(BrokerError::InvalidEvent)?;

        let report = self.broadcast(event.target_channel(), &event.to_message());

        tracing::info!(
            event_type = %event.event_type,
            channel = event.target_channel().unwrap_or("*"),
            delivered = report.delivered,
            "Domain event published"
        );

        Ok(report)
    }

    pub fn channel_counts(&self) -> std::collections::HashMap<String, usize> {
        self.connections.channel_counts()
    }

    fn serialize_once(message: &ServerMessage) -> OutboundMessage {
        match OutboundMessage::preserialize(message) {
            Ok(outbound) => outbound,
            Err(e) => {
                tracing::error!(error = %e, "Failed to pre-serialize message");
                OutboundMessage::Raw(message.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::channels;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn setup() -> (Arc<ConnectionManager>, SubscriptionBroker) {
        let manager = Arc::new(ConnectionManager::new(10));
        let broker = SubscriptionBroker::new(manager.clone());
        (manager, broker)
    }

    fn drain(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(serde_json::from_str(&msg.to_json().unwrap()).unwrap());
        }
        out
    }

    #[test]
    fn test_channel_scoped_delivery() {
        let (manager, broker) = setup();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        let a = manager.connect(tx_a, None).unwrap();
        manager.connect(tx_b, None).unwrap();
        broker.subscribe(a.id, channels::CASES).unwrap();

        let report = broker.broadcast(
            Some(channels::CASES),
            &ServerMessage::new(EventType::CaseCreated, json!({"case_id": 1})),
        );

        assert_eq!(report.recipients, 1);
        assert_eq!(report.delivered, 1);

        let received = drain(&mut rx_a);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["type"], "case_created");
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_unscoped_broadcast_reaches_everyone() {
        let (manager, broker) = setup();
        let (tx, mut rx) = mpsc::channel(8);

        manager.connect(tx.clone(), None).unwrap();
        manager.connect(tx, None).unwrap();

        let report = broker.broadcast(None, &ServerMessage::heartbeat(2));
        assert_eq!(report.delivered, 2);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_idempotent_subscribe_delivers_once() {
        let (manager, broker) = setup();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = manager.connect(tx, None).unwrap();

        assert!(broker.subscribe(handle.id, "tickets").unwrap());
        assert!(!broker.subscribe(handle.id, "tickets").unwrap());

        broker.publish(&DomainEvent::ticket_claimed(json!({}))).unwrap();
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_failed_recipient_is_isolated() {
        let (manager, broker) = setup();
        let (tx_ok, mut rx_ok) = mpsc::channel(8);
        let (tx_dead, rx_dead) = mpsc::channel(8);

        let ok = manager.connect(tx_ok, None).unwrap();
        let dead = manager.connect(tx_dead, None).unwrap();
        broker.subscribe(ok.id, "stats").unwrap();
        broker.subscribe(dead.id, "stats").unwrap();
        drop(rx_dead);

        let report = broker
            .publish(&DomainEvent::stats_updated(json!(null)))
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(drain(&mut rx_ok)[0]["type"], "stats.updated");
        assert!(manager.get_connection(dead.id).is_none());
    }

    #[test]
    fn test_invalid_channel_rejected() {
        let (manager, broker) = setup();
        let (tx, _rx) = mpsc::channel(8);
        let handle = manager.connect(tx, None).unwrap();

        assert!(matches!(
            broker.subscribe(handle.id, "no spaces allowed"),
            Err(BrokerError::InvalidChannel(_))
        ));
        assert!(matches!(
            broker.subscribe(Uuid::new_v4(), "cases"),
            Err(BrokerError::Connection(ConnectionError::NotFound(_)))
        ));
    }

    #[test]
    fn test_send_to_user() {
        let (manager, broker) = setup();
        let (tx, mut rx) = mpsc::channel(8);

        manager.connect(tx.clone(), Some("mod-1".to_string())).unwrap();
        manager.connect(tx.clone(), Some("mod-1".to_string())).unwrap();
        manager.connect(tx, Some("mod-2".to_string())).unwrap();

        let report = broker.send_to_user("mod-1", &ServerMessage::pong());
        assert_eq!(report.delivered, 2);
        assert_eq!(drain(&mut rx).len(), 2);

        let stats = broker.stats();
        assert_eq!(stats.user_messages, 1);
        assert_eq!(stats.total_delivered, 2);
    }

    #[test]
    fn test_send_to_connection_targets_one_connection() {
        let (manager, broker) = setup();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let a = manager.connect(tx_a, Some("mod-1".to_string())).unwrap();
        manager.connect(tx_b, Some("mod-1".to_string())).unwrap();

        assert!(broker.send_to_connection(a.id, ServerMessage::pong()));
        assert_eq!(drain(&mut rx_a)[0]["type"], "pong");
        assert!(drain(&mut rx_b).is_empty());

        assert!(!broker.send_to_connection(Uuid::new_v4(), ServerMessage::pong()));
    }

    #[test]
    fn test_publish_rejects_protocol_events() {
        let (_, broker) = setup();
        let result = broker.publish(&DomainEvent::new(EventType::Heartbeat, json!({})));
        assert!(matches!(result, Err(BrokerError::InvalidEvent(_))));
    }
}
