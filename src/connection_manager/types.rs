//! Connection handle and related types

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::websocket::OutboundMessage;

/// Handle for a single WebSocket connection
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: Uuid,
    user_id: RwLock<Option<String>>,
    sender: mpsc::Sender<OutboundMessage>,
    pub connected_at: DateTime<Utc>,
    /// Last inbound frame (Unix millis), lock-free so the read loop never contends
    last_heartbeat: AtomicI64,
    subscriptions: DashSet<String>,
    /// Flipped once on disconnect; observed by the socket's read and write tasks
    closed: watch::Sender<bool>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::Sender<OutboundMessage>, user_id: Option<String>) -> Self {
        let now = Utc::now();
        let (closed, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            user_id: RwLock::new(user_id),
            sender,
            connected_at: now,
            last_heartbeat: AtomicI64::new(now.timestamp_millis()),
            subscriptions: DashSet::new(),
            closed,
        }
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Replace the identity, returning the previous one.
    pub(crate) fn set_user_id(&self, user_id: String) -> Option<String> {
        let mut guard = self
            .user_id
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.replace(user_id)
    }

    pub fn touch(&self) {
        self.last_heartbeat
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_heartbeat.load(Ordering::Relaxed))
            .unwrap_or_else(Utc::now)
    }

    /// Non-blocking enqueue onto the bounded outbound queue.
    pub fn try_send(
        &self,
        message: OutboundMessage,
    ) -> Result<(), mpsc::error::TrySendError<OutboundMessage>> {
        if self.is_closed() {
            return Err(mpsc::error::TrySendError::Closed(message));
        }
        self.sender.try_send(message)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.subscriptions.iter().map(|c| c.clone()).collect();
        channels.sort();
        channels
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.contains(channel)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub(crate) fn add_subscription(&self, channel: &str) -> bool {
        self.subscriptions.insert(channel.to_string())
    }

    pub(crate) fn remove_subscription(&self, channel: &str) -> bool {
        self.subscriptions.remove(channel).is_some()
    }

    /// Receiver that resolves once the registry drops this connection
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// The writer task is gone, so nothing queued will ever reach the socket
    pub fn transport_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.send_replace(true);
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("Connection limit reached ({current}/{max})")]
    CapacityExceeded { current: usize, max: usize },
    #[error("Connection {0} not found")]
    NotFound(Uuid),
}
