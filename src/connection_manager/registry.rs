use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::metrics::{CHANNELS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL, USERS_CONNECTED};
use crate::websocket::OutboundMessage;

use super::stats::{ConnectionInfo, ConnectionStats};
use super::types::{ConnectionError, ConnectionHandle};

/// Owns all live connections
pub struct ConnectionManager {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// user_id -> Set<connection_id> (one user, many tabs)
    user_index: DashMap<String, HashSet<Uuid>>,
    /// channel_name -> Set<connection_id>
    channel_index: DashMap<String, HashSet<Uuid>>,
    /// Admitted connections; reserved before insertion so the cap is never exceeded
    active: AtomicUsize,
    max_connections: usize,
}

impl ConnectionManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
            channel_index: DashMap::new(),
            active: AtomicUsize::new(0),
            max_connections,
        }
    }

    /// Admit a connection, or refuse it without changing the count when full.
    pub fn connect(
        &self,
        sender: mpsc::Sender<OutboundMessage>,
        user_id: Option<String>,
    ) -> Result<Arc<ConnectionHandle>, ConnectionError> {
        let max = self.max_connections;
        if let Err(current) = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
        {
            CONNECTIONS_REJECTED_TOTAL.inc();
            tracing::warn!(current, max, "Connection rejected: limit reached");
            return Err(ConnectionError::CapacityExceeded { current, max });
        }

        let handle = Arc::new(ConnectionHandle::new(sender, user_id.clone()));
        let conn_id = handle.id;

        self.connections.insert(conn_id, handle.clone());

        if let Some(ref user_id) = user_id {
            self.user_index
                .entry(user_id.clone())
                .or_default()
                .insert(conn_id);
        }

        self.update_gauges();

        tracing::info!(
            connection_id = %conn_id,
            user_id = user_id.as_deref().unwrap_or("anonymous"),
            "Connection registered"
        );

        Ok(handle)
    }

    /// Remove a connection and close its queue. Returns false if it was already gone.
    pub fn disconnect(&self, connection_id: Uuid) -> bool {
        let Some((_, handle)) = self.connections.remove(&connection_id) else {
            return false;
        };

        self.active.fetch_sub(1, Ordering::AcqRel);
        handle.mark_closed();

        if let Some(user_id) = handle.user_id() {
            self.remove_from_user_index(&user_id, connection_id);
        }

        for channel in handle.subscriptions() {
            self.remove_from_channel_index(&channel, connection_id);
        }

        self.update_gauges();

        tracing::info!(
            connection_id = %connection_id,
            user_id = handle.user_id().as_deref().unwrap_or("anonymous"),
            "Connection unregistered"
        );

        true
    }

    /// Attach or replace the identity of a live connection.
    pub fn authenticate(&self, connection_id: Uuid, user_id: &str) -> Result<(), ConnectionError> {
        let handle = self
            .get_connection(connection_id)
            .ok_or(ConnectionError::NotFound(connection_id))?;

        let previous = handle.set_user_id(user_id.to_string());
        if let Some(ref previous) = previous {
            if previous != user_id {
                self.remove_from_user_index(previous, connection_id);
            }
        }

        self.user_index
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id);

        // Lost a race with disconnect: undo the index entry
        if !self.connections.contains_key(&connection_id) {
            self.remove_from_user_index(user_id, connection_id);
            return Err(ConnectionError::NotFound(connection_id));
        }

        self.update_gauges();

        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            previous_user_id = previous.as_deref().unwrap_or("anonymous"),
            "Connection authenticated"
        );

        Ok(())
    }

    /// Enqueue a message. A full or closed queue disconnects the connection.
    pub fn send_to(&self, connection_id: Uuid, message: OutboundMessage) -> bool {
        let Some(handle) = self.get_connection(connection_id) else {
            return false;
        };

        match handle.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %connection_id, "Outbound queue full, dropping slow client");
                self.disconnect(connection_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %connection_id, "Outbound queue closed");
                self.disconnect(connection_id);
                false
            }
        }
    }

    /// Refresh `last_heartbeat` for a connection.
    pub fn touch(&self, connection_id: Uuid) -> bool {
        match self.connections.get(&connection_id) {
            Some(handle) => {
                handle.touch();
                true
            }
            None => false,
        }
    }

    /// Returns true if the subscription was newly added.
    pub fn subscribe(&self, connection_id: Uuid, channel: &str) -> Result<bool, ConnectionError> {
        let handle = self
            .get_connection(connection_id)
            .ok_or(ConnectionError::NotFound(connection_id))?;

        let added = handle.add_subscription(channel);

        self.channel_index
            .entry(channel.to_string())
            .or_default()
            .insert(connection_id);

        if !self.connections.contains_key(&connection_id) {
            self.remove_from_channel_index(channel, connection_id);
            return Err(ConnectionError::NotFound(connection_id));
        }

        CHANNELS_ACTIVE.set(self.channel_index.len() as i64);

        tracing::debug!(connection_id = %connection_id, channel = %channel, "Subscribed to channel");

        Ok(added)
    }

    /// Returns true if the subscription existed.
    pub fn unsubscribe(&self, connection_id: Uuid, channel: &str) -> Result<bool, ConnectionError> {
        let handle = self
            .get_connection(connection_id)
            .ok_or(ConnectionError::NotFound(connection_id))?;

        let removed = handle.remove_subscription(channel);
        self.remove_from_channel_index(channel, connection_id);

        CHANNELS_ACTIVE.set(self.channel_index.len() as i64);

        tracing::debug!(connection_id = %connection_id, channel = %channel, "Unsubscribed from channel");

        Ok(removed)
    }

    /// Connections subscribed to a channel right now
    pub fn channel_connections(&self, channel: &str) -> Vec<Arc<ConnectionHandle>> {
        let ids: Vec<Uuid> = self
            .channel_index
            .get(channel)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        ids.into_iter()
            .filter_map(|id| self.get_connection(id))
            .collect()
    }

    pub fn channel_counts(&self) -> HashMap<String, usize> {
        self.channel_index
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Get all connections for a user
    pub fn user_connections(&self, user_id: &str) -> Vec<Arc<ConnectionHandle>> {
        let ids: Vec<Uuid> = self
            .user_index
            .get(user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        ids.into_iter()
            .filter_map(|id| self.get_connection(id))
            .collect()
    }

    /// Drop every session of a user. Returns how many were closed.
    pub fn disconnect_user(&self, user_id: &str) -> usize {
        let ids: Vec<Uuid> = self
            .user_index
            .get(user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        let closed = ids.into_iter().filter(|id| self.disconnect(*id)).count();

        if closed > 0 {
            tracing::info!(user_id = %user_id, closed, "Disconnected all user sessions");
        }

        closed
    }

    pub fn get_connection(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn get_all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn connection_info(&self) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .map(|entry| {
                let handle = entry.value();
                ConnectionInfo {
                    connection_id: handle.id,
                    user_id: handle.user_id(),
                    connected_at: handle.connected_at,
                    last_heartbeat: handle.last_heartbeat(),
                    subscriptions: handle.subscriptions(),
                }
            })
            .collect()
    }

    pub fn stats(&self) -> ConnectionStats {
        let total = self.connections.len();
        let authenticated = self
            .connections
            .iter()
            .filter(|entry| entry.value().is_authenticated())
            .count();

        ConnectionStats {
            total_connections: total,
            authenticated_connections: authenticated,
            anonymous_connections: total.saturating_sub(authenticated),
            unique_users: self.user_index.len(),
            max_connections: self.max_connections,
            channels: self.channel_counts(),
        }
    }

    /// Connections silent for longer than `threshold`, or whose writer has gone away
    pub fn find_stale(&self, threshold: Duration) -> Vec<Uuid> {
        self.find_stale_at(Utc::now(), threshold)
    }

    pub fn find_stale_at(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<Uuid> {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);

        self.connections
            .iter()
            .filter(|entry| {
                let handle = entry.value();
                handle.transport_closed()
                    || now.signed_duration_since(handle.last_heartbeat()) > threshold
            })
            .map(|entry| *entry.key())
            .collect()
    }

    /// Disconnect everything (shutdown path). Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let ids: Vec<Uuid> = self.connections.iter().map(|r| *r.key()).collect();
        ids.into_iter().filter(|id| self.disconnect(*id)).count()
    }

    fn remove_from_user_index(&self, user_id: &str, connection_id: Uuid) {
        self.user_index.remove_if_mut(user_id, |_, ids| {
            ids.remove(&connection_id);
            ids.is_empty()
        });
    }

    fn remove_from_channel_index(&self, channel: &str, connection_id: Uuid) {
        self.channel_index.remove_if_mut(channel, |_, ids| {
            ids.remove(&connection_id);
            ids.is_empty()
        });
    }

    fn update_gauges(&self) {
        CONNECTIONS_TOTAL.set(self.connections.len() as i64);
        USERS_CONNECTED.set(self.user_index.len() as i64);
        CHANNELS_ACTIVE.set(self.channel_index.len() as i64);
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(100)
    }
}
