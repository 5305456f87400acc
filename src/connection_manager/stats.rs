//! Connection statistics and info structures

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Connection statistics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub authenticated_connections: usize,
    pub anonymous_connections: usize,
    pub unique_users: usize,
    pub max_connections: usize,
    pub channels: HashMap<String, usize>,
}

/// Snapshot of one connection for admin listings
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: Uuid,
    pub user_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub subscriptions: Vec<String>,
}
