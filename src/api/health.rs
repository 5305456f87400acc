//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::connection_manager::ConnectionStats;
use crate::notification::BrokerStatsSnapshot;
use crate::ratelimit::RateLimiterStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: ConnectionHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub total: usize,
    pub max: usize,
    pub unique_users: usize,
    pub channels_count: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub connections: ConnectionStats,
    pub messages: BrokerStatsSnapshot,
    pub rate_limiter: RateLimiterStats,
    pub auth: AuthStats,
}

#[derive(Debug, Serialize)]
pub struct AuthStats {
    pub blacklisted_tokens: usize,
    pub tracked_login_windows: usize,
    pub tracked_failure_trackers: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let conn_stats = state.connections.stats();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        connections: ConnectionHealthResponse {
            total: conn_stats.total_connections,
            max: conn_stats.max_connections,
            unique_users: conn_stats.unique_users,
            channels_count: conn_stats.channels.len(),
        },
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let (windows, trackers) = state.login_guard.tracked_accounts();

    Json(StatsResponse {
        uptime_seconds: state.uptime_seconds(),
        connections: state.connections.stats(),
        messages: state.broker.stats(),
        rate_limiter: state.rate_limiter.stats(),
        auth: AuthStats {
            blacklisted_tokens: state.tokens.blacklist_len(),
            tracked_login_windows: windows,
            tracked_failure_trackers: trackers,
        },
    })
}
