//! Prometheus metrics for the real-time gateway.
//!
//! - Connection metrics (active connections, users, channel subscriptions)
//! - Message metrics (sent, delivered, failed by target type)
//! - WebSocket metrics (frames received, heartbeats, connection duration)
//! - Session security metrics (login outcomes, tokens, rate limiting)
//! - Reaper metrics (removals per resource, failed sweeps)

mod helpers;

pub use helpers::{
    encode_metrics, HeartbeatMetrics, LoginMetrics, MessageMetrics, RateLimitMetrics,
    ReaperMetrics, WsMessageMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Histogram, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "modrt";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Total number of active WebSocket connections
    pub static ref CONNECTIONS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_connections_total", METRIC_PREFIX),
        "Total number of active WebSocket connections"
    ).unwrap();

    /// Number of unique authenticated users
    pub static ref USERS_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_users_connected", METRIC_PREFIX),
        "Number of unique authenticated users"
    ).unwrap();

    /// Connections refused because the registry was full
    pub static ref CONNECTIONS_REJECTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_rejected_total", METRIC_PREFIX),
        "Total connections rejected at capacity"
    ).unwrap();

    /// Number of subscriptions per channel
    pub static ref CHANNEL_SUBSCRIPTIONS: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_channel_subscriptions", METRIC_PREFIX),
        "Number of subscriptions per channel",
        &["channel"]
    ).unwrap();

    /// Total channels with subscribers
    pub static ref CHANNELS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_channels_active", METRIC_PREFIX),
        "Total number of channels with at least one subscriber"
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Total messages sent by target type
    pub static ref MESSAGES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_sent_total", METRIC_PREFIX),
        "Total messages sent",
        &["target"]
    ).unwrap();

    /// Total messages delivered (connection count)
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total messages successfully enqueued to connections"
    ).unwrap();

    /// Total message delivery failures
    pub static ref MESSAGES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Total message delivery failures"
    ).unwrap();

    /// Recipients per broadcast
    pub static ref BROADCAST_FANOUT: Histogram = register_histogram!(
        format!("{}_broadcast_fanout", METRIC_PREFIX),
        "Number of recipients per broadcast",
        vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0]
    ).unwrap();

    // ============================================================================
    // WebSocket Metrics
    // ============================================================================

    /// WebSocket connections opened
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// WebSocket connections closed
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// WebSocket control frames received from clients
    pub static ref WS_MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_received_total", METRIC_PREFIX),
        "Total WebSocket messages received from clients",
        &["type"]
    ).unwrap();

    /// WebSocket connection duration
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    /// Heartbeats enqueued after an idle receive window
    pub static ref HEARTBEATS_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeats_sent_total", METRIC_PREFIX),
        "Total heartbeat events enqueued, idle-window and periodic"
    ).unwrap();

    /// Connections declared dead by the heartbeat monitor
    pub static ref HEARTBEAT_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_failures_total", METRIC_PREFIX),
        "Total connections dropped after a failed heartbeat"
    ).unwrap();

    // ============================================================================
    // Session Security Metrics
    // ============================================================================

    /// Login attempts by outcome
    pub static ref LOGIN_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_login_attempts_total", METRIC_PREFIX),
        "Total login attempts by outcome",
        &["outcome"]
    ).unwrap();

    /// Accounts locked after consecutive failures
    pub static ref ACCOUNTS_LOCKED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_accounts_locked_total", METRIC_PREFIX),
        "Total account lockouts"
    ).unwrap();

    /// Revoked tokens still held in the blacklist
    pub static ref TOKEN_BLACKLIST_SIZE: IntGauge = register_int_gauge!(
        format!("{}_token_blacklist_size", METRIC_PREFIX),
        "Number of revoked tokens awaiting expiry"
    ).unwrap();

    /// Requests allowed by rate limiter
    pub static ref RATELIMIT_ALLOWED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ratelimit_allowed_total", METRIC_PREFIX),
        "Total requests allowed by rate limiter",
        &["type"]
    ).unwrap();

    /// Requests denied by rate limiter
    pub static ref RATELIMIT_DENIED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ratelimit_denied_total", METRIC_PREFIX),
        "Total requests denied by rate limiter",
        &["type"]
    ).unwrap();

    // ============================================================================
    // Reaper Metrics
    // ============================================================================

    /// Entries removed by the reaper, per resource
    pub static ref REAPER_REMOVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_reaper_removed_total", METRIC_PREFIX),
        "Total entries removed by the reaper",
        &["resource"]
    ).unwrap();

    /// Sweeps that panicked and were isolated
    pub static ref REAPER_SWEEP_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_reaper_sweep_failures_total", METRIC_PREFIX),
        "Total reaper sweeps that failed",
        &["sweep"]
    ).unwrap();

    /// Sweep duration in milliseconds
    pub static ref REAPER_SWEEP_DURATION_MS: HistogramVec = register_histogram_vec!(
        format!("{}_reaper_sweep_duration_ms", METRIC_PREFIX),
        "Reaper sweep duration in milliseconds",
        &["sweep"],
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]
    ).unwrap();
}
