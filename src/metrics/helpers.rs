//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    ACCOUNTS_LOCKED_TOTAL, BROADCAST_FANOUT, HEARTBEATS_SENT_TOTAL, HEARTBEAT_FAILURES_TOTAL,
    LOGIN_ATTEMPTS_TOTAL, MESSAGES_DELIVERED_TOTAL, MESSAGES_FAILED_TOTAL, MESSAGES_SENT_TOTAL,
    RATELIMIT_ALLOWED_TOTAL, RATELIMIT_DENIED_TOTAL, REAPER_REMOVED_TOTAL,
    REAPER_SWEEP_DURATION_MS, REAPER_SWEEP_FAILURES_TOTAL, TOKEN_BLACKLIST_SIZE,
    WS_MESSAGES_RECEIVED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording message metrics
pub struct MessageMetrics;

impl MessageMetrics {
    /// Record a message sent to one connection
    pub fn record_connection_sent() {
        MESSAGES_SENT_TOTAL.with_label_values(&["connection"]).inc();
    }

    /// Record a message sent to every connection of a user
    pub fn record_user_sent() {
        MESSAGES_SENT_TOTAL.with_label_values(&["user"]).inc();
    }

    /// Record an unscoped broadcast
    pub fn record_broadcast_sent(recipients: usize) {
        MESSAGES_SENT_TOTAL.with_label_values(&["broadcast"]).inc();
        BROADCAST_FANOUT.observe(recipients as f64);
    }

    /// Record a channel broadcast
    pub fn record_channel_sent(recipients: usize) {
        MESSAGES_SENT_TOTAL.with_label_values(&["channel"]).inc();
        BROADCAST_FANOUT.observe(recipients as f64);
    }

    pub fn record_delivered(count: u64) {
        MESSAGES_DELIVERED_TOTAL.inc_by(count);
    }

    pub fn record_failed(count: u64) {
        MESSAGES_FAILED_TOTAL.inc_by(count);
    }
}

/// Helper struct for recording rate limit metrics
pub struct RateLimitMetrics;

impl RateLimitMetrics {
    pub fn record_http_allowed() {
        RATELIMIT_ALLOWED_TOTAL.with_label_values(&["http"]).inc();
    }

    pub fn record_http_denied() {
        RATELIMIT_DENIED_TOTAL.with_label_values(&["http"]).inc();
    }

    /// Record a login refused by the per-account attempt window
    pub fn record_login_denied() {
        RATELIMIT_DENIED_TOTAL.with_label_values(&["login"]).inc();
    }
}

/// Helper struct for login outcome metrics
pub struct LoginMetrics;

impl LoginMetrics {
    pub fn record_success() {
        LOGIN_ATTEMPTS_TOTAL.with_label_values(&["success"]).inc();
    }

    pub fn record_failure() {
        LOGIN_ATTEMPTS_TOTAL.with_label_values(&["failure"]).inc();
    }

    /// Record an attempt refused because the account is locked
    pub fn record_locked() {
        LOGIN_ATTEMPTS_TOTAL.with_label_values(&["locked"]).inc();
    }

    /// Record a new lockout
    pub fn record_lockout() {
        ACCOUNTS_LOCKED_TOTAL.inc();
    }

    pub fn set_blacklist_size(size: usize) {
        TOKEN_BLACKLIST_SIZE.set(size as i64);
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_sent() {
        HEARTBEATS_SENT_TOTAL.inc();
    }

    pub fn record_broadcast(delivered: usize, failed: usize) {
        HEARTBEATS_SENT_TOTAL.inc_by(delivered as u64);
        HEARTBEAT_FAILURES_TOTAL.inc_by(failed as u64);
    }

    pub fn record_failure() {
        HEARTBEAT_FAILURES_TOTAL.inc();
    }
}

/// Helper struct for recording WebSocket control frames
pub struct WsMessageMetrics;

impl WsMessageMetrics {
    /// Record a control frame by action name
    pub fn record_action(action: &str) {
        WS_MESSAGES_RECEIVED.with_label_values(&[action]).inc();
    }

    pub fn record_invalid() {
        WS_MESSAGES_RECEIVED.with_label_values(&["invalid"]).inc();
    }
}

/// Helper struct for reaper metrics
pub struct ReaperMetrics;

impl ReaperMetrics {
    /// Record entries removed from one resource
    pub fn record_removed(resource: &str, count: usize) {
        if count > 0 {
            REAPER_REMOVED_TOTAL
                .with_label_values(&[resource])
                .inc_by(count as u64);
        }
    }

    pub fn record_sweep_failure(sweep: &str) {
        REAPER_SWEEP_FAILURES_TOTAL.with_label_values(&[sweep]).inc();
    }

    pub fn record_duration_ms(sweep: &str, duration_ms: u64) {
        REAPER_SWEEP_DURATION_MS
            .with_label_values(&[sweep])
            .observe(duration_ms as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_metrics() {
        MessageMetrics::record_connection_sent();
        MessageMetrics::record_user_sent();
        MessageMetrics::record_broadcast_sent(3);
        MessageMetrics::record_channel_sent(2);
        MessageMetrics::record_delivered(5);
        MessageMetrics::record_failed(1);
    }

    #[test]
    fn test_login_metrics() {
        LoginMetrics::record_success();
        LoginMetrics::record_failure();
        LoginMetrics::record_locked();
        LoginMetrics::record_lockout();
        LoginMetrics::set_blacklist_size(4);
        RateLimitMetrics::record_login_denied();
    }

    #[test]
    fn test_ws_message_metrics() {
        WsMessageMetrics::record_action("subscribe");
        WsMessageMetrics::record_action("ping");
        WsMessageMetrics::record_invalid();
        HeartbeatMetrics::record_sent();
        HeartbeatMetrics::record_failure();
    }

    #[test]
    fn test_reaper_removed_skips_zero() {
        ReaperMetrics::record_removed("buckets", 0);
        ReaperMetrics::record_removed("buckets", 2);
        ReaperMetrics::record_sweep_failure("maintenance");
        ReaperMetrics::record_duration_ms("maintenance", 12);
    }
}
