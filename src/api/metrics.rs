//! Prometheus metrics endpoint.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::metrics::{self, LoginMetrics};
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    update_metrics_from_state(&state);

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Refresh gauges that are derived from state rather than updated inline
fn update_metrics_from_state(state: &AppState) {
    let conn_stats = state.connections.stats();
    metrics::CONNECTIONS_TOTAL.set(conn_stats.total_connections as i64);
    metrics::USERS_CONNECTED.set(conn_stats.unique_users as i64);
    metrics::CHANNELS_ACTIVE.set(conn_stats.channels.len() as i64);

    metrics::CHANNEL_SUBSCRIPTIONS.reset();
    for (channel, count) in &conn_stats.channels {
        metrics::CHANNEL_SUBSCRIPTIONS
            .with_label_values(&[channel])
            .set(*count as i64);
    }

    LoginMetrics::set_blacklist_size(state.tokens.blacklist_len());
}
