//! In-band control protocol: one handler per client action.
//!
//! Every handler returns the reply frame for the requesting connection.
//! Failures become `error` frames; nothing here closes the socket.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::connection_manager::ConnectionHandle;
use crate::metrics::WsMessageMetrics;
use crate::notification::{BrokerError, EventType};
use crate::queries::{
    clamp_limit, LeaderboardPeriod, QueryError, DEFAULT_ACTIVITY_DAYS, DEFAULT_LEADERBOARD_LIMIT,
    DEFAULT_PEAK_HOURS, DEFAULT_RECENT_ACTIONS, MAX_ACTIVITY_DAYS, MAX_LEADERBOARD_LIMIT,
    MAX_PEAK_HOURS, MAX_RECENT_ACTIONS,
};
use crate::server::AppState;

use super::message::{ClientMessage, ServerMessage};

#[tracing::instrument(
    name = "ws.control",
    skip_all,
    fields(connection_id = %handle.id, action = msg.action())
)]
pub async fn dispatch(
    msg: ClientMessage,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) -> ServerMessage {
    WsMessageMetrics::record_action(msg.action());

    match msg {
        ClientMessage::Subscribe { channel } => handle_subscribe(&channel, state, handle),
        ClientMessage::Unsubscribe { channel } => handle_unsubscribe(&channel, state, handle),
        ClientMessage::Authenticate { token } => handle_authenticate(&token, state, handle),
        ClientMessage::Ping => ServerMessage::pong(),
        ClientMessage::GetLeaderboard { period, limit } => {
            let period = match period.as_deref().map(str::parse::<LeaderboardPeriod>) {
                None => LeaderboardPeriod::default(),
                Some(Ok(period)) => period,
                Some(Err(e)) => return query_error("get_leaderboard", e),
            };
            let limit = clamp_limit(limit, DEFAULT_LEADERBOARD_LIMIT, MAX_LEADERBOARD_LIMIT);

            run_query(
                "get_leaderboard",
                EventType::Leaderboard,
                state.queries.leaderboard(period, limit),
            )
            .await
        }
        ClientMessage::GetPersonalStats { moderator_id } => {
            let Some(moderator_id) = moderator_id.or_else(|| handle.user_id()) else {
                return auth_required("get_personal_stats");
            };

            run_query(
                "get_personal_stats",
                EventType::PersonalStats,
                state.queries.personal_stats(&moderator_id),
            )
            .await
        }
        ClientMessage::GetPeakHours {
            moderator_id,
            top_n,
        } => {
            let top_n = clamp_limit(top_n, DEFAULT_PEAK_HOURS, MAX_PEAK_HOURS);

            run_query(
                "get_peak_hours",
                EventType::PeakHours,
                state.queries.peak_hours(moderator_id.as_deref(), top_n),
            )
            .await
        }
        ClientMessage::GetActivity { days } => {
            let days = clamp_limit(days, DEFAULT_ACTIVITY_DAYS, MAX_ACTIVITY_DAYS);

            run_query(
                "get_activity",
                EventType::Activity,
                state.queries.activity(days),
            )
            .await
        }
        ClientMessage::GetRecentActions {
            moderator_id,
            limit,
        } => {
            let Some(moderator_id) = moderator_id.or_else(|| handle.user_id()) else {
                return auth_required("get_recent_actions");
            };
            let limit = clamp_limit(limit, DEFAULT_RECENT_ACTIONS, MAX_RECENT_ACTIONS);

            run_query(
                "get_recent_actions",
                EventType::RecentActions,
                state.queries.recent_actions(&moderator_id, limit),
            )
            .await
        }
    }
}

fn handle_subscribe(channel: &str, state: &AppState, handle: &Arc<ConnectionHandle>) -> ServerMessage {
    match state.broker.subscribe(handle.id, channel) {
        Ok(added) => {
            tracing::debug!(channel = %channel, added, "Subscribed to channel");
            ServerMessage::subscribed(channel)
        }
        Err(e) => broker_error("subscribe", e),
    }
}

fn handle_unsubscribe(channel: &str, state: &AppState, handle: &Arc<ConnectionHandle>) -> ServerMessage {
    match state.broker.unsubscribe(handle.id, channel) {
        Ok(removed) => {
            tracing::debug!(channel = %channel, removed, "Unsubscribed from channel");
            ServerMessage::unsubscribed(channel)
        }
        Err(e) => broker_error("unsubscribe", e),
    }
}

/// A failed attempt leaves the connection open with its previous identity.
fn handle_authenticate(token: &str, state: &AppState, handle: &Arc<ConnectionHandle>) -> ServerMessage {
    let claims = match state.tokens.validate(token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(error = %e, "In-band authentication rejected");
            return ServerMessage::op_error("authenticate", "AUTH_FAILED", e.to_string());
        }
    };

    match state.connections.authenticate(handle.id, claims.user_id()) {
        Ok(()) => ServerMessage::authenticated(claims.user_id()),
        Err(e) => ServerMessage::op_error("authenticate", "NOT_CONNECTED", e.to_string()),
    }
}

fn broker_error(op: &str, e: BrokerError) -> ServerMessage {
    let code = match e {
        BrokerError::InvalidChannel(_) => "INVALID_CHANNEL",
        BrokerError::InvalidEvent(_) => "INVALID_EVENT",
        BrokerError::Connection(_) => "NOT_CONNECTED",
    };
    ServerMessage::op_error(op, code, e.to_string())
}

fn auth_required(op: &str) -> ServerMessage {
    ServerMessage::op_error(
        op,
        "AUTH_REQUIRED",
        "Authenticate or pass moderator_id explicitly",
    )
}

fn query_error(op: &str, e: QueryError) -> ServerMessage {
    ServerMessage::op_error(op, e.code(), e.to_string())
}

/// Await a query, turning errors and panics into an op-scoped `error` frame.
async fn run_query<F>(op: &str, reply: EventType, query: F) -> ServerMessage
where
    F: Future<Output = Result<serde_json::Value, QueryError>>,
{
    match AssertUnwindSafe(query).catch_unwind().await {
        Ok(Ok(data)) => ServerMessage::new(reply, data),
        Ok(Err(e)) => {
            tracing::warn!(op, error = %e, "Dashboard query failed");
            query_error(op, e)
        }
        Err(_) => {
            tracing::error!(op, "Dashboard query panicked");
            ServerMessage::op_error(op, "QUERY_FAILED", "Internal error while running query")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::queries::DashboardQueries;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct FixedQueries;

    #[async_trait]
    impl DashboardQueries for FixedQueries {
        async fn leaderboard(
            &self,
            period: LeaderboardPeriod,
            limit: u32,
        ) -> Result<serde_json::Value, QueryError> {
            Ok(json!({ "period": period, "limit": limit }))
        }

        async fn personal_stats(&self, moderator_id: &str) -> Result<serde_json::Value, QueryError> {
            Ok(json!({ "moderator_id": moderator_id }))
        }

        async fn peak_hours(
            &self,
            _moderator_id: Option<&str>,
            _top_n: u32,
        ) -> Result<serde_json::Value, QueryError> {
            panic!("peak hour aggregation blew up");
        }

        async fn activity(&self, days: u32) -> Result<serde_json::Value, QueryError> {
            Ok(json!({ "days": days }))
        }

        async fn recent_actions(
            &self,
            _moderator_id: &str,
            _limit: u32,
        ) -> Result<serde_json::Value, QueryError> {
            Err(QueryError::Failed("connection reset".to_string()))
        }
    }

    fn test_state() -> AppState {
        AppState::new(Settings::with_jwt_secret("control-test-secret"))
            .with_queries(Arc::new(FixedQueries))
    }

    fn connect(state: &AppState) -> (Arc<ConnectionHandle>, mpsc::Receiver<crate::websocket::OutboundMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (state.connections.connect(tx, None).unwrap(), rx)
    }

    #[tokio::test]
    async fn test_subscribe_and_invalid_channel() {
        let state = test_state();
        let (handle, _rx) = connect(&state);

        let reply = dispatch(
            ClientMessage::Subscribe { channel: "cases".to_string() },
            &state,
            &handle,
        )
        .await;
        assert_eq!(reply.event_type, EventType::Subscribed);
        assert!(handle.is_subscribed("cases"));

        let reply = dispatch(
            ClientMessage::Subscribe { channel: "bad channel!".to_string() },
            &state,
            &handle,
        )
        .await;
        assert_eq!(reply.event_type, EventType::Error);
        assert_eq!(reply.data["code"], "INVALID_CHANNEL");
        assert_eq!(reply.data["op"], "subscribe");
    }

    #[tokio::test]
    async fn test_authenticate_success_and_failure() {
        let state = test_state();
        let (handle, _rx) = connect(&state);

        let reply = dispatch(
            ClientMessage::Authenticate { token: "garbage".to_string() },
            &state,
            &handle,
        )
        .await;
        assert_eq!(reply.data["code"], "AUTH_FAILED");
        assert!(!handle.is_authenticated());

        let issued = state.tokens.issue("mod-7", vec![]).unwrap();
        let reply = dispatch(
            ClientMessage::Authenticate { token: issued.token },
            &state,
            &handle,
        )
        .await;
        assert_eq!(reply.event_type, EventType::Authenticated);
        assert_eq!(reply.data["user_id"], "mod-7");
        assert_eq!(state.connections.user_connections("mod-7").len(), 1);
    }

    #[tokio::test]
    async fn test_personal_queries_require_identity() {
        let state = test_state();
        let (handle, _rx) = connect(&state);

        let reply = dispatch(
            ClientMessage::GetPersonalStats { moderator_id: None },
            &state,
            &handle,
        )
        .await;
        assert_eq!(reply.data["code"], "AUTH_REQUIRED");
        assert_eq!(reply.data["op"], "get_personal_stats");

        state.connections.authenticate(handle.id, "mod-3").unwrap();
        let reply = dispatch(
            ClientMessage::GetPersonalStats { moderator_id: None },
            &state,
            &handle,
        )
        .await;
        assert_eq!(reply.event_type, EventType::PersonalStats);
        assert_eq!(reply.data["moderator_id"], "mod-3");
    }

    #[tokio::test]
    async fn test_query_parameters_are_clamped() {
        let state = test_state();
        let (handle, _rx) = connect(&state);

        let reply = dispatch(
            ClientMessage::GetLeaderboard { period: Some("week".to_string()), limit: Some(1000) },
            &state,
            &handle,
        )
        .await;
        assert_eq!(reply.data["limit"], 100);
        assert_eq!(reply.data["period"], "week");

        let reply = dispatch(ClientMessage::GetActivity { days: None }, &state, &handle).await;
        assert_eq!(reply.data["days"], 30);

        let reply = dispatch(
            ClientMessage::GetLeaderboard { period: Some("decade".to_string()), limit: None },
            &state,
            &handle,
        )
        .await;
        assert_eq!(reply.data["code"], "INVALID_PARAMETER");
    }

    #[tokio::test]
    async fn test_query_failures_are_scoped_and_not_fatal() {
        let state = test_state();
        let (handle, _rx) = connect(&state);

        let reply = dispatch(
            ClientMessage::GetPeakHours { moderator_id: None, top_n: None },
            &state,
            &handle,
        )
        .await;
        assert_eq!(reply.data["code"], "QUERY_FAILED");
        assert_eq!(reply.data["op"], "get_peak_hours");

        let reply = dispatch(
            ClientMessage::GetRecentActions { moderator_id: Some("42".to_string()), limit: None },
            &state,
            &handle,
        )
        .await;
        assert_eq!(reply.data["code"], "QUERY_FAILED");

        let reply = dispatch(ClientMessage::Ping, &state, &handle).await;
        assert_eq!(reply.event_type, EventType::Pong);
        assert!(state.connections.get_connection(handle.id).is_some());
    }
}
