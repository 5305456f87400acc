//! Connection administration endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::connection_manager::ConnectionInfo;
use crate::server::AppState;
use crate::websocket::ServerMessage;

#[derive(Debug, Serialize)]
pub struct ConnectionListResponse {
    pub connections: Vec<ConnectionInfo>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DisconnectUserResponse {
    pub user_id: String,
    pub disconnected: usize,
}

/// GET /api/v1/connections
pub async fn list_connections(State(state): State<AppState>) -> Json<ConnectionListResponse> {
    let connections = state.connections.connection_info();
    let total = connections.len();

    Json(ConnectionListResponse { connections, total })
}

/// DELETE /api/v1/connections/users/{user_id} - end every session of one user
pub async fn disconnect_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<DisconnectUserResponse> {
    // Queued ahead of the close; the writer flushes it before the close frame
    state
        .broker
        .send_to_user(&user_id, &ServerMessage::disconnected("session_terminated", None));

    let disconnected = state.connections.disconnect_user(&user_id);

    tracing::info!(user_id = %user_id, disconnected, "User sessions terminated");

    Json(DisconnectUserResponse {
        user_id,
        disconnected,
    })
}
