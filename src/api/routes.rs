use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::server::{api_key_auth, AppState};

use super::auth::{login, logout, me, refresh, register};
use super::connections::{disconnect_user, list_connections};
use super::events::publish_event;
use super::health::{health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes(state: AppState) -> Router<AppState> {
    // Service-to-service routes behind the shared API key
    let protected = Router::new()
        .route("/auth/register", post(register))
        .route("/events", post(publish_event))
        .route("/connections", get(list_connections))
        .route("/connections/users/{user_id}", delete(disconnect_user))
        .route_layer(middleware::from_fn_with_state(state, api_key_auth));

    let sessions = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/refresh", post(refresh))
        .route("/auth/me", get(me));

    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest("/api/v1", sessions.merge(protected))
}
