//! API layer - HTTP endpoint handlers organized by concern.

mod auth;
mod connections;
mod events;
mod health;
mod metrics;
mod routes;

pub use auth::{login, logout, me, refresh, register, LoginRequest, TokenResponse};
pub use connections::{disconnect_user, list_connections};
pub use events::publish_event;
pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
