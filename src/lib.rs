// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Session security
pub mod auth;
pub mod ratelimit;

// Real-time delivery
pub mod connection_manager;
pub mod notification;
pub mod queries;
pub mod websocket;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod shutdown;
pub mod tasks;
