mod control;
mod handler;
mod heartbeat;
mod message;

pub use control::dispatch;
pub use handler::{serve_connection, ws_handler, WsQuery};
pub use heartbeat::{HeartbeatMonitor, HeartbeatState};
pub use message::{ClientMessage, OutboundMessage, ServerMessage};
