mod registry;
mod stats;
mod types;

pub use registry::ConnectionManager;
pub use stats::{ConnectionInfo, ConnectionStats};
pub use types::{ConnectionError, ConnectionHandle};
