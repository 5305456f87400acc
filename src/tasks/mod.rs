mod heartbeat;
mod reaper;

pub use heartbeat::HeartbeatTask;
pub use reaper::{MaintenanceReport, Reaper};
