//! Per-connection liveness.
//!
//! The read loop waits for inbound frames with a timeout. Each timeout sends a
//! `heartbeat` event and moves the monitor to `AwaitingPong`; any inbound frame
//! moves it back to `Alive`. Only a failed heartbeat send is terminal. Silent but
//! writable clients are left to the reaper's stale sweep.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Alive,
    AwaitingPong,
    Dead,
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    state: HeartbeatState,
    receive_timeout: Duration,
    /// Consecutive timeouts without an inbound frame
    missed: u32,
}

impl HeartbeatMonitor {
    pub fn new(receive_timeout: Duration) -> Self {
        Self {
            state: HeartbeatState::Alive,
            receive_timeout,
            missed: 0,
        }
    }

    pub fn state(&self) -> HeartbeatState {
        self.state
    }

    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }

    pub fn is_dead(&self) -> bool {
        self.state == HeartbeatState::Dead
    }

    /// Any inbound frame (text, ping, pong).
    pub fn on_frame(&mut self) -> HeartbeatState {
        if self.state != HeartbeatState::Dead {
            self.state = HeartbeatState::Alive;
            self.missed = 0;
        }
        self.state
    }

    /// The receive window elapsed; `heartbeat_sent` says whether the heartbeat was enqueued.
    pub fn on_timeout(&mut self, heartbeat_sent: bool) -> HeartbeatState {
        if self.state == HeartbeatState::Dead {
            return self.state;
        }

        self.missed += 1;
        self.state = if heartbeat_sent {
            HeartbeatState::AwaitingPong
        } else {
            HeartbeatState::Dead
        };
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_then_frame_returns_alive() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(15));
        assert_eq!(monitor.state(), HeartbeatState::Alive);

        assert_eq!(monitor.on_timeout(true), HeartbeatState::AwaitingPong);
        assert_eq!(monitor.on_timeout(true), HeartbeatState::AwaitingPong);
        assert_eq!(monitor.missed(), 2);

        assert_eq!(monitor.on_frame(), HeartbeatState::Alive);
        assert_eq!(monitor.missed(), 0);
    }

    #[test]
    fn test_failed_heartbeat_is_terminal() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(15));

        assert_eq!(monitor.on_timeout(false), HeartbeatState::Dead);
        assert!(monitor.is_dead());
        assert_eq!(monitor.on_frame(), HeartbeatState::Dead);
        assert_eq!(monitor.on_timeout(true), HeartbeatState::Dead);
    }
}
