//! Periodic cleanup of expired auth state, idle rate-limit buckets and zombie connections.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::auth::{LoginGuard, TokenService};
use crate::config::{ReaperConfig, WebSocketConfig};
use crate::connection_manager::ConnectionManager;
use crate::metrics::{LoginMetrics, ReaperMetrics};
use crate::ratelimit::RateLimiter;
use crate::server::AppState;

const MAINTENANCE: &str = "maintenance";
const CONNECTIONS: &str = "connections";

/// What one maintenance sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub blacklist_entries: usize,
    pub login_windows: usize,
    pub failure_trackers: usize,
    pub rate_limit_buckets: usize,
}

/// Background task running the maintenance and connection sweeps on their own intervals
pub struct Reaper {
    tokens: Arc<TokenService>,
    login_guard: Arc<LoginGuard>,
    rate_limiter: Arc<RateLimiter>,
    connections: Arc<ConnectionManager>,
    config: ReaperConfig,
    stale_threshold: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl Reaper {
    pub fn new(
        tokens: Arc<TokenService>,
        login_guard: Arc<LoginGuard>,
        rate_limiter: Arc<RateLimiter>,
        connections: Arc<ConnectionManager>,
        config: ReaperConfig,
        websocket: &WebSocketConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            tokens,
            login_guard,
            rate_limiter,
            connections,
            config,
            stale_threshold: websocket.stale_threshold(),
            shutdown,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.tokens.clone(),
            state.login_guard.clone(),
            state.rate_limiter.clone(),
            state.connections.clone(),
            state.settings.reaper.clone(),
            &state.settings.websocket,
            state.shutdown_tx.subscribe(),
        )
    }

    pub async fn run(mut self) {
        let mut maintenance_timer =
            tokio::time::interval(Duration::from_secs(self.config.maintenance_interval.max(1)));
        let mut sweep_timer = tokio::time::interval(Duration::from_secs(
            self.config.connection_sweep_interval.max(1),
        ));

        // Skip immediate first tick
        maintenance_timer.tick().await;
        sweep_timer.tick().await;

        tracing::info!(
            maintenance_interval_secs = self.config.maintenance_interval,
            connection_sweep_interval_secs = self.config.connection_sweep_interval,
            stale_threshold_secs = self.stale_threshold.as_secs(),
            "Reaper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Reaper received shutdown signal");
                    break;
                }
                _ = maintenance_timer.tick() => {
                    self.run_maintenance(Utc::now());
                }
                _ = sweep_timer.tick() => {
                    self.run_connection_sweep();
                }
            }
        }

        tracing::info!("Reaper stopped");
    }

    /// Maintenance sweep with panic isolation. `None` if the sweep panicked.
    pub fn run_maintenance(&self, now: DateTime<Utc>) -> Option<MaintenanceReport> {
        isolated(MAINTENANCE, || self.sweep_auth_state(now))
    }

    /// Connection sweep with panic isolation. `None` if the sweep panicked.
    pub fn run_connection_sweep(&self) -> Option<usize> {
        isolated(CONNECTIONS, || self.sweep_connections())
    }

    pub fn sweep_auth_state(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let report = MaintenanceReport {
            blacklist_entries: self.tokens.purge_expired(now),
            login_windows: self.login_guard.purge_stale_attempts(now),
            failure_trackers: self.login_guard.purge_idle_trackers(now),
            rate_limit_buckets: self.rate_limiter.cleanup_stale_at(now.timestamp_millis()),
        };

        ReaperMetrics::record_removed("blacklist", report.blacklist_entries);
        ReaperMetrics::record_removed("login_window", report.login_windows);
        ReaperMetrics::record_removed("failure_tracker", report.failure_trackers);
        ReaperMetrics::record_removed("rate_limit_bucket", report.rate_limit_buckets);
        LoginMetrics::set_blacklist_size(self.tokens.blacklist_len());

        tracing::info!(
            blacklist_entries = report.blacklist_entries,
            login_windows = report.login_windows,
            failure_trackers = report.failure_trackers,
            rate_limit_buckets = report.rate_limit_buckets,
            "Maintenance sweep complete"
        );

        report
    }

    pub fn sweep_connections(&self) -> usize {
        let stale = self.connections.find_stale(self.stale_threshold);
        let removed = stale
            .into_iter()
            .filter(|id| {
                tracing::debug!(connection_id = %id, "Evicting stale connection");
                self.connections.disconnect(*id)
            })
            .count();

        ReaperMetrics::record_removed("connection", removed);

        if removed > 0 {
            tracing::info!(
                removed,
                remaining = self.connections.connection_count(),
                "Connection sweep evicted stale connections"
            );
        } else {
            tracing::debug!("Connection sweep found nothing stale");
        }

        removed
    }
}

/// Run one sweep, catching a panic so the reaper keeps its schedule.
fn isolated<T>(sweep: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    let start = Instant::now();
    let result = std::panic::catch_unwind(AssertUnwindSafe(f));
    ReaperMetrics::record_duration_ms(sweep, start.elapsed().as_millis() as u64);

    match result {
        Ok(value) => Some(value),
        Err(_) => {
            ReaperMetrics::record_sweep_failure(sweep);
            tracing::error!(sweep, "Reaper sweep panicked");
            None
        }
    }
}
