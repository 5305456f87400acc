use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::auth::{CredentialStore, LoginGuard, MemoryCredentialStore, TokenService};
use crate::config::Settings;
use crate::connection_manager::ConnectionManager;
use crate::notification::SubscriptionBroker;
use crate::queries::{DashboardQueries, DisabledQueries};
use crate::ratelimit::RateLimiter;

/// Everything a request handler or background task needs, wired once at startup.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub tokens: Arc<TokenService>,
    pub credentials: Arc<dyn CredentialStore>,
    pub login_guard: Arc<LoginGuard>,
    pub connections: Arc<ConnectionManager>,
    pub broker: Arc<SubscriptionBroker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub queries: Arc<dyn DashboardQueries>,
    /// Observed by every connection loop and the reaper
    pub shutdown_tx: broadcast::Sender<()>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new(
            settings.login.bcrypt_cost,
            settings.login.min_secret_length,
        ));
        Self::with_credentials(settings, credentials)
    }

    /// Build with an external account store.
    pub fn with_credentials(settings: Settings, credentials: Arc<dyn CredentialStore>) -> Self {
        let tokens = Arc::new(TokenService::new(&settings.jwt));
        let login_guard = Arc::new(LoginGuard::new(
            settings.login.clone(),
            credentials.clone(),
            tokens.clone(),
        ));
        let connections = Arc::new(ConnectionManager::new(settings.websocket.max_connections));
        let broker = Arc::new(SubscriptionBroker::new(connections.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(settings.rate_limit.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            settings: Arc::new(settings),
            tokens,
            credentials,
            login_guard,
            connections,
            broker,
            rate_limiter,
            queries: Arc::new(DisabledQueries),
            shutdown_tx,
            start_time: Instant::now(),
        }
    }

    /// Plug in the statistics backend answering the dashboard query ops.
    pub fn with_queries(mut self, queries: Arc<dyn DashboardQueries>) -> Self {
        self.queries = queries;
        self
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
