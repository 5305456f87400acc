//! Brute-force protection for the login endpoint.
//!
//! Checks run in a fixed order: account lockout, then the per-account attempt
//! window, then credential verification. A locked account therefore always
//! reports `Locked`, never `RateLimited`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

use crate::config::LoginConfig;
use crate::metrics::{LoginMetrics, RateLimitMetrics};

use super::credentials::{CredentialError, CredentialStore};
use super::token::{IssuedToken, TokenError, TokenService};

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Account locked until {locked_until}")]
    Locked { locked_until: DateTime<Utc> },
    #[error("Too many login attempts, retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Store(#[from] CredentialError),
}

/// Attempts counted inside the current window for one account
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoginAttemptWindow {
    pub window_start: DateTime<Utc>,
    pub attempt_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FailedLoginTracker {
    pub consecutive_failures: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl FailedLoginTracker {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if now < until)
    }
}

pub struct LoginGuard {
    config: LoginConfig,
    attempts: DashMap<String, LoginAttemptWindow>,
    failures: DashMap<String, FailedLoginTracker>,
    credentials: Arc<dyn CredentialStore>,
    tokens: Arc<TokenService>,
}

impl LoginGuard {
    pub fn new(
        config: LoginConfig,
        credentials: Arc<dyn CredentialStore>,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            config,
            attempts: DashMap::new(),
            failures: DashMap::new(),
            credentials,
            tokens,
        }
    }

    pub async fn login(&self, account_id: &str, secret: &str) -> Result<IssuedToken, LoginError> {
        self.login_at(account_id, secret, Utc::now()).await
    }

    /// Same as [`login`](Self::login) with an explicit clock.
    #[tracing::instrument(skip_all, fields(account_id = %account_id))]
    pub async fn login_at(
        &self,
        account_id: &str,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, LoginError> {
        self.check_lockout(account_id, now)?;
        self.record_attempt(account_id, now)?;

        match self.credentials.verify(account_id, secret).await? {
            Some(record) => {
                self.attempts.remove(account_id);
                self.failures.remove(account_id);

                let issued = self.tokens.issue(&record.account_id, record.permissions)?;

                LoginMetrics::record_success();
                tracing::info!("Login succeeded");

                Ok(issued)
            }
            None => {
                self.record_failure(account_id, now);
                LoginMetrics::record_failure();
                Err(LoginError::InvalidCredentials)
            }
        }
    }

    fn check_lockout(&self, account_id: &str, now: DateTime<Utc>) -> Result<(), LoginError> {
        if let Some(mut tracker) = self.failures.get_mut(account_id) {
            if let Some(locked_until) = tracker.locked_until {
                if now < locked_until {
                    LoginMetrics::record_locked();
                    return Err(LoginError::Locked { locked_until });
                }

                // Lock elapsed: start over with a clean count
                tracker.locked_until = None;
                tracker.consecutive_failures = 0;
                tracing::info!("Account lock expired");
            }
        }

        Ok(())
    }

    fn record_attempt(&self, account_id: &str, now: DateTime<Utc>) -> Result<(), LoginError> {
        let window = self.config.attempt_window();

        let mut entry = self
            .attempts
            .entry(account_id.to_string())
            .or_insert(LoginAttemptWindow {
                window_start: now,
                attempt_count: 0,
            });

        if now >= entry.window_start + window {
            entry.window_start = now;
            entry.attempt_count = 0;
        }

        if entry.attempt_count >= self.config.max_attempts {
            let remaining_ms = (entry.window_start + window - now).num_milliseconds().max(0);
            let retry_after = ((remaining_ms as u64) + 999) / 1000;

            RateLimitMetrics::record_login_denied();
            tracing::warn!(retry_after, "Login attempt window exhausted");

            return Err(LoginError::RateLimited {
                retry_after: retry_after.max(1),
            });
        }

        entry.attempt_count += 1;
        Ok(())
    }

    fn record_failure(&self, account_id: &str, now: DateTime<Utc>) {
        let mut tracker = self.failures.entry(account_id.to_string()).or_default();
        tracker.consecutive_failures += 1;

        if tracker.consecutive_failures >= self.config.lockout_threshold
            && !tracker.is_locked(now)
        {
            let locked_until = now + self.config.lockout_duration();
            tracker.locked_until = Some(locked_until);

            LoginMetrics::record_lockout();
            tracing::warn!(
                failures = tracker.consecutive_failures,
                locked_until = %locked_until,
                "Account locked after consecutive failures"
            );
        } else {
            tracing::debug!(failures = tracker.consecutive_failures, "Login failed");
        }
    }

    /// Drop attempt windows that have fully elapsed.
    pub fn purge_stale_attempts(&self, now: DateTime<Utc>) -> usize {
        let window = self.config.attempt_window();
        let before = self.attempts.len();
        self.attempts.retain(|_, w| now < w.window_start + window);
        before.saturating_sub(self.attempts.len())
    }

    /// Drop trackers whose lock has elapsed, or that were never locked and hold no failures.
    pub fn purge_idle_trackers(&self, now: DateTime<Utc>) -> usize {
        let before = self.failures.len();
        self.failures.retain(|_, t| match t.locked_until {
            Some(until) => now < until,
            None => t.consecutive_failures > 0,
        });
        before.saturating_sub(self.failures.len())
    }

    pub fn tracker(&self, account_id: &str) -> Option<FailedLoginTracker> {
        self.failures.get(account_id).map(|t| *t)
    }

    pub fn attempt_window(&self, account_id: &str) -> Option<LoginAttemptWindow> {
        self.attempts.get(account_id).map(|w| *w)
    }

    pub fn tracked_accounts(&self) -> (usize, usize) {
        (self.attempts.len(), self.failures.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;
    use crate::config::JwtConfig;
    use chrono::Duration;

    async fn setup(config: LoginConfig) -> LoginGuard {
        let store = MemoryCredentialStore::new(4, 4);
        store
            .register("mod-1", "1234", vec!["cases:read".to_string()])
            .await
            .unwrap();

        let tokens = TokenService::new(&JwtConfig {
            secret: "test-secret".to_string(),
            issuer: None,
            audience: None,
            expiry_hours: 24,
        });

        LoginGuard::new(config, Arc::new(store), Arc::new(tokens))
    }

    #[tokio::test]
    async fn test_successful_login_issues_token() {
        let guard = setup(LoginConfig::default()).await;
        let issued = guard.login("mod-1", "1234").await.unwrap();
        assert!(!issued.token.is_empty());
        assert_eq!(guard.tracked_accounts(), (0, 0));
    }

    #[tokio::test]
    async fn test_lockout_after_threshold() {
        let guard = setup(LoginConfig::default()).await;
        let now = Utc::now();

        for _ in 0..5 {
            let result = guard.login_at("mod-1", "wrong", now).await;
            assert!(matches!(result, Err(LoginError::InvalidCredentials)));
        }

        // 6th attempt is refused by the lock, not the attempt window
        let result = guard.login_at("mod-1", "1234", now).await;
        match result {
            Err(LoginError::Locked { locked_until }) => {
                assert_eq!(locked_until, now + Duration::minutes(15));
            }
            other => panic!("expected Locked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lockout_precedes_rate_limit() {
        let config = LoginConfig {
            max_attempts: 3,
            lockout_threshold: 3,
            ..LoginConfig::default()
        };
        let guard = setup(config).await;
        let now = Utc::now();

        for _ in 0..3 {
            let _ = guard.login_at("mod-1", "wrong", now).await;
        }

        // both the window and the lock are exhausted
        let result = guard.login_at("mod-1", "wrong", now).await;
        assert!(matches!(result, Err(LoginError::Locked { .. })));
    }

    #[tokio::test]
    async fn test_attempt_window_rate_limits() {
        let config = LoginConfig {
            max_attempts: 2,
            lockout_threshold: 10,
            ..LoginConfig::default()
        };
        let guard = setup(config).await;
        let now = Utc::now();

        let _ = guard.login_at("mod-1", "wrong", now).await;
        let _ = guard.login_at("mod-1", "wrong", now).await;

        let later = now + Duration::seconds(60);
        match guard.login_at("mod-1", "1234", later).await {
            Err(LoginError::RateLimited { retry_after }) => assert_eq!(retry_after, 240),
            other => panic!("expected RateLimited, got {:?}", other),
        }

        // a fresh window admits the account again
        let next_window = now + Duration::minutes(5);
        assert!(guard.login_at("mod-1", "1234", next_window).await.is_ok());
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let guard = setup(LoginConfig::default()).await;
        let now = Utc::now();

        for _ in 0..3 {
            let _ = guard.login_at("mod-1", "wrong", now).await;
        }
        assert_eq!(guard.tracker("mod-1").unwrap().consecutive_failures, 3);

        guard.login_at("mod-1", "1234", now).await.unwrap();
        assert!(guard.tracker("mod-1").is_none());
        assert!(guard.attempt_window("mod-1").is_none());
    }

    #[tokio::test]
    async fn test_expired_lock_is_cleared() {
        let guard = setup(LoginConfig::default()).await;
        let now = Utc::now();

        for _ in 0..5 {
            let _ = guard.login_at("mod-1", "wrong", now).await;
        }

        let after_lock = now + Duration::minutes(16);
        let _ = guard.login_at("mod-1", "wrong", after_lock).await;

        let tracker = guard.tracker("mod-1").unwrap();
        assert_eq!(tracker.consecutive_failures, 1);
        assert!(tracker.locked_until.is_none());
    }

    #[tokio::test]
    async fn test_purge_state() {
        let guard = setup(LoginConfig::default()).await;
        let now = Utc::now();

        for _ in 0..5 {
            let _ = guard.login_at("mod-1", "wrong", now).await;
        }
        let _ = guard.login_at("mod-2", "wrong", now).await;

        // Inside the window and lock nothing goes
        assert_eq!(guard.purge_stale_attempts(now), 0);
        assert_eq!(guard.purge_idle_trackers(now), 0);

        let later = now + Duration::minutes(20);
        assert_eq!(guard.purge_stale_attempts(later), 2);
        // mod-1's lock elapsed; mod-2 still holds one failure
        assert_eq!(guard.purge_idle_trackers(later), 1);
        assert!(guard.tracker("mod-2").is_some());
    }
}
