//! Per-client HTTP rate limiter

use dashmap::DashMap;
use serde::Serialize;

use crate::config::RateLimitConfig;

use super::token_bucket::TokenBucket;

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitResult {
    Allowed {
        remaining: u32,
        limit: u32,
        reset_at: i64,
    },
    Denied {
        retry_after: u64,
        limit: u32,
        reset_at: i64,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }
}

/// Token buckets keyed by client (IP address or forwarded client address).
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn check(&self, key: &str) -> RateLimitResult {
        self.check_at(key, TokenBucket::now_millis())
    }

    pub fn check_at(&self, key: &str, now_ms: i64) -> RateLimitResult {
        let limit = self.config.requests_per_window;

        if !self.config.enabled {
            return RateLimitResult::Allowed {
                remaining: u32::MAX,
                limit,
                reset_at: 0,
            };
        }

        // The entry guard serializes refill-and-consume for this key
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| {
            TokenBucket::new_at(
                self.config.burst_size,
                self.config.requests_per_window,
                self.config.window_seconds,
                now_ms,
            )
        });

        if bucket.try_consume_at(now_ms) {
            RateLimitResult::Allowed {
                remaining: bucket.available_at(now_ms),
                limit,
                reset_at: bucket.reset_at(now_ms),
            }
        } else {
            let retry_after = bucket
                .retry_after_at(now_ms)
                .min(self.config.window_seconds.max(1));
            RateLimitResult::Denied {
                retry_after,
                limit,
                reset_at: bucket.reset_at(now_ms),
            }
        }
    }

    /// Drop buckets untouched for longer than `bucket_ttl_seconds`.
    pub fn cleanup_stale(&self) -> usize {
        self.cleanup_stale_at(TokenBucket::now_millis())
    }

    pub fn cleanup_stale_at(&self, now_ms: i64) -> usize {
        let ttl_ms = (self.config.bucket_ttl_seconds * 1000) as i64;
        let before = self.buckets.len();

        self.buckets
            .retain(|_, bucket| now_ms - bucket.last_activity() < ttl_ms);

        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(
                removed,
                buckets = self.buckets.len(),
                "Cleaned up stale rate limit buckets"
            );
        }

        removed
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            enabled: self.config.enabled,
            buckets: self.buckets.len(),
            requests_per_window: self.config.requests_per_window,
            window_seconds: self.config.window_seconds,
            burst_size: self.config.burst_size,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub enabled: bool,
    pub buckets: usize,
    pub requests_per_window: u32,
    pub window_seconds: u64,
    pub burst_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(burst_size: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests_per_window: 60,
            window_seconds: 60,
            burst_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_rate_limiter_disabled() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..Default::default()
        });

        for _ in 0..100 {
            assert!(limiter.check("127.0.0.1").is_allowed());
        }
    }

    #[test]
    fn test_burst_then_denied() {
        let limiter = RateLimiter::new(config(5));
        let now = 10_000;

        for _ in 0..5 {
            assert!(limiter.check_at("10.0.0.1", now).is_allowed());
        }

        match limiter.check_at("10.0.0.1", now) {
            RateLimitResult::Denied {
                retry_after, limit, ..
            } => {
                assert_eq!(retry_after, 1);
                assert_eq!(limit, 60);
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(config(3));
        let now = 10_000;

        for _ in 0..3 {
            assert!(limiter.check_at("key-1", now).is_allowed());
        }
        assert!(!limiter.check_at("key-1", now).is_allowed());

        for _ in 0..3 {
            assert!(limiter.check_at("key-2", now).is_allowed());
        }
    }

    #[test]
    fn test_remaining_counts_down() {
        let limiter = RateLimiter::new(config(3));
        let now = 10_000;

        let remaining: Vec<u32> = (0..3)
            .map(|_| match limiter.check_at("k", now) {
                RateLimitResult::Allowed { remaining, .. } => remaining,
                RateLimitResult::Denied { .. } => u32::MAX,
            })
            .collect();

        assert_eq!(remaining, vec![2, 1, 0]);
    }

    #[test]
    fn test_cleanup_stale_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            bucket_ttl_seconds: 600,
            ..config(5)
        });

        limiter.check_at("old", 0);
        limiter.check_at("fresh", 590_000);

        assert_eq!(limiter.cleanup_stale_at(600_000), 1);
        assert_eq!(limiter.stats().buckets, 1);
    }
}
