//! Token Bucket algorithm implementation

use std::time::SystemTime;

/// Fixed-point scale: one whole token
const MILLI: u64 = 1000;

/// Token bucket for one client key.
///
/// Tokens are tracked in thousandths and refilled from the exact
/// `requests / window` ratio. `last_refill` only advances by the time that
/// produced whole thousandths, so the remainder carries into the next call
/// and fractional rates (10 per minute) accrue without drift however often
/// the bucket is polled. Callers hold the map entry exclusively while
/// mutating, so no atomics are needed.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Current tokens, scaled by 1000
    tokens_milli: u64,
    /// Maximum bucket capacity (whole tokens)
    capacity: u32,
    /// Tokens added per `window_ms`
    requests: u64,
    window_ms: u64,
    /// Refill checkpoint (Unix milliseconds)
    last_refill: i64,
    /// Last time the bucket was consulted (Unix milliseconds)
    last_seen: i64,
}

impl TokenBucket {
    /// `requests` tokens per `window_secs`, holding at most `capacity`.
    pub fn new(capacity: u32, requests: u32, window_secs: u64) -> Self {
        Self::new_at(capacity, requests, window_secs, Self::now_millis())
    }

    pub fn new_at(capacity: u32, requests: u32, window_secs: u64, now_ms: i64) -> Self {
        Self {
            tokens_milli: capacity as u64 * MILLI,
            capacity,
            requests: requests as u64,
            window_ms: window_secs.max(1) * 1000,
            last_refill: now_ms,
            last_seen: now_ms,
        }
    }

    pub fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    fn full(&self) -> u64 {
        self.capacity as u64 * MILLI
    }

    /// Thousandths earned since the checkpoint and the milliseconds they used up.
    fn accrued(&self, now_ms: i64) -> (u64, u64) {
        let elapsed_ms = (now_ms - self.last_refill).max(0) as u64;
        let added = elapsed_ms.saturating_mul(self.requests * MILLI) / self.window_ms;
        if added == 0 {
            return (0, 0);
        }
        let used_ms = added.saturating_mul(self.window_ms) / (self.requests * MILLI);
        (added, used_ms)
    }

    fn refilled(&self, now_ms: i64) -> u64 {
        let (added, _) = self.accrued(now_ms);
        self.tokens_milli.saturating_add(added).min(self.full())
    }

    fn refill(&mut self, now_ms: i64) {
        let (added, used_ms) = self.accrued(now_ms);
        let tokens = self.tokens_milli.saturating_add(added);

        if tokens >= self.full() {
            self.tokens_milli = self.full();
            self.last_refill = now_ms.max(self.last_refill);
        } else {
            self.tokens_milli = tokens;
            self.last_refill += used_ms as i64;
        }
        self.last_seen = now_ms.max(self.last_seen);
    }

    pub fn try_consume(&mut self) -> bool {
        self.try_consume_at(Self::now_millis())
    }

    /// Refill for the elapsed time, then take one token if available.
    pub fn try_consume_at(&mut self, now_ms: i64) -> bool {
        self.refill(now_ms);

        if self.tokens_milli < MILLI {
            return false;
        }

        self.tokens_milli -= MILLI;
        true
    }

    /// Whole tokens available at `now_ms`
    pub fn available_at(&self, now_ms: i64) -> u32 {
        (self.refilled(now_ms) / MILLI) as u32
    }

    /// Milliseconds from `now_ms` until the bucket holds `target` thousandths.
    fn wait_ms_for(&self, target: u64, now_ms: i64) -> u64 {
        let missing = target.saturating_sub(self.tokens_milli);
        let needed_ms = missing
            .saturating_mul(self.window_ms)
            .div_ceil(self.requests * MILLI);
        let elapsed_ms = (now_ms - self.last_refill).max(0) as u64;
        needed_ms.saturating_sub(elapsed_ms)
    }

    /// Seconds until one whole token is available (0 if one is available now)
    pub fn retry_after_at(&self, now_ms: i64) -> u64 {
        if self.refilled(now_ms) >= MILLI {
            return 0;
        }
        if self.requests == 0 {
            return u64::MAX;
        }

        self.wait_ms_for(MILLI, now_ms).div_ceil(1000).max(1)
    }

    /// Unix seconds at which the bucket will be full again
    pub fn reset_at(&self, now_ms: i64) -> i64 {
        if self.refilled(now_ms) >= self.full() || self.requests == 0 {
            return now_ms / 1000;
        }

        (now_ms + self.wait_ms_for(self.full(), now_ms) as i64) / 1000
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Last time the bucket was touched (Unix milliseconds)
    pub fn last_activity(&self) -> i64 {
        self.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_bucket_basic() {
        let now = 1_000_000;
        let mut bucket = TokenBucket::new_at(10, 60, 60, now);

        for _ in 0..10 {
            assert!(bucket.try_consume_at(now));
        }

        assert!(!bucket.try_consume_at(now));
        assert_eq!(bucket.retry_after_at(now), 1);
    }

    #[test]
    fn test_token_bucket_refill() {
        let now = 1_000_000;
        // one token per second
        let mut bucket = TokenBucket::new_at(5, 60, 60, now);

        for _ in 0..5 {
            assert!(bucket.try_consume_at(now));
        }

        assert!(!bucket.try_consume_at(now + 500));
        assert!(bucket.try_consume_at(now + 1_000));
        assert!(!bucket.try_consume_at(now + 1_000));
    }

    #[test]
    fn test_fractional_rate() {
        let now = 0;
        // 10 per minute: one token every 6 seconds
        let mut bucket = TokenBucket::new_at(1, 10, 60, now);
        assert!(bucket.try_consume_at(now));
        assert_eq!(bucket.retry_after_at(now), 6);

        assert!(!bucket.try_consume_at(now + 5_000));
        assert_eq!(bucket.retry_after_at(now + 5_000), 1);
        assert!(bucket.try_consume_at(now + 6_000));
    }

    #[test]
    fn test_frequent_polling_keeps_partial_refill() {
        // 10 per minute, retried every 5ms: the partial refill of each poll carries over
        let mut bucket = TokenBucket::new_at(1, 10, 60, 0);
        assert!(bucket.try_consume_at(0));

        let first_admission = (1..=12_000)
            .map(|step| step * 5)
            .find(|&t| bucket.try_consume_at(t));

        let admitted_at = first_admission.expect("a token should refill within a minute");
        assert!((5_995..=6_010).contains(&admitted_at), "admitted at {admitted_at}ms");
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let now = 0;
        let mut bucket = TokenBucket::new_at(3, 60, 60, now);
        assert!(bucket.try_consume_at(now));

        assert_eq!(bucket.available_at(now + 3_600_000), 3);
        assert_eq!(bucket.reset_at(now + 3_600_000), 3_600);
    }
}
