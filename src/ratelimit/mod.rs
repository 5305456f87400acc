//! HTTP rate limiting using the token bucket algorithm.
//!
//! One bucket per client key (peer address, or the forwarded client address
//! when the deployment sits behind a trusted proxy). Buckets live in memory
//! and idle ones are dropped by the reaper.

mod limiter;
mod token_bucket;

pub use limiter::{RateLimitResult, RateLimiter, RateLimiterStats};
pub use token_bucket::TokenBucket;
