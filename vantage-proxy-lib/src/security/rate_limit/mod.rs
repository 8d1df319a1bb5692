//! Rate limiting for HTTP and WebSocket rules (spec §4.E).
//!
//! Built on the same Count-Min Sketch + dual-buffer sliding window estimator
//! Cloudflare's Pingora uses:
//!
//! 1. **Estimator** (`estimator.rs`): Count-Min Sketch frequency table.
//! 2. **Rate** (`rate.rs`): red/blue sliding window tracker.
//! 3. **RateLimiter** (`limiter.rs`): burst-bound check on top of `Rate`.
//! 4. **RateLimitManager** (`manager.rs`): per-(listener, route) limiter
//!    lookup plus the ban-window map the upstream algorithm doesn't provide
//!    on its own.

mod estimator;
mod limiter;
pub mod manager;
mod rate;

pub use limiter::{RateLimitResult, RateLimiter};
pub use manager::RateLimitManager;
pub use rate::Rate;

use ahash::RandomState;
use std::hash::Hash;

#[inline]
fn hash<T: Hash>(key: T, hasher: &RandomState) -> u64 {
    hasher.hash_one(key)
}
