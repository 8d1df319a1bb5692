pub mod access;
pub mod rate_limit;

pub use access::{AccessControl, Decision, Protocol};
pub use rate_limit::{RateLimitManager, RateLimitResult, RateLimiter};
