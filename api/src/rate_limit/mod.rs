//! Tiered sliding-window rate limiting.
//!
//! - `window`: window ids, interpolation, key layout
//! - `limiter`: per-agent read/write pools with daily caps, plus the IP fallback
//! - `decision`: check results and usage snapshots
//! - `admin`: allow-list of tokens that bypass the limiter

pub mod admin;
pub mod decision;
pub mod limiter;
pub mod window;

pub use admin::AdminAllowList;
pub use decision::{DenialScope, IpUsageSnapshot, RateLimitDecision, UsageSnapshot};
pub use limiter::RateLimiter;
