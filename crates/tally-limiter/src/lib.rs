//! Per-actor, per-scope fixed-window rate limiting for Tally commands.
//!
//! - [`FixedWindowLimiter`] -- the limiter the dispatcher consults
//! - [`WindowStore`] -- storage seam; [`MemoryWindowStore`] and
//!   [`RedisWindowStore`] implement it

pub mod rate_limit;
pub mod redis_store;

pub use rate_limit::{
    apply_hit, FixedWindowLimiter, MemoryWindowStore, RateLimitDecision, RateLimitWindow,
    WindowKey, WindowStore, DEFAULT_PRUNE_THRESHOLD,
};
pub use redis_store::RedisWindowStore;
