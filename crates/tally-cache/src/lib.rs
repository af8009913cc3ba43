//! Singleflight TTL cache for expensive upstream calls.
//!
//! A [`TieredCache`] keeps values in an optional primary backend (Redis)
//! and a bounded in-process tier, and coalesces concurrent misses on the
//! same key into a single producer call.

pub mod backend;
pub mod cache;
pub mod local;
pub mod singleflight;

pub use backend::{CacheBackend, RedisCacheBackend};
pub use cache::{CacheError, CacheStats, TieredCache};
pub use local::LocalCache;
pub use singleflight::Singleflight;
