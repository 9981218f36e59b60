//! Pinfall cache layer
//!
//! Cache-aside storage for query results with tag-based invalidation:
//!
//! - **Keys** ([`CacheKey`]): `context:type:identifier[:subpart]` strings,
//!   validated before they reach a backend
//! - **Store** ([`CacheStore`]): typed JSON facade over a [`CacheBackend`]
//! - **Decorator** ([`CachedQueryHandler`]): wraps a query handler and caches
//!   its successful outputs under the query's [`CachePolicy`]
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! default_ttl_seconds = 604800
//! memory_entry_limit = 1024
//! # redis_url = "redis://localhost:6379"  # requires the `redis` feature
//! ```

mod config;
mod envelope;
mod keys;
mod lock;
mod memory;
mod query;
#[cfg(feature = "redis")]
mod redis;
mod store;
mod tags;

pub use config::CacheConfig;
pub use envelope::{Bare, Envelope};
pub use keys::{
    CacheKey, CacheKeyError, MAX_KEY_LEN, MIN_KEY_SEGMENTS, Tag, context, identifier, is_valid,
    kind, validate, validate_tag,
};
pub use memory::MemoryCacheBackend;
pub use query::{CachePolicy, CacheableQuery, CachedQueryHandler, QueryHandler};
#[cfg(feature = "redis")]
pub use redis::RedisCacheBackend;
pub use store::{CacheBackend, CacheError, CacheStore, DEFAULT_TTL};
