//! Cache configuration.
//!
//! Resolved from the `[cache]` section of `pinfall.toml`.

use std::time::Duration;

use super::store::DEFAULT_TTL;

const DEFAULT_MEMORY_ENTRY_LIMIT: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// When false, cached queries call straight through to their handler.
    pub enabled: bool,
    /// Expiry for writes that do not name one.
    pub default_ttl: Duration,
    /// Entry bound for the in-process backend.
    pub memory_entry_limit: usize,
    /// Use Redis instead of the in-process backend when set.
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: DEFAULT_TTL,
            memory_entry_limit: DEFAULT_MEMORY_ENTRY_LIMIT,
            redis_url: None,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            default_ttl: settings.default_ttl,
            memory_entry_limit: settings.memory_entry_limit.get(),
            redis_url: settings.redis_url.clone(),
        }
    }
}
