//! Typed cache access over a byte-oriented backend.
//!
//! [`CacheBackend`] is the seam to the key/value service; [`CacheStore`]
//! layers JSON encoding, default expiry and key validation on top of it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use super::keys::{CacheKey, CacheKeyError, Tag};

/// Expiry applied when a write does not name one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    InvalidKey(#[from] CacheKeyError),
    #[error("failed to encode cache value: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The backend could not be reached at all.
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    /// The backend was reached but the operation failed.
    #[error("cache backend operation failed: {0}")]
    Backend(String),
}

/// Raw key/value storage with tag-grouped removal.
///
/// Removal of absent keys or tags succeeds.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value`, replacing any previous entry and its tags.
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        tags: &[Tag],
    ) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every entry stored under `tag`.
    async fn remove_tag(&self, tag: &Tag) -> Result<(), CacheError>;
}

#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            default_ttl: DEFAULT_TTL,
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Read and decode an entry.
    ///
    /// A payload that no longer decodes as `T` is dropped from the backend and
    /// reported as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>, CacheError> {
        key.validate()?;

        let Some(bytes) = self.backend.get(key.as_str()).await? else {
            return Ok(None);
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                warn!(
                    key = %key,
                    error = %error,
                    "Discarding undecodable cache entry"
                );
                if let Err(remove_error) = self.backend.remove(key.as_str()).await {
                    debug!(
                        key = %key,
                        error = %remove_error,
                        "Failed to remove undecodable cache entry"
                    );
                }
                Ok(None)
            }
        }
    }

    /// Encode and store `value` under `key`, grouped under `tags`.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Option<Duration>,
        tags: &[Tag],
    ) -> Result<(), CacheError> {
        key.validate()?;
        for tag in tags {
            tag.validate()?;
        }

        let bytes = serde_json::to_vec(value)?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.backend.set(key.as_str(), bytes, ttl, tags).await
    }

    pub async fn remove_by_key(&self, key: &CacheKey) -> Result<(), CacheError> {
        key.validate()?;
        self.backend.remove(key.as_str()).await
    }

    pub async fn remove_by_tag(&self, tag: &Tag) -> Result<(), CacheError> {
        tag.validate()?;
        debug!(tag = %tag, "Removing cache entries by tag");
        self.backend.remove_tag(tag).await
    }
}
