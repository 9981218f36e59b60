//! Cache-aside decorator for query handlers.
//!
//! A [`CachedQueryHandler`] wraps any [`QueryHandler`] whose output implements
//! [`Envelope`]. Successful values are stored under the key and tags the
//! query's [`CachePolicy`] names; errors pass through and are never stored.
//!
//! The policy is resolved when the handler is constructed. A handler built
//! without one calls straight through, as does every handler while caching is
//! disabled.
//!
//! Backend failures fail open: a read error is treated as a miss and a write
//! error only costs the cache entry. Concurrent misses for one key each call
//! the inner handler and each write the result.

use std::any::type_name;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::envelope::Envelope;
use super::keys::{CacheKey, Tag};
use super::store::CacheStore;

const METRIC_CACHE_HIT: &str = "pinfall_cache_hit_total";
const METRIC_CACHE_MISS: &str = "pinfall_cache_miss_total";
const METRIC_CACHE_BACKEND_ERROR: &str = "pinfall_cache_backend_error_total";

/// Something that answers a query.
#[async_trait]
pub trait QueryHandler<Q>: Send + Sync
where
    Q: Send + Sync,
{
    type Output: Send;

    async fn handle(&self, query: &Q) -> Self::Output;
}

/// Where and for how long a query result lives in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub key: CacheKey,
    /// `None` uses the store's default expiry.
    pub ttl: Option<Duration>,
    pub tags: Vec<Tag>,
}

impl CachePolicy {
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            ttl: None,
            tags: Vec::new(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }
}

/// Queries that carry their own cache policy.
pub trait CacheableQuery {
    fn cache_policy(&self) -> CachePolicy;
}

type PolicyFn<Q> = Arc<dyn Fn(&Q) -> CachePolicy + Send + Sync>;

pub struct CachedQueryHandler<H, Q> {
    inner: H,
    store: CacheStore,
    enabled: bool,
    policy: Option<PolicyFn<Q>>,
    _query: PhantomData<fn(&Q)>,
}

impl<H, Q> CachedQueryHandler<H, Q> {
    /// Cache with an explicitly supplied policy.
    pub fn with_policy<F>(inner: H, store: CacheStore, enabled: bool, policy: F) -> Self
    where
        F: Fn(&Q) -> CachePolicy + Send + Sync + 'static,
    {
        Self {
            inner,
            store,
            enabled,
            policy: Some(Arc::new(policy)),
            _query: PhantomData,
        }
    }

    /// Never cache; every call reaches `inner`.
    pub fn uncached(inner: H, store: CacheStore) -> Self {
        Self {
            inner,
            store,
            enabled: false,
            policy: None,
            _query: PhantomData,
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

impl<H, Q> CachedQueryHandler<H, Q>
where
    Q: CacheableQuery + 'static,
{
    /// Cache using the query's own [`CacheableQuery::cache_policy`].
    pub fn cacheable(inner: H, store: CacheStore, enabled: bool) -> Self {
        Self::with_policy(inner, store, enabled, Q::cache_policy)
    }
}

#[async_trait]
impl<H, Q> QueryHandler<Q> for CachedQueryHandler<H, Q>
where
    Q: Send + Sync + 'static,
    H: QueryHandler<Q>,
    H::Output: Envelope,
    <H::Output as Envelope>::Value: Serialize + DeserializeOwned + Send + Sync,
{
    type Output = H::Output;

    async fn handle(&self, query: &Q) -> Self::Output {
        let query_type = type_name::<Q>();

        let policy = match (&self.policy, self.enabled) {
            (Some(policy), true) => policy(query),
            _ => return self.inner.handle(query).await,
        };

        if let Err(error) = policy.key.validate() {
            warn!(
                query = query_type,
                key = %policy.key,
                error = %error,
                "Invalid cache key, bypassing cache"
            );
            return self.inner.handle(query).await;
        }

        match self
            .store
            .get::<<H::Output as Envelope>::Value>(&policy.key)
            .await
        {
            Ok(Some(value)) => {
                debug!(query = query_type, key = %policy.key, "Cache hit");
                counter!(METRIC_CACHE_HIT, "query" => query_type).increment(1);
                return H::Output::from_value(value);
            }
            Ok(None) => {}
            Err(error) => {
                warn!(
                    query = query_type,
                    key = %policy.key,
                    error = %error,
                    "Cache read failed, calling handler"
                );
                counter!(METRIC_CACHE_BACKEND_ERROR, "op" => "get").increment(1);
            }
        }

        debug!(query = query_type, key = %policy.key, "Cache miss");
        counter!(METRIC_CACHE_MISS, "query" => query_type).increment(1);

        let output = self.inner.handle(query).await;

        if let Some(value) = output.value() {
            if let Err(error) = self
                .store
                .set(&policy.key, value, policy.ttl, &policy.tags)
                .await
            {
                warn!(
                    query = query_type,
                    key = %policy.key,
                    error = %error,
                    "Cache write failed"
                );
                counter!(METRIC_CACHE_BACKEND_ERROR, "op" => "set").increment(1);
            }
        }

        output
    }
}
