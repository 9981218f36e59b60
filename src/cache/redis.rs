//! Redis cache backend.
//!
//! Values are written with `SET EX`. Each tag is a Redis Set named
//! `_tag:<tag>` holding the keys stored under it, so tag removal is
//! `SMEMBERS` followed by `DEL` without scanning the keyspace. Each key also
//! has a `_keytags:<key>` Set naming its tags, which lets an overwrite or a
//! removal detach the key from the tag sets it no longer belongs to.
//!
//! Tag sets expire no earlier than the longest-lived member, and the per-key
//! set expires with its entry, so bookkeeping for keys that expire on their
//! own does not outlive them. None of this is atomic.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::keys::Tag;
use super::store::{CacheBackend, CacheError};

const TAG_SET_PREFIX: &str = "_tag:";
const KEY_TAGS_PREFIX: &str = "_keytags:";

fn tag_set_key(tag: &Tag) -> String {
    format!("{TAG_SET_PREFIX}{tag}")
}

fn tag_set_key_raw(tag: &str) -> String {
    format!("{TAG_SET_PREFIX}{tag}")
}

fn key_tags_key(key: &str) -> String {
    format!("{KEY_TAGS_PREFIX}{key}")
}

fn map_redis_error(err: redis::RedisError) -> CacheError {
    if err.is_connection_refusal() || err.is_timeout() || err.is_connection_dropped() {
        CacheError::Unavailable(err.to_string())
    } else {
        CacheError::Backend(err.to_string())
    }
}

pub struct RedisCacheBackend {
    conn: ConnectionManager,
}

impl RedisCacheBackend {
    /// Connect to `url`, e.g. `redis://localhost:6379`.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(map_redis_error)?;
        Ok(Self { conn })
    }

    /// Remove `key` from every tag set it was registered in and forget its
    /// tag list. The entry itself is left alone.
    async fn detach(conn: &mut ConnectionManager, key: &str) -> Result<(), CacheError> {
        let index = key_tags_key(key);
        let previous: Vec<String> = conn.smembers(&index).await.map_err(map_redis_error)?;
        for tag in &previous {
            conn.srem::<_, _, ()>(tag_set_key_raw(tag), key)
                .await
                .map_err(map_redis_error)?;
        }
        conn.del::<_, ()>(&index).await.map_err(map_redis_error)
    }

    /// Make sure `set_key` lives at least `seconds` from now.
    async fn extend_expiry(
        conn: &mut ConnectionManager,
        set_key: &str,
        seconds: u64,
    ) -> Result<(), CacheError> {
        // NX covers a set without expiry, GT only ever lengthens an existing one.
        for option in ["NX", "GT"] {
            let _: () = redis::cmd("EXPIRE")
                .arg(set_key)
                .arg(seconds)
                .arg(option)
                .query_async(conn)
                .await
                .map_err(map_redis_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(map_redis_error)?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        tags: &[Tag],
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);

        Self::detach(&mut conn, key).await?;
        conn.set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(map_redis_error)?;

        if tags.is_empty() {
            return Ok(());
        }

        let index = key_tags_key(key);
        for tag in tags {
            let set_key = tag_set_key(tag);
            conn.sadd::<_, _, ()>(&set_key, key)
                .await
                .map_err(map_redis_error)?;
            Self::extend_expiry(&mut conn, &set_key, seconds).await?;
            conn.sadd::<_, _, ()>(&index, tag.as_str())
                .await
                .map_err(map_redis_error)?;
        }
        conn.expire::<_, ()>(&index, i64::try_from(seconds).unwrap_or(i64::MAX))
            .await
            .map_err(map_redis_error)?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        Self::detach(&mut conn, key).await?;
        conn.del::<_, ()>(key).await.map_err(map_redis_error)
    }

    async fn remove_tag(&self, tag: &Tag) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let set_key = tag_set_key(tag);

        let members: Vec<String> = conn.smembers(&set_key).await.map_err(map_redis_error)?;
        for member in &members {
            Self::detach(&mut conn, member).await?;
        }
        if !members.is_empty() {
            conn.del::<_, ()>(&members).await.map_err(map_redis_error)?;
        }
        conn.del::<_, ()>(&set_key).await.map_err(map_redis_error)?;

        debug!(tag = %tag, removed = members.len(), "Removed tagged entries");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    async fn connect_or_skip() -> Option<RedisCacheBackend> {
        match RedisCacheBackend::connect(&redis_url()).await {
            Ok(backend) => Some(backend),
            Err(error) => {
                eprintln!("skipping redis test: {error}");
                None
            }
        }
    }

    #[test]
    fn bookkeeping_keys_are_prefixed() {
        assert_eq!(
            tag_set_key(&Tag::new("website:document:bylaws")),
            "_tag:website:document:bylaws"
        );
        assert_eq!(
            key_tags_key("website:doc:bylaws:content"),
            "_keytags:website:doc:bylaws:content"
        );
    }

    #[tokio::test]
    async fn remove_tag_deletes_members() {
        let Some(backend) = connect_or_skip().await else {
            return;
        };
        let tag = Tag::new("test:redis-backend");
        let key = "test:redis-backend:entry";
        let ttl = Duration::from_secs(60);

        backend
            .set(key, b"value".to_vec(), ttl, std::slice::from_ref(&tag))
            .await
            .expect("set");
        assert!(backend.get(key).await.expect("get").is_some());

        backend.remove_tag(&tag).await.expect("remove tag");
        assert!(backend.get(key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn overwrite_moves_key_to_new_tags() {
        let Some(backend) = connect_or_skip().await else {
            return;
        };
        let old_tag = Tag::new("test:redis-retag-old");
        let new_tag = Tag::new("test:redis-retag-new");
        let key = "test:redis-retag:entry";
        let ttl = Duration::from_secs(60);

        backend
            .set(key, b"v1".to_vec(), ttl, std::slice::from_ref(&old_tag))
            .await
            .expect("set v1");
        backend
            .set(key, b"v2".to_vec(), ttl, std::slice::from_ref(&new_tag))
            .await
            .expect("set v2");

        backend.remove_tag(&old_tag).await.expect("remove old tag");
        assert_eq!(backend.get(key).await.expect("get"), Some(b"v2".to_vec()));

        backend.remove_tag(&new_tag).await.expect("remove new tag");
        assert!(backend.get(key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn tag_sets_expire_with_their_entries() {
        let Some(backend) = connect_or_skip().await else {
            return;
        };
        let tag = Tag::new("test:redis-tag-expiry");
        let key = "test:redis-tag-expiry:entry";

        backend
            .set(key, b"v".to_vec(), Duration::from_secs(30), std::slice::from_ref(&tag))
            .await
            .expect("set");

        let mut conn = backend.conn.clone();
        let tag_ttl: i64 = conn.ttl(tag_set_key(&tag)).await.expect("tag ttl");
        let index_ttl: i64 = conn.ttl(key_tags_key(key)).await.expect("index ttl");
        assert!((1..=30).contains(&tag_ttl), "{tag_ttl}");
        assert!((1..=30).contains(&index_ttl), "{index_ttl}");

        backend.remove(key).await.expect("remove");
        let members: Vec<String> = conn.smembers(tag_set_key(&tag)).await.expect("members");
        assert!(members.is_empty());
    }
}
