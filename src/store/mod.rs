//! Durable key-value store used for queue persistence, the metadata cache and
//! play counts. One store is shared by every routing context; keys are
//! namespaced by [`StoreKeys`].

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use crate::errors::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;

    async fn rpush(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn lpush(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn lpop(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn lrange_all(&self, key: &str) -> Result<Vec<Vec<u8>>>;
    /// Atomically replaces the whole list (delete followed by a bulk push).
    async fn replace_list(&self, key: &str, values: Vec<Vec<u8>>) -> Result<()>;

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, i64>>;

    async fn sadd(&self, key: &str, member: &str) -> Result<()>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
}

/// Builds the store described by the config: Redis when a URL is set, otherwise in-process.
pub async fn connect(config: &crate::config::StoreConfig) -> Result<Arc<dyn KvStore>> {
    match &config.redis_url {
        Some(url) => {
            log::info!("[STORE] Connecting to redis at {}", url);
            Ok(Arc::new(RedisStore::connect(url).await?))
        }
        None => {
            log::warn!("[STORE] No redis_url configured, queue state will not survive restarts");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Key schema, all keys prefixed by the configured namespace.
#[derive(Debug, Clone)]
pub struct StoreKeys {
    namespace: String,
}

impl StoreKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into() }
    }

    pub fn queue(&self, context_id: &str) -> String {
        format!("{}queue:{}", self.namespace, context_id)
    }

    pub fn cache(&self, ref_hash: &str, processed: bool) -> String {
        if processed {
            format!("{}cache:{}:processed", self.namespace, ref_hash)
        } else {
            format!("{}cache:{}", self.namespace, ref_hash)
        }
    }

    pub fn play_count(&self) -> String {
        format!("{}playcount", self.namespace)
    }

    /// Pre-migration set of every reference ever played.
    pub fn legacy_played(&self) -> String {
        format!("{}played", self.namespace)
    }

    pub fn format_version(&self) -> String {
        format!("{}format_version", self.namespace)
    }
}
