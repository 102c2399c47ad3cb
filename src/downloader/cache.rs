use std::sync::Arc;
use std::time::Duration;
use serde_json::Value;
use crate::errors::Result;
use crate::store::{KvStore, StoreKeys};
use crate::utils::{hash_ref, is_search_ref, normalize_source_ref};

/// Resolved-metadata cache kept in the durable store under
/// `cache:<md5(ref)>[:processed]` with a fixed expiry.
#[derive(Clone)]
pub struct MetadataCache {
    store: Arc<dyn KvStore>,
    keys: StoreKeys,
    ttl: Duration,
}

impl MetadataCache {
    pub fn new(store: Arc<dyn KvStore>, keys: StoreKeys, ttl_seconds: u64) -> Self {
        Self {
            store,
            keys,
            ttl: Duration::from_secs(ttl_seconds),
        }
    }

    /// `None` for references that must never be cached.
    pub fn key_for(&self, source_ref: &str, processed: bool) -> Option<String> {
        let normalized = normalize_source_ref(source_ref);
        if is_search_ref(&normalized) {
            return None;
        }
        Some(self.keys.cache(&hash_ref(&normalized), processed))
    }

    pub async fn get(&self, source_ref: &str, processed: bool) -> Option<Value> {
        let key = self.key_for(source_ref, processed)?;

        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("💾 [CACHE] Lookup failed for {}: {}", source_ref, e);
                return None;
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("💾 [CACHE] Discarding undecodable entry for {}: {}", source_ref, e);
                None
            }
        }
    }

    pub async fn put(&self, source_ref: &str, processed: bool, value: &Value) -> Result<()> {
        let Some(key) = self.key_for(source_ref, processed) else {
            return Ok(());
        };

        // A plain reference can still resolve to a search.
        if value.get("url").and_then(Value::as_str).map_or(false, is_search_ref) {
            return Ok(());
        }

        self.store.set_ex(&key, serde_json::to_vec(value)?, self.ttl).await
    }

    /// Write-back off the critical path; failures are logged only.
    pub fn put_detached(&self, source_ref: String, processed: bool, value: Value) {
        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.put(&source_ref, processed, &value).await {
                log::warn!("💾 [CACHE] Write-back failed for {}: {}", source_ref, e);
            }
        });
    }
}
