use std::collections::HashMap;
use std::sync::Arc;
use rand::Rng;
use crate::errors::Result;
use crate::store::{KvStore, StoreKeys};
use crate::utils::normalize_source_ref;

/// Store layout version written by [`PlayCounter::migrate`].
pub const FORMAT_VERSION: u32 = 2;

/// Per-reference play counts, shared by every routing context.
#[derive(Clone)]
pub struct PlayCounter {
    store: Arc<dyn KvStore>,
    keys: StoreKeys,
}

impl PlayCounter {
    pub fn new(store: Arc<dyn KvStore>, keys: StoreKeys) -> Self {
        Self { store, keys }
    }

    pub async fn record(&self, source_ref: &str) -> Result<i64> {
        let normalized = normalize_source_ref(source_ref);
        self.store.hincrby(&self.keys.play_count(), &normalized, 1).await
    }

    pub async fn counts(&self) -> Result<HashMap<String, i64>> {
        self.store.hgetall(&self.keys.play_count()).await
    }

    /// Picks a previously played reference, weighted by play count.
    pub async fn weighted_pick<R: Rng>(&self, rng: &mut R) -> Result<Option<String>> {
        let mut counts: Vec<(String, i64)> = self.counts().await?.into_iter().filter(|(_, n)| *n > 0).collect();
        // Stable order so a seeded rng picks reproducibly.
        counts.sort();

        let total: i64 = counts.iter().map(|(_, n)| n).sum();
        if total == 0 {
            return Ok(None);
        }

        let mut roll = rng.gen_range(0..total);
        for (source_ref, count) in counts {
            if roll < count {
                return Ok(Some(source_ref));
            }
            roll -= count;
        }
        Ok(None)
    }

    pub async fn format_version(&self) -> Result<u32> {
        let raw = self.store.get(&self.keys.format_version()).await?;
        Ok(raw
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(1))
    }

    /// One-time move of the legacy played-set into counters. Returns the number
    /// of references migrated; a no-op once the store is at [`FORMAT_VERSION`].
    pub async fn migrate(&self) -> Result<usize> {
        let version = self.format_version().await?;
        if version >= FORMAT_VERSION {
            log::debug!("📊 [STORE] Play counts already at format v{}", version);
            return Ok(0);
        }

        let legacy = self.store.smembers(&self.keys.legacy_played()).await?;
        log::info!("📊 [STORE] Migrating {} played references to counters", legacy.len());

        for source_ref in &legacy {
            self.record(source_ref).await?;
        }

        self.store.delete(&self.keys.legacy_played()).await?;
        self.store
            .set(&self.keys.format_version(), FORMAT_VERSION.to_string().into_bytes())
            .await?;

        Ok(legacy.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn counter() -> (PlayCounter, MemoryStore) {
        let store = MemoryStore::new();
        (PlayCounter::new(Arc::new(store.clone()), StoreKeys::new("t:")), store)
    }

    #[tokio::test]
    async fn record_normalizes_refs() {
        let (counter, _) = counter();
        counter.record("https://yt/a").await.unwrap();
        counter.record("<https://yt/a>").await.unwrap();

        assert_eq!(counter.counts().await.unwrap().get("https://yt/a"), Some(&2));
    }

    #[tokio::test]
    async fn migration_runs_once() {
        let (counter, store) = counter();
        store.sadd("t:played", "https://yt/a").await.unwrap();
        store.sadd("t:played", "https://yt/b").await.unwrap();
        counter.record("https://yt/a").await.unwrap();

        assert_eq!(counter.migrate().await.unwrap(), 2);
        assert_eq!(counter.migrate().await.unwrap(), 0);

        let counts = counter.counts().await.unwrap();
        assert_eq!(counts.get("https://yt/a"), Some(&2));
        assert_eq!(counts.get("https://yt/b"), Some(&1));
        assert!(store.smembers("t:played").await.unwrap().is_empty());
        assert_eq!(counter.format_version().await.unwrap(), FORMAT_VERSION);
    }

    #[tokio::test]
    async fn weighted_pick_only_returns_played_refs() {
        let (counter, _) = counter();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(counter.weighted_pick(&mut rng).await.unwrap(), None);

        for _ in 0..5 {
            counter.record("https://yt/often").await.unwrap();
        }
        counter.record("https://yt/rare").await.unwrap();

        let mut seen = HashMap::new();
        for _ in 0..200 {
            let pick = counter.weighted_pick(&mut rng).await.unwrap().unwrap();
            *seen.entry(pick).or_insert(0) += 1;
        }
        assert!(seen["https://yt/often"] > seen.get("https://yt/rare").copied().unwrap_or(0));
    }
}
