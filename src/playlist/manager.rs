use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use crate::config::QueueConfig;
use crate::downloader::{DownloadScheduler, HttpPool, MetadataCache, WorkerPool, YtDlpExtractor};
use crate::errors::{AppError, Result};
use crate::metadata::MetadataResolver;
use crate::playlist::{PlayCounter, Playlist, PlaylistServices};
use crate::store::{self, StoreKeys};
use crate::utils::ensure_dir_exists;

type PlaylistSlot = Arc<OnceCell<Arc<Playlist>>>;

/// One playlist per routing context, created and restored on first use.
pub struct QueueManager {
    services: PlaylistServices,
    playlists: Arc<Mutex<HashMap<String, PlaylistSlot>>>,
}

impl QueueManager {
    /// Wires the production stack from config and runs the play-count migration.
    pub async fn new(config: &QueueConfig) -> Result<Self> {
        config.validate()?;
        ensure_dir_exists(&config.download_dir).await?;

        let store = store::connect(&config.store).await?;
        let keys = StoreKeys::new(config.store.namespace.clone());
        let pool = WorkerPool::new(config.worker_threads);
        let probe = Arc::new(HttpPool::from_config(&config.http)?);
        let extractor = Arc::new(YtDlpExtractor::from_config(&config.extractor, &config.download_dir));
        let cache = MetadataCache::new(store.clone(), keys.clone(), config.cache_ttl_secs);

        let services = PlaylistServices {
            resolver: Arc::new(MetadataResolver::new(extractor.clone(), pool.clone(), cache, probe.clone())),
            scheduler: DownloadScheduler::new(extractor, pool, probe, &config.download_dir),
            play_counts: PlayCounter::new(store.clone(), keys.clone()),
            prefetch: config.prefetch,
            store,
            keys,
        };

        Self::with_services(services).await
    }

    pub async fn with_services(services: PlaylistServices) -> Result<Self> {
        let migrated = services.play_counts.migrate().await?;
        if migrated > 0 {
            log::info!("📊 [QUEUE] Migrated {} legacy play records", migrated);
        }

        Ok(Self {
            services,
            playlists: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// The playlist for `context_id`, restored from the store the first time.
    /// Concurrent first calls for one context share a single restore; other
    /// contexts are never blocked behind it.
    pub async fn get_playlist(&self, context_id: &str) -> Result<Arc<Playlist>> {
        let slot = self
            .playlists
            .lock()
            .await
            .entry(context_id.to_string())
            .or_default()
            .clone();

        let playlist = slot
            .get_or_try_init(|| async {
                let playlist = Arc::new(Playlist::new(context_id, self.services.clone()));
                playlist.load().await?;
                Ok::<_, AppError>(playlist)
            })
            .await?;
        Ok(playlist.clone())
    }

    /// Contexts whose playlist has finished loading.
    pub async fn contexts(&self) -> Vec<String> {
        let mut contexts: Vec<String> = self
            .playlists
            .lock()
            .await
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(context_id, _)| context_id.clone())
            .collect();
        contexts.sort();
        contexts
    }

    pub fn play_counts(&self) -> &PlayCounter {
        &self.services.play_counts
    }

    pub fn scheduler(&self) -> &DownloadScheduler {
        &self.services.scheduler
    }
}
