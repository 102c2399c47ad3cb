pub mod manager;
pub mod play_count;
pub mod record;

pub use manager::QueueManager;
pub use play_count::PlayCounter;
pub use record::EntryRecord;

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::Mutex;
use crate::downloader::{DownloadScheduler, Entry, EntryContext};
use crate::errors::{AppError, Result};
use crate::metadata::{ExtractedInfo, MetadataResolver, ResolveOptions, Resolved};
use crate::store::{KvStore, StoreKeys};

/// Collaborators shared by every playlist.
#[derive(Clone)]
pub struct PlaylistServices {
    pub store: Arc<dyn KvStore>,
    pub keys: StoreKeys,
    pub resolver: Arc<MetadataResolver>,
    pub scheduler: DownloadScheduler,
    pub play_counts: PlayCounter,
    pub prefetch: bool,
}

#[derive(Debug, Clone)]
pub enum PlaylistEvent {
    /// `position` is 1-based.
    EntryAdded { entry: Entry, position: usize },
    Shuffled,
    Cleared,
}

pub type PlaylistListener = Box<dyn Fn(&PlaylistEvent) + Send + Sync>;

/// What the player is doing right now, for wait estimates.
#[derive(Debug, Clone, Default)]
pub struct PlaybackStatus {
    pub entry: Option<Entry>,
    pub progress_secs: f64,
    pub stopped: bool,
}

/// Ordered queue of entries for one routing context, mirrored in the store
/// under `queue:<context_id>`.
pub struct Playlist {
    context_id: String,
    queue_key: String,
    // Held across store round trips so memory and store change together.
    entries: Mutex<VecDeque<Entry>>,
    services: PlaylistServices,
    listeners: RwLock<Vec<PlaylistListener>>,
}

impl Playlist {
    pub fn new(context_id: impl Into<String>, services: PlaylistServices) -> Self {
        let context_id = context_id.into();
        Self {
            queue_key: services.keys.queue(&context_id),
            context_id,
            entries: Mutex::new(VecDeque::new()),
            services,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Registers a callback run synchronously inside each mutation.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&PlaylistEvent) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Box::new(listener));
    }

    fn emit(&self, event: PlaylistEvent) {
        let listeners = self.listeners.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            listener(&event);
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn entries(&self) -> Vec<Entry> {
        self.entries.lock().await.iter().cloned().collect()
    }

    pub async fn peek(&self) -> Option<Entry> {
        self.entries.lock().await.front().cloned()
    }

    /// Appends at the tail. With `persist` unset (restore path) neither the
    /// store list nor the play count is touched. Returns the 1-based position.
    pub async fn append(&self, entry: Entry, persist: bool) -> Result<usize> {
        let position = {
            let mut entries = self.entries.lock().await;
            if persist {
                self.services
                    .store
                    .rpush(&self.queue_key, EntryRecord::from_entry(&entry).encode()?)
                    .await?;
            }
            entries.push_back(entry.clone());
            entries.len()
        };

        self.after_add(entry, position, persist).await;
        Ok(position)
    }

    pub async fn prepend_front(&self, entry: Entry, persist: bool) -> Result<()> {
        {
            let mut entries = self.entries.lock().await;
            if persist {
                self.services
                    .store
                    .lpush(&self.queue_key, EntryRecord::from_entry(&entry).encode()?)
                    .await?;
            }
            entries.push_front(entry.clone());
        }

        self.after_add(entry, 1, persist).await;
        Ok(())
    }

    async fn after_add(&self, entry: Entry, position: usize, persist: bool) {
        if persist {
            if let Err(e) = self.services.play_counts.record(entry.source_ref()).await {
                log::warn!("📊 [QUEUE] Failed to count play of {}: {}", entry.source_ref(), e);
            }
        }

        log::debug!("➕ [QUEUE] {} queued at position {} in {}", entry.title(), position, self.context_id);
        self.emit(PlaylistEvent::EntryAdded {
            entry: entry.clone(),
            position,
        });

        if position == 1 {
            self.services.scheduler.trigger(&entry);
        }
    }

    /// Removes the head; prefetches the new head when enabled.
    pub async fn pop_front(&self) -> Result<Option<Entry>> {
        self.pop(self.services.prefetch).await
    }

    async fn pop(&self, prefetch: bool) -> Result<Option<Entry>> {
        let (popped, next) = {
            let mut entries = self.entries.lock().await;
            if entries.is_empty() {
                return Ok(None);
            }
            self.services.store.lpop(&self.queue_key).await?;
            let popped = entries.pop_front();
            (popped, entries.front().cloned())
        };

        if prefetch {
            if let Some(next) = next {
                log::debug!("⏩ [QUEUE] Prefetching {}", next.source_ref());
                self.services.scheduler.trigger(&next);
            }
        }
        Ok(popped)
    }

    /// Pops the head and waits until it is playable. The new head's download is
    /// started before waiting.
    pub async fn next_entry(&self, prefetch: bool) -> Result<Option<Entry>> {
        let Some(entry) = self.pop(prefetch).await? else {
            return Ok(None);
        };

        let ready = self.services.scheduler.ready_signal(&entry).await?;
        Ok(Some(ready))
    }

    /// Shuffles in place and rewrites the stored list in one step. The same
    /// seed over the same order always gives the same result.
    pub async fn shuffle(&self, seed: Option<u64>) -> Result<()> {
        {
            let mut entries = self.entries.lock().await;
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let mut shuffled: Vec<Entry> = entries.iter().cloned().collect();
            shuffled.shuffle(&mut rng);

            self.services.store.replace_list(&self.queue_key, encode_all(&shuffled)?).await?;
            *entries = shuffled.into();
        }

        log::info!("🔀 [QUEUE] Shuffled {}", self.context_id);
        self.emit(PlaylistEvent::Shuffled);
        Ok(())
    }

    /// Empties the queue. `retain_last` (the entry still playing) stays in the
    /// store so a restart resumes it.
    pub async fn clear(&self, retain_last: Option<&Entry>) -> Result<()> {
        {
            let mut entries = self.entries.lock().await;
            match retain_last {
                Some(last) => {
                    self.services
                        .store
                        .replace_list(&self.queue_key, vec![EntryRecord::from_entry(last).encode()?])
                        .await?
                }
                None => self.services.store.delete(&self.queue_key).await?,
            }
            entries.clear();
        }

        log::info!("🧹 [QUEUE] Cleared {}", self.context_id);
        self.emit(PlaylistEvent::Cleared);
        Ok(())
    }

    /// Rough time until `position` (1-based) starts playing.
    pub async fn estimate_wait_until(&self, position: usize, playing: Option<&PlaybackStatus>) -> Duration {
        let queued: f64 = self
            .entries
            .lock()
            .await
            .iter()
            .take(position.saturating_sub(1))
            .map(Entry::duration_secs)
            .sum();

        let current = match playing {
            Some(PlaybackStatus {
                entry: Some(entry),
                progress_secs,
                stopped: false,
            }) => (entry.duration_secs() - progress_secs).max(0.0),
            _ => 0.0,
        };

        Duration::from_secs_f64((queued + current).max(0.0))
    }

    pub async fn count_for_context(&self, actor_id: &str) -> usize {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.context().actor_id.as_deref() == Some(actor_id))
            .count()
    }

    /// Resolves and queues a single item.
    pub async fn add_entry(&self, source_ref: &str, context: EntryContext) -> Result<(Entry, usize)> {
        let info = self.services.resolver.resolve_single(source_ref, ResolveOptions::single()).await?;
        let entry = self.entry_from_info(source_ref, &info, context);
        let position = self.append(entry.clone(), true).await?;
        Ok((entry, position))
    }

    /// Queues every member of a collection from one processed resolution.
    /// Returns the queued entries and the position of the first.
    pub async fn import_from(&self, collection_ref: &str, context: EntryContext) -> Result<(Vec<Entry>, usize)> {
        let position = self.len().await + 1;
        let collection = self.resolve_collection(collection_ref, ResolveOptions::collection()).await?;

        // Generic collections only know the direct media URL of their members.
        let use_direct_url = collection.extractor.as_deref() == Some("generic");

        let mut added = Vec::new();
        let mut bad_items = 0;
        for member in collection.entries.iter().flatten() {
            let Some(member) = member else {
                bad_items += 1;
                continue;
            };

            let member_ref = if use_direct_url { &member.url } else { &member.webpage_url };
            let Some(member_ref) = member_ref else {
                log::error!("❌ [QUEUE] Could not add item {:?}: no reference", member.id);
                bad_items += 1;
                continue;
            };

            let entry = self.entry_from_info(member_ref, member, context.clone());
            match self.append(entry.clone(), true).await {
                Ok(_) => added.push(entry),
                Err(e) => {
                    log::error!("❌ [QUEUE] Could not add item {}: {}", member_ref, e);
                    bad_items += 1;
                }
            }
        }

        if bad_items > 0 {
            log::info!("⏭️ [QUEUE] Skipped {} bad entries", bad_items);
        }
        Ok((added, position))
    }

    /// Lists a collection shallowly and adds each member through [`Self::add_entry`],
    /// so every item is validated on its own. Failed items are counted and skipped.
    pub async fn import_individually(&self, collection_ref: &str, context: EntryContext) -> Result<Vec<Entry>> {
        let collection = self.resolve_collection(collection_ref, ResolveOptions::shallow()).await?;

        let mut added = Vec::new();
        let mut bad_items = 0;
        for member in collection.entries.iter().flatten() {
            let Some(member_ref) = member.as_ref().and_then(|m| member_ref_for(&collection, m)) else {
                bad_items += 1;
                continue;
            };

            match self.add_entry(&member_ref, context.clone()).await {
                Ok((entry, _)) => added.push(entry),
                Err(AppError::ExtractionFailed(_)) => bad_items += 1,
                Err(e) => {
                    log::error!("❌ [QUEUE] There was an error adding the song {}: {}", member_ref, e);
                    bad_items += 1;
                }
            }
        }

        if bad_items > 0 {
            log::info!("⏭️ [QUEUE] Skipped {} bad entries", bad_items);
        }
        Ok(added)
    }

    async fn resolve_collection(&self, collection_ref: &str, options: ResolveOptions) -> Result<ExtractedInfo> {
        match self.services.resolver.resolve(collection_ref, options).await? {
            Resolved::Collection(info) => Ok(info),
            Resolved::Single(_) => Err(AppError::UnsupportedEntryType {
                message: "This is not a playlist.".to_string(),
                collection_ref: None,
            }),
        }
    }

    /// Rebuilds the queue from the store. Records are resolved concurrently but
    /// queued in stored order; unusable ones are dropped and the stored list is
    /// rewritten to match. Returns the number of restored entries.
    pub async fn load(&self) -> Result<usize> {
        let raw = self.services.store.lrange_all(&self.queue_key).await?;
        let stored = raw.len();

        let records: Vec<EntryRecord> = raw
            .iter()
            .filter_map(|bytes| {
                let record = EntryRecord::decode(bytes);
                if record.is_none() {
                    log::warn!("⚠️ [QUEUE] Dropping unreadable record in {}", self.context_id);
                }
                record
            })
            .collect();

        let resolutions = futures::future::join_all(
            records
                .iter()
                .map(|record| self.services.resolver.resolve_single(&record.source_ref, ResolveOptions::single())),
        )
        .await;

        let mut restored = Vec::new();
        for (record, resolution) in records.into_iter().zip(resolutions) {
            match resolution {
                Ok(info) => {
                    let entry = self.entry_from_info(&record.source_ref, &info, record.context());
                    self.append(entry, false).await?;
                    restored.push(record);
                }
                Err(e) => log::warn!("⚠️ [QUEUE] Dropping saved entry {}: {}", record.source_ref, e),
            }
        }

        let encoded = restored.iter().map(EntryRecord::encode).collect::<Result<Vec<_>>>()?;
        self.services.store.replace_list(&self.queue_key, encoded).await?;

        log::info!(
            "📂 [QUEUE] Restored {}/{} saved entries for {}",
            restored.len(),
            stored,
            self.context_id
        );
        Ok(restored.len())
    }

    fn entry_from_info(&self, source_ref: &str, info: &ExtractedInfo, context: EntryContext) -> Entry {
        Entry::from_info(source_ref, info, self.services.scheduler.download_dir(), context)
    }
}

fn encode_all(entries: &[Entry]) -> Result<Vec<Vec<u8>>> {
    entries.iter().map(|e| EntryRecord::from_entry(e).encode()).collect()
}

/// Reference for a shallow collection member: its own URL when absolute,
/// otherwise a watch URL built from the collection page and the member id.
fn member_ref_for(collection: &ExtractedInfo, member: &ExtractedInfo) -> Option<String> {
    if let Some(url) = member.url.as_deref().filter(|u| u.starts_with("http")) {
        return Some(url.to_string());
    }
    if let Some(url) = member.webpage_url.as_deref() {
        return Some(url.to_string());
    }

    let page = collection.webpage_url.as_deref()?;
    let (base, _) = page.split_once("playlist?list=")?;
    Some(format!("{}watch?v={}", base, member.id.as_deref()?))
}
