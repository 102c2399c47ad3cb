use std::collections::HashMap;
use std::future::IntoFuture;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use crate::downloader::DownloadState;
use crate::errors::{AppError, Result};
use crate::metadata::ExtractedInfo;

/// Caller-supplied metadata carried through the queue untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryContext {
    pub actor_id: Option<String>,
    pub channel_id: Option<String>,
    pub seek_offset_seconds: f64,
    /// In-memory only, never persisted.
    pub extra: HashMap<String, String>,
}

impl EntryContext {
    pub fn new(actor_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            channel_id: Some(channel_id.into()),
            ..Self::default()
        }
    }

    pub fn with_seek(mut self, seconds: f64) -> Self {
        self.seek_offset_seconds = seconds;
        self
    }
}

type WaiterResult = std::result::Result<Entry, String>;

struct DownloadSlot {
    state: DownloadState,
    local_artifact_path: Option<PathBuf>,
    waiters: Vec<oneshot::Sender<WaiterResult>>,
}

struct EntryInner {
    id: uuid::Uuid,
    source_ref: String,
    title: String,
    duration_secs: f64,
    extractor: String,
    expected_artifact_path: PathBuf,
    context: EntryContext,
    created_at: chrono::DateTime<chrono::Utc>,
    slot: Mutex<DownloadSlot>,
}

/// One queued media item. Cloning shares the item; equality and hashing are by
/// identity, so two requests for the same reference stay distinct.
#[derive(Clone)]
pub struct Entry {
    inner: Arc<EntryInner>,
}

impl Entry {
    pub fn new(
        source_ref: impl Into<String>,
        title: impl Into<String>,
        duration_secs: f64,
        extractor: impl Into<String>,
        expected_artifact_path: PathBuf,
        context: EntryContext,
    ) -> Self {
        Self {
            inner: Arc::new(EntryInner {
                id: uuid::Uuid::new_v4(),
                source_ref: source_ref.into(),
                title: title.into(),
                duration_secs,
                extractor: extractor.into(),
                expected_artifact_path,
                context,
                created_at: chrono::Utc::now(),
                slot: Mutex::new(DownloadSlot {
                    state: DownloadState::Pending,
                    local_artifact_path: None,
                    waiters: Vec::new(),
                }),
            }),
        }
    }

    pub fn from_info(source_ref: impl Into<String>, info: &ExtractedInfo, download_dir: &Path, context: EntryContext) -> Self {
        Self::new(
            source_ref,
            info.title_or_default(),
            info.duration_or_default(),
            info.extractor_name(),
            info.expected_path(download_dir),
            context,
        )
    }

    pub fn id(&self) -> uuid::Uuid {
        self.inner.id
    }

    pub fn source_ref(&self) -> &str {
        &self.inner.source_ref
    }

    pub fn title(&self) -> &str {
        &self.inner.title
    }

    pub fn duration_secs(&self) -> f64 {
        self.inner.duration_secs
    }

    pub fn extractor(&self) -> &str {
        &self.inner.extractor
    }

    /// Only the `generic` extractor needs the size check and hashed names on download.
    /// This is narrower than [`ExtractedInfo::is_generic`], which also counts
    /// `Dropbox` for content-type validation: Dropbox ids are stable, so its
    /// artifact names never collide and need no hash fragment.
    pub fn is_generic(&self) -> bool {
        self.inner.extractor == "generic"
    }

    pub fn expected_artifact_path(&self) -> &Path {
        &self.inner.expected_artifact_path
    }

    pub fn context(&self) -> &EntryContext {
        &self.inner.context
    }

    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.inner.created_at
    }

    pub fn download_state(&self) -> DownloadState {
        self.slot().state
    }

    pub fn local_artifact_path(&self) -> Option<PathBuf> {
        self.slot().local_artifact_path.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.download_state() == DownloadState::Ready
    }

    pub fn waiter_count(&self) -> usize {
        self.slot().waiters.iter().filter(|w| !w.is_closed()).count()
    }

    fn slot(&self) -> MutexGuard<'_, DownloadSlot> {
        // Nothing panics while holding the lock; recover rather than propagate poison.
        self.inner.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a waiter. The flag is true when the caller must start the
    /// download (test-and-set on the in-flight state).
    pub(crate) fn subscribe(&self) -> (ReadySignal, bool) {
        let mut slot = self.slot();

        if slot.state == DownloadState::Ready {
            return (ReadySignal::ready(self.clone()), false);
        }

        let (tx, rx) = oneshot::channel();
        slot.waiters.retain(|w| !w.is_closed());
        slot.waiters.push(tx);

        let start = slot.state != DownloadState::Downloading;
        if start {
            slot.state = DownloadState::Downloading;
        }

        (ReadySignal::waiting(self.source_ref().to_string(), rx), start)
    }

    /// Test-and-set for starting a download without registering a waiter.
    pub(crate) fn try_begin_download(&self) -> bool {
        let mut slot = self.slot();
        match slot.state {
            DownloadState::Pending | DownloadState::Failed => {
                slot.state = DownloadState::Downloading;
                true
            }
            DownloadState::Downloading | DownloadState::Ready => false,
        }
    }

    /// Records the outcome of the in-flight attempt and notifies waiters in
    /// registration order. The waiter list is taken before any notification.
    pub(crate) fn complete(&self, outcome: std::result::Result<PathBuf, String>) {
        let waiters = {
            let mut slot = self.slot();
            match &outcome {
                Ok(path) => {
                    slot.state = DownloadState::Ready;
                    slot.local_artifact_path = Some(path.clone());
                }
                Err(_) => {
                    slot.state = DownloadState::Failed;
                    slot.local_artifact_path = None;
                }
            }
            std::mem::take(&mut slot.waiters)
        };

        for waiter in waiters {
            if waiter.is_closed() {
                continue;
            }
            let message = match &outcome {
                Ok(_) => Ok(self.clone()),
                Err(reason) => Err(reason.clone()),
            };
            // Receiver may have gone away between the check and the send.
            let _ = waiter.send(message);
        }
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Entry {}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.inner.id)
            .field("source_ref", &self.inner.source_ref)
            .field("title", &self.inner.title)
            .field("duration_secs", &self.inner.duration_secs)
            .field("state", &self.download_state())
            .finish()
    }
}

enum SignalState {
    Ready(Entry),
    Waiting {
        source_ref: String,
        rx: oneshot::Receiver<WaiterResult>,
    },
}

/// Resolves once the entry's artifact is available or the attempt failed.
/// Dropping the signal withdraws interest without touching the download.
pub struct ReadySignal {
    state: SignalState,
}

impl ReadySignal {
    fn ready(entry: Entry) -> Self {
        Self { state: SignalState::Ready(entry) }
    }

    fn waiting(source_ref: String, rx: oneshot::Receiver<WaiterResult>) -> Self {
        Self { state: SignalState::Waiting { source_ref, rx } }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, SignalState::Ready(_))
    }

    pub async fn wait(self) -> Result<Entry> {
        match self.state {
            SignalState::Ready(entry) => Ok(entry),
            SignalState::Waiting { source_ref, rx } => match rx.await {
                Ok(Ok(entry)) => Ok(entry),
                Ok(Err(reason)) => Err(AppError::DownloadFailed(format!("{}: {}", source_ref, reason))),
                Err(_) => Err(AppError::DownloadFailed(format!("{}: download abandoned", source_ref))),
            },
        }
    }
}

impl IntoFuture for ReadySignal {
    type Output = Result<Entry>;
    type IntoFuture = BoxFuture<'static, Result<Entry>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn entry(source_ref: &str) -> Entry {
        Entry::new(source_ref, "Song", 120.0, "youtube", PathBuf::from("cache/youtube-a-Song.m4a"), EntryContext::default())
    }

    #[test]
    fn identity_not_value_equality() {
        let a = entry("https://x/a");
        let b = entry("https://x/a");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());

        let set: HashSet<Entry> = [a.clone(), b.clone(), a.clone()].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn only_first_subscriber_starts_download() {
        let a = entry("https://x/a");
        let (first, start_first) = a.subscribe();
        let (second, start_second) = a.subscribe();
        assert!(start_first);
        assert!(!start_second);
        assert!(!a.try_begin_download());
        assert_eq!(a.waiter_count(), 2);

        a.complete(Ok(PathBuf::from("cache/youtube-a-Song.m4a")));

        assert_eq!(first.await.unwrap(), a);
        assert_eq!(second.await.unwrap(), a);
        assert_eq!(a.download_state(), DownloadState::Ready);
        assert_eq!(a.waiter_count(), 0);
    }

    #[tokio::test]
    async fn ready_entry_resolves_immediately() {
        let a = entry("https://x/a");
        assert!(a.try_begin_download());
        a.complete(Ok(PathBuf::from("f.m4a")));

        let (signal, start) = a.subscribe();
        assert!(!start);
        assert!(signal.is_resolved());
        assert_eq!(signal.await.unwrap().local_artifact_path(), Some(PathBuf::from("f.m4a")));
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter_and_allows_retry() {
        let a = entry("https://x/a");
        let (first, _) = a.subscribe();
        let (second, _) = a.subscribe();
        a.complete(Err("boom".to_string()));

        assert!(matches!(first.await, Err(AppError::DownloadFailed(msg)) if msg.contains("boom")));
        assert!(matches!(second.await, Err(AppError::DownloadFailed(_))));
        assert_eq!(a.download_state(), DownloadState::Failed);

        let (_retry, start) = a.subscribe();
        assert!(start);
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_affect_others() {
        let a = entry("https://x/a");
        let (abandoned, _) = a.subscribe();
        let (kept, _) = a.subscribe();
        drop(abandoned);
        assert_eq!(a.waiter_count(), 1);

        a.complete(Ok(PathBuf::from("f.m4a")));
        assert!(kept.await.is_ok());
    }

    #[test]
    fn dropbox_is_generic_for_validation_only() {
        let info: ExtractedInfo = serde_json::from_value(serde_json::json!({
            "id": "abc", "title": "mix", "extractor": "Dropbox", "ext": "mp3", "_filename": "Dropbox-abc-mix.mp3",
        }))
        .unwrap();
        let dropbox = Entry::from_info("https://dropbox.com/s/abc/mix.mp3", &info, Path::new("cache"), EntryContext::default());

        assert!(info.is_generic());
        assert!(!dropbox.is_generic());
        assert_eq!(dropbox.expected_artifact_path(), Path::new("cache/Dropbox-abc-mix.mp3"));
    }
}
