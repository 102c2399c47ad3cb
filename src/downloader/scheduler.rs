use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use crate::downloader::entry::{Entry, ReadySignal};
use crate::downloader::http_pool::RemoteProbe;
use crate::downloader::pool::WorkerPool;
use crate::downloader::{ExtractRequest, Extractor};
use crate::errors::{AppError, Result};
use crate::metadata::ExtractedInfo;
use crate::utils::{ensure_dir_exists, md5_fragment, split_extension};

/// Length of the content-hash fragment inserted into generic artifact names.
const HASH_FRAGMENT_LEN: usize = 8;

struct SchedulerInner {
    extractor: Arc<dyn Extractor>,
    pool: WorkerPool,
    probe: Arc<dyn RemoteProbe>,
    download_dir: PathBuf,
    fetches: AtomicU64,
}

/// Drives entry downloads: local-cache short-circuit, then a fetch on the
/// worker pool, with the outcome marshaled back as the entry's state transition.
#[derive(Clone)]
pub struct DownloadScheduler {
    inner: Arc<SchedulerInner>,
}

impl DownloadScheduler {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        pool: WorkerPool,
        probe: Arc<dyn RemoteProbe>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                extractor,
                pool,
                probe,
                download_dir: download_dir.into(),
                fetches: AtomicU64::new(0),
            }),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.inner.download_dir
    }

    /// Number of network fetches submitted to the pool so far.
    pub fn fetch_count(&self) -> u64 {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    /// Readiness signal for `entry`, starting its download if none is in flight.
    pub fn ready_signal(&self, entry: &Entry) -> ReadySignal {
        let (signal, start) = entry.subscribe();
        if start {
            self.spawn_download(entry.clone());
        }
        signal
    }

    /// Starts a background download unless one is running or the entry is ready.
    pub fn trigger(&self, entry: &Entry) {
        if entry.try_begin_download() {
            self.spawn_download(entry.clone());
        } else {
            log::debug!("⏭️ [DOWNLOAD] Not triggering {}: {:?}", entry.source_ref(), entry.download_state());
        }
    }

    /// Downloads `entry` in the calling task. Re-entrant calls while a download
    /// is in flight return immediately.
    pub async fn download(&self, entry: &Entry) {
        if !entry.try_begin_download() {
            log::debug!("⏭️ [DOWNLOAD] Already downloading or ready: {}", entry.source_ref());
            return;
        }
        self.run(entry.clone()).await;
    }

    fn spawn_download(&self, entry: Entry) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run(entry).await;
        });
    }

    async fn run(&self, entry: Entry) {
        let start_time = std::time::Instant::now();
        match self.fetch(&entry).await {
            Ok(path) => {
                log::info!(
                    "✅ [DOWNLOAD] Ready: {} -> {:?} (took {:.2} seconds)",
                    entry.source_ref(),
                    path,
                    start_time.elapsed().as_secs_f64()
                );
                entry.complete(Ok(path));
            }
            Err(e) => {
                log::error!("❌ [DOWNLOAD] Failed: {} - {}", entry.source_ref(), e);
                entry.complete(Err(e.to_string()));
            }
        }
    }

    async fn fetch(&self, entry: &Entry) -> Result<PathBuf> {
        ensure_dir_exists(self.download_dir()).await?;

        if let Some(local) = self.find_local(entry).await? {
            return Ok(local);
        }

        self.really_download(entry).await
    }

    /// Looks for an already-downloaded artifact matching the entry's expected name.
    async fn find_local(&self, entry: &Entry) -> Result<Option<PathBuf>> {
        let expected_name = match entry.expected_artifact_path().file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => return Ok(None),
        };
        let (expected_stem, _) = split_extension(&expected_name);
        let listing = list_dir(self.download_dir()).await?;

        if entry.is_generic() {
            // Generic artifacts carry a hash fragment: `<stem>-<hash>.<ext>`.
            let candidate = listing
                .iter()
                .find(|name| name.rsplit_once('-').map(|(stem, _)| stem) == Some(expected_stem));

            let Some(candidate) = candidate else {
                return Ok(None);
            };

            let local = self.download_dir().join(candidate);
            let local_size = tokio::fs::metadata(&local).await?.len();
            let remote_size = match self.inner.probe.content_length(entry.source_ref()).await {
                Ok(size) => size.unwrap_or(0),
                Err(e) => {
                    log::warn!("⚠️ [DOWNLOAD] Size probe failed for {}: {}", entry.source_ref(), e);
                    0
                }
            };

            log::debug!("🔍 [DOWNLOAD] Remote size: {} Local size: {}", remote_size, local_size);
            if remote_size == local_size {
                log::info!("💾 [DOWNLOAD] Cached: {}", entry.source_ref());
                return Ok(Some(local));
            }

            log::info!("♻️ [DOWNLOAD] Stale local copy of {}, fetching again", entry.source_ref());
            return Ok(None);
        }

        if listing.iter().any(|name| *name == expected_name) {
            log::info!("💾 [DOWNLOAD] Cached: {}", entry.source_ref());
            return Ok(Some(self.download_dir().join(&expected_name)));
        }

        if let Some(name) = listing.iter().find(|name| split_extension(name).0 == expected_stem) {
            log::info!("💾 [DOWNLOAD] Cached (different extension): {} as {}", entry.source_ref(), name);
            return Ok(Some(self.download_dir().join(name)));
        }

        Ok(None)
    }

    async fn really_download(&self, entry: &Entry) -> Result<PathBuf> {
        log::info!("⬇️ [DOWNLOAD] Started: {}", entry.source_ref());
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);

        let extractor = self.inner.extractor.clone();
        let source_ref = entry.source_ref().to_string();
        let value = self
            .inner
            .pool
            .run(move || extractor.extract(&source_ref, &ExtractRequest::download()))
            .await
            .map_err(|e| AppError::ExtractionFailed(e.to_string()))?
            .ok_or_else(|| AppError::ExtractionFailed(format!("Backend returned nothing for {}", entry.source_ref())))?;

        let info: ExtractedInfo = serde_json::from_value(value)?;
        let unhashed = info
            .downloaded_path(self.download_dir())
            .unwrap_or_else(|| entry.expected_artifact_path().to_path_buf());

        let exists = tokio::fs::metadata(&unhashed).await.map(|m| m.is_file()).unwrap_or(false);
        if !exists {
            return Err(AppError::DownloadFailed(format!(
                "No artifact at {:?} after downloading {}",
                unhashed,
                entry.source_ref()
            )));
        }
        log::info!("📥 [DOWNLOAD] Completed: {} -> {:?}", entry.source_ref(), unhashed);

        if !entry.is_generic() {
            return Ok(unhashed);
        }

        self.inner.pool.run(move || finalize_hashed(unhashed)).await
    }
}

/// Renames `<stem>.<ext>` to `<stem>-<hash>.<ext>`, discarding the fresh file
/// when the hashed name already exists. Blocking.
fn finalize_hashed(unhashed: PathBuf) -> Result<PathBuf> {
    let fragment = md5_fragment(&unhashed, HASH_FRAGMENT_LEN)?;
    let file_name = unhashed
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| AppError::DownloadFailed(format!("Artifact has no file name: {:?}", unhashed)))?;

    let hashed_name = match split_extension(&file_name) {
        (stem, Some(ext)) => format!("{}-{}.{}", stem, fragment, ext),
        (stem, None) => format!("{}-{}", stem, fragment),
    };
    let hashed = unhashed.with_file_name(hashed_name);

    if hashed.is_file() {
        std::fs::remove_file(&unhashed)?;
    } else {
        std::fs::rename(&unhashed, &hashed)?;
    }
    Ok(hashed)
}

async fn list_dir(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::entry::EntryContext;
    use crate::downloader::DownloadState;
    use crate::test_support::{FakeExtractor, FakeProbe};
    use serde_json::json;
    use std::time::Duration;

    fn scheduler(extractor: Arc<FakeExtractor>, probe: FakeProbe, dir: &Path) -> DownloadScheduler {
        DownloadScheduler::new(extractor, WorkerPool::new(4), Arc::new(probe), dir)
    }

    fn youtube_entry(dir: &Path) -> Entry {
        Entry::new(
            "https://youtube.com/watch?v=abc",
            "Song",
            200.0,
            "youtube",
            dir.join("youtube-abc-Song.m4a"),
            EntryContext::default(),
        )
    }

    fn generic_entry(dir: &Path) -> Entry {
        Entry::new(
            "https://files.example/song.mp3",
            "song",
            0.0,
            "generic",
            dir.join("generic-song-song.mp3"),
            EntryContext::default(),
        )
    }

    #[tokio::test]
    async fn exact_local_match_skips_fetch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("youtube-abc-Song.m4a"), b"audio").unwrap();
        let extractor = Arc::new(FakeExtractor::new());
        let scheduler = scheduler(extractor.clone(), FakeProbe::default(), dir.path());

        let entry = youtube_entry(dir.path());
        scheduler.download(&entry).await;

        assert_eq!(entry.download_state(), DownloadState::Ready);
        assert_eq!(entry.local_artifact_path(), Some(dir.path().join("youtube-abc-Song.m4a")));
        assert_eq!(extractor.download_calls(), 0);
        assert_eq!(scheduler.fetch_count(), 0);
    }

    #[tokio::test]
    async fn different_extension_counts_as_cached() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("youtube-abc-Song.webm"), b"audio").unwrap();
        let extractor = Arc::new(FakeExtractor::new());
        let scheduler = scheduler(extractor.clone(), FakeProbe::default(), dir.path());

        let entry = youtube_entry(dir.path());
        scheduler.download(&entry).await;

        assert_eq!(entry.local_artifact_path(), Some(dir.path().join("youtube-abc-Song.webm")));
        assert_eq!(extractor.download_calls(), 0);
    }

    #[tokio::test]
    async fn generic_local_copy_with_matching_size_is_used() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("generic-song-song-1017c592.mp3"), b"hello").unwrap();
        let extractor = Arc::new(FakeExtractor::new());
        let probe = FakeProbe::default().with_header("content-length", "5");
        let scheduler = scheduler(extractor.clone(), probe, dir.path());

        let entry = generic_entry(dir.path());
        scheduler.download(&entry).await;

        assert_eq!(entry.download_state(), DownloadState::Ready);
        assert_eq!(entry.local_artifact_path(), Some(dir.path().join("generic-song-song-1017c592.mp3")));
        assert_eq!(extractor.download_calls(), 0);
    }

    #[tokio::test]
    async fn generic_stale_copy_is_refetched_and_hashed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("generic-song-song-00000000.mp3"), b"old").unwrap();
        let extractor = Arc::new(FakeExtractor::new().writing_into(dir.path()).with_download(
            "https://files.example/song.mp3",
            json!({ "id": "song", "title": "song", "extractor": "generic", "ext": "mp3", "_filename": "generic-song-song.mp3" }),
            b"hello".to_vec(),
        ));
        let probe = FakeProbe::default().with_header("content-length", "999");
        let scheduler = scheduler(extractor.clone(), probe, dir.path());

        let entry = generic_entry(dir.path());
        scheduler.download(&entry).await;

        let expected = dir.path().join("generic-song-song-1017c592.mp3");
        assert_eq!(entry.local_artifact_path(), Some(expected.clone()));
        assert!(expected.is_file());
        assert!(!dir.path().join("generic-song-song.mp3").exists());
        assert_eq!(extractor.download_calls(), 1);
    }

    #[test]
    fn existing_hashed_file_wins_over_fresh_download() {
        let dir = tempfile::tempdir().unwrap();
        let unhashed = dir.path().join("generic-a-a.mp3");
        let hashed = dir.path().join("generic-a-a-1017c592.mp3");
        std::fs::write(&unhashed, b"hello").unwrap();
        std::fs::write(&hashed, b"hello").unwrap();

        assert_eq!(finalize_hashed(unhashed.clone()).unwrap(), hashed);
        assert!(!unhashed.exists());
        assert!(hashed.exists());
    }

    #[tokio::test]
    async fn fetch_failure_marks_failed_and_notifies_waiters() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = Arc::new(FakeExtractor::new());
        let scheduler = scheduler(extractor.clone(), FakeProbe::default(), dir.path());

        let entry = youtube_entry(dir.path());
        let signal = scheduler.ready_signal(&entry);

        assert!(matches!(signal.await, Err(AppError::DownloadFailed(_))));
        assert_eq!(entry.download_state(), DownloadState::Failed);
        assert_eq!(extractor.download_calls(), 1);
    }

    #[tokio::test]
    async fn ready_path_is_the_file_the_backend_wrote() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = Arc::new(FakeExtractor::new().writing_into(dir.path()).with_download(
            "https://youtube.com/watch?v=abc",
            json!({ "id": "abc", "title": "Song (Official Video)", "extractor": "youtube", "ext": "m4a" }),
            b"audio".to_vec(),
        ));
        let scheduler = scheduler(extractor.clone(), FakeProbe::default(), dir.path());
        let entry = Entry::new(
            "https://youtube.com/watch?v=abc",
            "Song (Official Video)",
            200.0,
            "youtube",
            dir.path().join("youtube-abc-Song (Official Video).m4a"),
            EntryContext::default(),
        );

        let ready = scheduler.ready_signal(&entry).await.unwrap();

        let path = ready.local_artifact_path().unwrap();
        assert_eq!(path, dir.path().join("youtube-abc.m4a"));
        assert!(path.is_file());
        assert_eq!(ready.download_state(), DownloadState::Ready);
    }

    #[tokio::test]
    async fn missing_artifact_after_download_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ghost = dir.path().join("ghost.m4a");
        let extractor = Arc::new(FakeExtractor::new().with_download(
            "https://youtube.com/watch?v=abc",
            json!({ "id": "abc", "title": "Song", "extractor": "youtube", "ext": "m4a", "_filename": ghost }),
            b"audio".to_vec(),
        ));
        let scheduler = scheduler(extractor.clone(), FakeProbe::default(), dir.path());

        let entry = youtube_entry(dir.path());
        let outcome = scheduler.ready_signal(&entry).await;

        assert!(matches!(outcome, Err(AppError::DownloadFailed(_))));
        assert_eq!(entry.download_state(), DownloadState::Failed);
        assert_eq!(entry.local_artifact_path(), None);
        assert_eq!(extractor.download_calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_signals_share_one_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = Arc::new(
            FakeExtractor::new()
                .writing_into(dir.path())
                .with_delay(Duration::from_millis(50))
                .with_download(
                    "https://youtube.com/watch?v=abc",
                    json!({ "id": "abc", "title": "Song", "extractor": "youtube", "ext": "m4a" }),
                    b"audio".to_vec(),
                ),
        );
        let scheduler = scheduler(extractor.clone(), FakeProbe::default(), dir.path());
        let entry = youtube_entry(dir.path());

        let first = scheduler.ready_signal(&entry);
        let second = scheduler.ready_signal(&entry);
        scheduler.trigger(&entry);
        scheduler.download(&entry).await;

        let (a, b) = tokio::join!(first.wait(), second.wait());
        assert_eq!(a.unwrap(), entry);
        assert_eq!(b.unwrap(), entry);
        assert_eq!(extractor.download_calls(), 1);
        assert_eq!(entry.download_state(), DownloadState::Ready);
    }
}
