use std::sync::Arc;
use serde_json::Value;
use crate::downloader::{ExtractMode, ExtractRequest, Extractor, MetadataCache, RemoteProbe, WorkerPool};
use crate::errors::{AppError, Result};
use crate::metadata::{ExtractedInfo, Resolved};
use crate::utils::normalize_source_ref;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// The caller intends to download now; cached metadata is never served.
    pub fetch_artifact: bool,
    pub fully_process: bool,
    pub mode: ExtractMode,
}

impl ResolveOptions {
    /// Single-item add: processed, strict.
    pub fn single() -> Self {
        Self {
            fetch_artifact: false,
            fully_process: true,
            mode: ExtractMode::Strict,
        }
    }

    /// Whole-collection import: processed, broken members skipped.
    pub fn collection() -> Self {
        Self {
            fetch_artifact: false,
            fully_process: true,
            mode: ExtractMode::Lenient,
        }
    }

    /// Member listing only, no per-item processing.
    pub fn shallow() -> Self {
        Self {
            fetch_artifact: false,
            fully_process: false,
            mode: ExtractMode::Lenient,
        }
    }

    pub fn with_fetch_artifact(mut self) -> Self {
        self.fetch_artifact = true;
        self
    }
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self::single()
    }
}

/// Translates source references into validated metadata, backed by the
/// metadata cache and the extraction backend.
pub struct MetadataResolver {
    extractor: Arc<dyn Extractor>,
    pool: WorkerPool,
    cache: MetadataCache,
    probe: Arc<dyn RemoteProbe>,
}

impl MetadataResolver {
    pub fn new(extractor: Arc<dyn Extractor>, pool: WorkerPool, cache: MetadataCache, probe: Arc<dyn RemoteProbe>) -> Self {
        Self {
            extractor,
            pool,
            cache,
            probe,
        }
    }

    pub async fn resolve(&self, source_ref: &str, options: ResolveOptions) -> Result<Resolved> {
        let source_ref = normalize_source_ref(source_ref);

        if !options.fetch_artifact {
            if let Some(cached) = self.cache.get(&source_ref, options.fully_process).await {
                log::debug!("💾 [RESOLVE] Cache hit: {}", source_ref);
                return Ok(Resolved::from_info(serde_json::from_value(cached)?));
            }
        }

        log::info!("🔍 [RESOLVE] Asking {} about {}", self.extractor.get_name(), source_ref);
        let value = self.extract(&source_ref, &options).await?;
        let info: ExtractedInfo = serde_json::from_value(value.clone())?;

        self.cache.put_detached(source_ref, options.fully_process, value);
        Ok(Resolved::from_info(info))
    }

    /// Resolves a reference that must be a single playable item.
    pub async fn resolve_single(&self, source_ref: &str, options: ResolveOptions) -> Result<ExtractedInfo> {
        let info = match self.resolve(source_ref, options).await? {
            Resolved::Single(info) => info,
            Resolved::Collection(info) => {
                return Err(AppError::UnsupportedEntryType {
                    message: "This is a playlist.".to_string(),
                    collection_ref: info.canonical_ref(),
                });
            }
        };

        if info.is_generic() {
            self.check_content_type(source_ref, &info).await?;
        }

        Ok(info)
    }

    async fn check_content_type(&self, source_ref: &str, info: &ExtractedInfo) -> Result<()> {
        let target = info.url.clone().unwrap_or_else(|| normalize_source_ref(source_ref));

        match self.probe.header(&target, "content-type").await {
            Ok(content_type) => validate_content_type(content_type.as_deref(), &target),
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                log::warn!("⚠️ [RESOLVE] Failed to get content type for {}: {}", target, e);
                Ok(())
            }
        }
    }

    async fn extract(&self, source_ref: &str, options: &ResolveOptions) -> Result<Value> {
        let request = ExtractRequest {
            download: false,
            process: options.fully_process,
            mode: options.mode,
        };
        let extractor = self.extractor.clone();
        let job_ref = source_ref.to_string();

        let value = self
            .pool
            .run(move || extractor.extract(&job_ref, &request))
            .await
            .map_err(|e| match e {
                AppError::ExtractionFailed(_) => e,
                other => AppError::ExtractionFailed(other.to_string()),
            })?;

        value.ok_or_else(|| AppError::ExtractionFailed(format!("Could not extract information from {}", source_ref)))
    }
}

/// Checks a declared content type for a generic-extractor result.
pub fn validate_content_type(content_type: Option<&str>, target: &str) -> Result<()> {
    let Some(content_type) = content_type else {
        log::warn!("⚠️ [RESOLVE] No content type declared for {}", target);
        return Ok(());
    };
    let lowered = content_type.to_ascii_lowercase();

    if (lowered.starts_with("application/") && !lowered.contains("/ogg")) || lowered.starts_with("image/") {
        return Err(AppError::ContentRejected(format!(
            "Invalid content type \"{}\" for url {}",
            content_type, target
        )));
    }

    if !lowered.starts_with("audio/") && !lowered.starts_with("video/") {
        log::warn!("⚠️ [RESOLVE] Questionable content type \"{}\" for url {}", content_type, target);
    }

    Ok(())
}
