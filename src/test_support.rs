//! Hand-written fakes shared by the unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;
use serde_json::Value;
use crate::downloader::{ExtractRequest, Extractor, RemoteProbe};
use crate::errors::{AppError, Result};
use crate::metadata::ExtractedInfo;

/// Extraction backend answering from canned JSON.
#[derive(Default)]
pub struct FakeExtractor {
    infos: HashMap<String, Value>,
    downloads: HashMap<String, (Value, Vec<u8>)>,
    download_dir: Option<PathBuf>,
    delay: Option<Duration>,
    info_calls: AtomicUsize,
    download_calls: AtomicUsize,
    requests: Mutex<Vec<(String, ExtractRequest)>>,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_info(mut self, source_ref: &str, info: Value) -> Self {
        self.infos.insert(source_ref.to_string(), info);
        self
    }

    /// Download answer. With [`Self::writing_into`], `bytes` land under the
    /// backend-chosen name: `_filename` from `info`, else `<extractor>-<id>.<ext>`.
    pub fn with_download(mut self, source_ref: &str, info: Value, bytes: Vec<u8>) -> Self {
        self.downloads.insert(source_ref.to_string(), (info, bytes));
        self
    }

    pub fn writing_into(mut self, dir: &Path) -> Self {
        self.download_dir = Some(dir.to_path_buf());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(String, ExtractRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

impl Extractor for FakeExtractor {
    fn extract(&self, source_ref: &str, request: &ExtractRequest) -> Result<Option<Value>> {
        self.requests.lock().unwrap().push((source_ref.to_string(), *request));
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        if !request.download {
            self.info_calls.fetch_add(1, Ordering::SeqCst);
            let mut value = self
                .infos
                .get(source_ref)
                .or_else(|| self.downloads.get(source_ref).map(|(info, _)| info))
                .cloned()
                .ok_or_else(|| AppError::ExtractionFailed(format!("no canned info for {}", source_ref)))?;

            if let Some(dir) = &self.download_dir {
                let info: ExtractedInfo = serde_json::from_value(value.clone())?;
                if request.process && !info.is_collection() {
                    let path = backend_path(dir, &info);
                    value["_filename"] = Value::String(path.to_string_lossy().to_string());
                }
            }
            return Ok(Some(value));
        }

        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let (value, bytes) = self
            .downloads
            .get(source_ref)
            .ok_or_else(|| AppError::ExtractionFailed(format!("no canned download for {}", source_ref)))?;

        let mut value = value.clone();
        if let Some(dir) = &self.download_dir {
            let info: ExtractedInfo = serde_json::from_value(value.clone())?;
            let path = backend_path(dir, &info);
            std::fs::write(&path, bytes)?;

            let reported = Value::String(path.to_string_lossy().to_string());
            value["_filename"] = reported.clone();
            value["requested_downloads"] = serde_json::json!([{ "filepath": reported }]);
        }
        Ok(Some(value))
    }

    fn get_name(&self) -> &str {
        "fake"
    }
}

/// Name the fake backend writes under. Deliberately not the restricted-charset
/// prediction, so callers must use what the backend reports.
fn backend_path(dir: &Path, info: &ExtractedInfo) -> PathBuf {
    match &info.filename {
        Some(_) => info.expected_path(dir),
        None => dir.join(format!(
            "{}-{}.{}",
            info.extractor_name(),
            info.id.as_deref().unwrap_or("NA"),
            info.ext.as_deref().unwrap_or("NA")
        )),
    }
}

/// Probe answering with fixed headers, or a fixed failure.
#[derive(Default)]
pub struct FakeProbe {
    headers: HashMap<String, String>,
    failure: Option<(bool, String)>,
}

impl FakeProbe {
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Every probe fails; retryable errors stay retryable.
    pub fn failing(mut self, error: AppError) -> Self {
        self.failure = Some((error.is_retryable(), error.to_string()));
        self
    }
}

#[async_trait]
impl RemoteProbe for FakeProbe {
    async fn header(&self, _url: &str, name: &str) -> Result<Option<String>> {
        match &self.failure {
            Some((true, message)) => Err(AppError::RetryableNetwork(message.clone())),
            Some((false, message)) => Err(AppError::Store(message.clone())),
            None => Ok(self.headers.get(name).cloned()),
        }
    }
}
