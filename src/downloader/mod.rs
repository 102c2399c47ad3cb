pub mod cache;
pub mod entry;
pub mod http_pool;
pub mod pool;
pub mod scheduler;
pub mod ytdlp_rust;

pub use cache::MetadataCache;
pub use entry::{Entry, EntryContext, ReadySignal};
pub use http_pool::{HttpPool, RemoteProbe};
pub use pool::WorkerPool;
pub use scheduler::DownloadScheduler;
pub use ytdlp_rust::YtDlpExtractor;

use serde::{Deserialize, Serialize};
use crate::errors::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DownloadState {
    Pending,
    Downloading,
    Ready,
    Failed,
}

/// How forgiving the backend should be about unavailable items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// Backend errors surface to the caller.
    Strict,
    /// Broken members of a collection are skipped by the backend.
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractRequest {
    pub download: bool,
    pub process: bool,
    pub mode: ExtractMode,
}

impl ExtractRequest {
    pub fn download() -> Self {
        Self {
            download: true,
            process: true,
            mode: ExtractMode::Lenient,
        }
    }
}

/// The metadata-extraction backend.
///
/// Calls are blocking (subprocesses, synchronous API clients) and are only ever
/// made from the [`WorkerPool`]. `Ok(None)` means the backend produced nothing usable.
/// With `download` set, the returned info describes the artifact written under the
/// backend's download directory.
pub trait Extractor: Send + Sync {
    fn extract(&self, source_ref: &str, request: &ExtractRequest) -> Result<Option<serde_json::Value>>;

    fn get_name(&self) -> &str;
}
