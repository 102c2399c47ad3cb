pub mod resolver;

pub use resolver::{MetadataResolver, ResolveOptions};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::utils::sanitize_filename;

/// Extractors whose results carry no site-specific knowledge about the media.
pub const GENERIC_EXTRACTORS: [&str; 2] = ["generic", "Dropbox"];

/// Media information as reported by the extraction backend. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedInfo {
    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub extractor: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<Option<ExtractedInfo>>>,
    /// Filename the backend will write (or wrote) for this item.
    #[serde(rename = "_filename", default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_downloads: Option<Vec<RequestedDownload>>,
}

/// One finished download as reported by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestedDownload {
    #[serde(default)]
    pub filepath: Option<String>,
}

impl ExtractedInfo {
    pub fn is_collection(&self) -> bool {
        self.kind.as_deref() == Some("playlist") || self.entries.is_some()
    }

    pub fn extractor_name(&self) -> &str {
        self.extractor.as_deref().unwrap_or("generic")
    }

    pub fn is_generic(&self) -> bool {
        GENERIC_EXTRACTORS.contains(&self.extractor_name())
    }

    pub fn title_or_default(&self) -> String {
        self.title.clone().filter(|t| !t.is_empty()).unwrap_or_else(|| "Untitled".to_string())
    }

    pub fn duration_or_default(&self) -> f64 {
        self.duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0)
    }

    /// The reference to hand back to callers: the page URL when known.
    pub fn canonical_ref(&self) -> Option<String> {
        self.webpage_url.clone().or_else(|| self.url.clone())
    }

    /// Where the artifact is expected to land: the backend's own filename when
    /// it reported one, otherwise [`Self::artifact_path`].
    pub fn expected_path(&self, download_dir: &Path) -> PathBuf {
        self.filename
            .as_deref()
            .filter(|f| !f.is_empty())
            .map(|f| backend_path(download_dir, f))
            .unwrap_or_else(|| self.artifact_path(download_dir))
    }

    /// Path of the file a download actually produced, if the backend said so.
    pub fn downloaded_path(&self, download_dir: &Path) -> Option<PathBuf> {
        self.requested_downloads
            .as_ref()
            .and_then(|downloads| downloads.iter().find_map(|d| d.filepath.clone()))
            .or_else(|| self.filename.clone())
            .filter(|f| !f.is_empty())
            .map(|f| backend_path(download_dir, &f))
    }

    /// `<extractor>-<id>-<title>.<ext>` inside `download_dir`, restricted charset.
    /// Fallback prediction for when the backend reports no filename.
    pub fn artifact_path(&self, download_dir: &Path) -> PathBuf {
        let name = format!(
            "{}-{}-{}.{}",
            sanitize_filename(self.extractor_name()),
            sanitize_filename(self.id.as_deref().unwrap_or("NA")),
            sanitize_filename(&self.title_or_default()),
            self.ext.as_deref().unwrap_or("NA"),
        );
        download_dir.join(name)
    }
}

/// Backend paths are relative to the working directory, since the output
/// template already carries the download dir. Bare names sit in `download_dir`.
fn backend_path(download_dir: &Path, reported: &str) -> PathBuf {
    let path = PathBuf::from(reported);
    if path.is_absolute() || path.components().count() > 1 {
        path
    } else {
        download_dir.join(path)
    }
}

/// Outcome of resolving a reference.
#[derive(Debug, Clone)]
pub enum Resolved {
    Single(ExtractedInfo),
    Collection(ExtractedInfo),
}

impl Resolved {
    pub fn from_info(info: ExtractedInfo) -> Self {
        if info.is_collection() {
            Resolved::Collection(info)
        } else {
            Resolved::Single(info)
        }
    }

    pub fn info(&self) -> &ExtractedInfo {
        match self {
            Resolved::Single(info) | Resolved::Collection(info) => info,
        }
    }
}
