use std::path::PathBuf;
use std::process::{Command, Stdio};
use serde_json::Value;
use crate::config::ExtractorConfig;
use crate::downloader::{ExtractMode, ExtractRequest, Extractor};
use crate::errors::{AppError, Result};

/// Output template; [`crate::metadata::ExtractedInfo::artifact_path`] predicts
/// the same shape when the backend reports no `_filename`.
const OUTPUT_TEMPLATE: &str = "%(extractor)s-%(id)s-%(title)s.%(ext)s";

/// yt-dlp subprocess backend
pub struct YtDlpExtractor {
    ytdlp_path: String,
    format: String,
    download_dir: PathBuf,
}

impl YtDlpExtractor {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            format: "bestaudio/best".to_string(),
            download_dir: download_dir.into(),
        }
    }

    pub fn from_config(config: &ExtractorConfig, download_dir: impl Into<PathBuf>) -> Self {
        Self::new(download_dir)
            .with_ytdlp_path(config.ytdlp_path.clone())
            .with_format(config.format.clone())
    }

    pub fn with_ytdlp_path(mut self, path: String) -> Self {
        self.ytdlp_path = path;
        self
    }

    pub fn with_format(mut self, format: String) -> Self {
        self.format = format;
        self
    }

    fn build_args(&self, source_ref: &str, request: &ExtractRequest) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--dump-single-json".into(),
            "--no-warnings".into(),
            "--no-progress".into(),
            "--default-search".into(),
            "auto".into(),
        ];

        if !request.process {
            args.push("--flat-playlist".into());
        }

        if request.mode == ExtractMode::Lenient {
            args.push("--ignore-errors".into());
        }

        // Processed lookups report `_filename` for the same naming a download uses.
        if request.process || request.download {
            let template = self.download_dir.join(OUTPUT_TEMPLATE);
            args.extend([
                "--restrict-filenames".into(),
                "--format".into(),
                self.format.clone(),
                "--output".into(),
                template.to_string_lossy().to_string(),
            ]);
        }

        if request.download {
            args.extend(["--no-simulate".into(), "--no-playlist".into()]);
        }

        args.push("--".into());
        args.push(source_ref.to_string());
        args
    }
}

impl Extractor for YtDlpExtractor {
    fn extract(&self, source_ref: &str, request: &ExtractRequest) -> Result<Option<Value>> {
        let args = self.build_args(source_ref, request);
        log::info!("🚀 [EXTRACT] Running {} {}", self.ytdlp_path, args.join(" "));

        let output = Command::new(&self.ytdlp_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?
            .wait_with_output()?;

        log::debug!("📊 [EXTRACT] yt-dlp exit status: {}", output.status);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            // With --ignore-errors a partial playlist still prints its JSON.
            if request.mode == ExtractMode::Strict || stdout.trim().is_empty() {
                log::error!("❌ [EXTRACT] yt-dlp failed for {}: {}", source_ref, stderr.trim());
                return Err(AppError::ExtractionFailed(format!("yt-dlp failed: {}", stderr.trim())));
            }
            log::warn!("⚠️ [EXTRACT] yt-dlp reported errors for {}: {}", source_ref, stderr.trim());
        }

        parse_output(&stdout)
    }

    fn get_name(&self) -> &str {
        "yt-dlp"
    }
}

/// Last non-empty JSON line wins; earlier lines are progress noise.
fn parse_output(stdout: &str) -> Result<Option<Value>> {
    let Some(line) = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty()) else {
        return Ok(None);
    };

    match serde_json::from_str::<Value>(line)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}
