use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::errors::{AppError, Result};

const APP_DIR: &str = "queuebot";
const ENV_PREFIX: &str = "QUEUEBOT";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    pub download_dir: PathBuf,
    pub worker_threads: usize,
    pub prefetch: bool,
    pub cache_ttl_secs: u64,
    pub store: StoreConfig,
    pub extractor: ExtractorConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub namespace: String,
    pub redis_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractorConfig {
    pub ytdlp_path: String,
    pub format: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_connections: usize,
    pub proxy: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            download_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("./cache"))
                .join(APP_DIR)
                .join("audio_cache"),
            worker_threads: 4,
            prefetch: true,
            cache_ttl_secs: 60 * 60 * 24 * 7,
            store: StoreConfig::default(),
            extractor: ExtractorConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: "musicbot:".to_string(),
            redis_url: None,
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            format: "bestaudio/best".to_string(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_connections: 10,
            proxy: None,
        }
    }
}

impl QueueConfig {
    /// Loads the config from the default location, writing defaults on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            QueueConfig::default().save_to(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    /// Loads `path` (if present) layered under `QUEUEBOT__SECTION__KEY` env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()).format(config::FileFormat::Json).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: QueueConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(config_dir) = config_path.parent() {
            if !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(AppError::Config(config::ConfigError::Message(
                "worker_threads must be at least 1".to_string(),
            )));
        }
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config(config::ConfigError::Message("Could not find config directory".to_string())))?;

        Ok(config_dir.join(APP_DIR).join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = QueueConfig::default();
        assert_eq!(config.worker_threads, 4);
        assert!(config.prefetch);
        assert_eq!(config.cache_ttl_secs, 604_800);
        assert_eq!(config.store.namespace, "musicbot:");
        assert!(config.store.redis_url.is_none());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "worker_threads": 2, "store": { "namespace": "test:" } }"#).unwrap();

        let config = QueueConfig::load_from(&path).unwrap();
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.store.namespace, "test:");
        assert_eq!(config.extractor.ytdlp_path, "yt-dlp");
        assert_eq!(config.http.timeout_secs, 15);
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = QueueConfig::default();
        config.prefetch = false;
        config.download_dir = dir.path().join("audio");
        config.save_to(&path).unwrap();

        let loaded = QueueConfig::load_from(&path).unwrap();
        assert!(!loaded.prefetch);
        assert_eq!(loaded.download_dir, dir.path().join("audio"));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "worker_threads": 0 }"#).unwrap();

        assert!(matches!(QueueConfig::load_from(&path), Err(AppError::Config(_))));
    }
}
