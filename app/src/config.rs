use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const APP_DIR: &str = ".picz_gallery";
const ENV_PREFIX: &str = "PICZ_GALLERY";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    pub log_level: String,
    pub api_url: String,
    pub api_key: String,
    pub storage_bucket: String,
    pub upload_concurrency: usize,
    pub feed_debounce_ms: u64,
    pub probe_timeout_secs: u64,
    /// 0 keeps every image for the lifetime of the session.
    pub image_cache_capacity: usize,
    pub cache_path: PathBuf,
}

#[derive(Debug, Default)]
pub struct AppConfigOverrides {
    pub log_level: Option<String>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub storage_bucket: Option<String>,
    pub upload_concurrency: Option<usize>,
    pub feed_debounce_ms: Option<u64>,
}

fn app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub fn default_config_path() -> PathBuf {
    app_dir().join("config")
}

impl AppConfig {
    /// Read `path` (default `~/.picz_gallery/config`, optional) and
    /// `PICZ_GALLERY_*` environment variables, falling back to defaults.
    pub fn load_from(path: Option<PathBuf>) -> Self {
        let path = path.unwrap_or_else(default_config_path);
        let cfg = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .unwrap_or_default();

        let log_level = cfg
            .get_string("log_level")
            .unwrap_or_else(|_| "info".to_string());
        let api_url = cfg
            .get_string("api_url")
            .unwrap_or_else(|_| "http://localhost:54321".to_string());
        let api_key = cfg.get_string("api_key").unwrap_or_default();
        let storage_bucket = cfg
            .get_string("storage_bucket")
            .unwrap_or_else(|_| "event-photos".to_string());
        let upload_concurrency = cfg.get_int("upload_concurrency").unwrap_or(2).max(1) as usize;
        let feed_debounce_ms = cfg.get_int("feed_debounce_ms").unwrap_or(250).max(0) as u64;
        let probe_timeout_secs = cfg.get_int("probe_timeout_secs").unwrap_or(3).max(1) as u64;
        let image_cache_capacity = cfg.get_int("image_cache_capacity").unwrap_or(0).max(0) as usize;
        let cache_path = cfg
            .get_string("cache_path")
            .map(PathBuf::from)
            .unwrap_or_else(|_| app_dir());

        Self {
            log_level,
            api_url,
            api_key,
            storage_bucket,
            upload_concurrency,
            feed_debounce_ms,
            probe_timeout_secs,
            image_cache_capacity,
            cache_path,
        }
    }

    pub fn apply_overrides(mut self, ov: &AppConfigOverrides) -> Self {
        if let Some(l) = &ov.log_level {
            self.log_level = l.clone();
        }
        if let Some(u) = &ov.api_url {
            self.api_url = u.clone();
        }
        if let Some(k) = &ov.api_key {
            self.api_key = k.clone();
        }
        if let Some(b) = &ov.storage_bucket {
            self.storage_bucket = b.clone();
        }
        if let Some(c) = ov.upload_concurrency {
            self.upload_concurrency = c.max(1);
        }
        if let Some(d) = ov.feed_debounce_ms {
            self.feed_debounce_ms = d;
        }
        self
    }

    pub fn image_cache_capacity(&self) -> Option<usize> {
        (self.image_cache_capacity > 0).then_some(self.image_cache_capacity)
    }

    pub fn save_to(&self, path: Option<PathBuf>) -> std::io::Result<()> {
        let path = path.unwrap_or_else(default_config_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = toml::to_string(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, data)
    }
}
