use moodcart_catalog::RestConfig;
use moodcart_core::{default_model_sources, ModelSource};
use std::path::PathBuf;
use std::time::Duration;

/// Where product data comes from.
#[derive(Debug, Clone)]
pub enum CatalogBackend {
    /// PostgREST endpoint, selected when `MOODCART_CATALOG_URL` is set.
    Rest(RestConfig),
    /// Local SQLite file.
    Sqlite(PathBuf),
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path of the user-facing webcam (default: /dev/video0).
    pub camera_device: String,
    /// Model directories, tried in order until one loads completely.
    pub model_sources: Vec<ModelSource>,
    /// Period of the expression sampling loop.
    pub sample_interval: Duration,
    pub catalog: CatalogBackend,
}

impl Config {
    /// Load configuration from `MOODCART_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("moodcart");

        let model_sources = match var("MOODCART_MODEL_SOURCES") {
            Some(list) if !list.trim().is_empty() => list
                .split(':')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ModelSource::new)
                .collect(),
            _ => {
                let user_dir = var("MOODCART_MODEL_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| data_dir.join("models"));
                default_model_sources(&user_dir)
            }
        };

        let catalog = match var("MOODCART_CATALOG_URL").filter(|u| !u.trim().is_empty()) {
            Some(base_url) => CatalogBackend::Rest(RestConfig {
                base_url,
                table: var("MOODCART_CATALOG_TABLE").unwrap_or_else(|| "products".to_string()),
                api_key: var("MOODCART_CATALOG_KEY"),
                timeout: Duration::from_millis(env_u64(&var, "MOODCART_CATALOG_TIMEOUT_MS", 5000)),
            }),
            None => CatalogBackend::Sqlite(
                var("MOODCART_CATALOG_DB")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| data_dir.join("catalog.db")),
            ),
        };

        Self {
            camera_device: var("MOODCART_CAMERA_DEVICE")
                .unwrap_or_else(|| "/dev/video0".to_string()),
            model_sources,
            sample_interval: Duration::from_millis(
                env_u64(&var, "MOODCART_SAMPLE_INTERVAL_MS", 500).max(1),
            ),
            catalog,
        }
    }
}

fn env_u64(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
