use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120; // generation can take a while
pub const DEFAULT_QUIET_PERIOD_MS: u64 = 600; // media-group debounce window

/// Top-level config (easel.toml + EASEL_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EaselConfig {
    pub telegram: TelegramConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub api_key: String,
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Whole-request timeout for catalog and generation calls, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ApiConfig {
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

/// Model catalog filtering and the fetch-failure policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// A model qualifies when any keyword appears in its name, display name
    /// or description (case-insensitive).
    #[serde(default = "default_model_keywords")]
    pub keywords: Vec<String>,
    /// When non-empty, only these model ids are offered. Entries may carry a
    /// `models/` prefix; they are normalized before matching.
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub catalog_fallback: CatalogFallback,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            keywords: default_model_keywords(),
            allowlist: Vec::new(),
            catalog_fallback: CatalogFallback::default(),
        }
    }
}

/// What to do when the live catalog cannot be fetched at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CatalogFallback {
    /// Serve a catalog synthesized from the allowlist (requires a non-empty
    /// allowlist; otherwise the fetch error still propagates).
    #[default]
    Allowlist,
    /// Propagate the fetch error and refuse to start.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Scratch space for downloaded input photos, one subdirectory per user.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            temp_dir: default_temp_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// How long after a media group's first message the group is considered
    /// complete. Later arrivals never extend the window.
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: default_quiet_period_ms(),
        }
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_model_keywords() -> Vec<String> {
    vec![
        "image".to_string(),
        "nano-banana".to_string(),
        "banana".to_string(),
    ]
}
fn default_quiet_period_ms() -> u64 {
    DEFAULT_QUIET_PERIOD_MS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.easel/easel.db", home)
}
fn default_temp_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.easel/tmp", home)
}

impl EaselConfig {
    /// Load config from a TOML file with EASEL_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.easel/easel.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: EaselConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("EASEL_").split("_"))
            .extract()
            .map_err(|e| crate::error::EaselError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.easel/easel.toml", home)
}
