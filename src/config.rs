//! Runtime configuration
//!
//! Values come from the process environment, after an optional `.env` file
//! has been loaded. Everything has a default except the Gemini API key, which
//! may also live in the OS keychain (see [`CredentialManager`]).

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::ai::credentials::CredentialManager;
use crate::error::{PortalError, Result};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Application directory name under the platform config dir
const APP_DIR: &str = "news-portal";

#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Directory holding `portal.db` and the guest library file
    pub data_dir: PathBuf,
    pub gemini: GeminiConfig,
    /// How long a looked-up plan may be served from memory for display
    pub plan_cache_ttl: Duration,
    pub enrichment: EnrichmentConfig,
}

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
}

// Keep the key out of logs.
impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnrichmentConfig {
    pub batch_size: usize,
    pub pause_between_batches: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            pause_between_batches: Duration::from_millis(2000),
        }
    }
}

impl PortalConfig {
    /// Default configuration rooted at `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            gemini: GeminiConfig::default(),
            plan_cache_ttl: Duration::from_secs(300),
            enrichment: EnrichmentConfig::default(),
        }
    }

    /// Load configuration from `.env` and the environment
    pub fn from_env() -> Result<Self> {
        // Try the working directory first, then its parent
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_path("../.env");
        }

        let data_dir = match std::env::var("PORTAL_DATA_DIR") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => Self::default_data_dir()?,
        };

        let mut config = Self::with_data_dir(data_dir);

        config.gemini.api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| CredentialManager::get_api_key("gemini").ok());
        if config.gemini.api_key.is_none() {
            warn!("no Gemini API key configured; summary generation will fail");
        }

        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            config.gemini.model = model;
        }
        if let Ok(base) = std::env::var("GEMINI_API_BASE") {
            config.gemini.api_base = base.trim_end_matches('/').to_string();
        }

        if let Some(secs) = parse_env::<u64>("PORTAL_PLAN_CACHE_TTL_SECS")? {
            config.plan_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(size) = parse_env::<usize>("PORTAL_ENRICH_BATCH_SIZE")? {
            if size == 0 {
                return Err(PortalError::Config(
                    "PORTAL_ENRICH_BATCH_SIZE must be at least 1".to_string(),
                ));
            }
            config.enrichment.batch_size = size;
        }
        if let Some(ms) = parse_env::<u64>("PORTAL_ENRICH_PAUSE_MS")? {
            config.enrichment.pause_between_batches = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// `~/.config/news-portal` (platform equivalent)
    pub fn default_data_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|d| d.join(APP_DIR))
            .ok_or_else(|| PortalError::Config("could not determine config directory".to_string()))
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("portal.db")
    }

    pub fn guest_library_path(&self) -> PathBuf {
        self.data_dir.join("guest_library.json")
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| PortalError::Config(format!("invalid value for {}: {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}
