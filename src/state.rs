//! Runtime configuration and the per-session application state.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::db::{DbError, RemoteDb};
use crate::feed::FeedOptions;
use crate::gateway::Backend;
use crate::stores::Stores;

/// Remote URL, first match wins.
const REMOTE_URL_VARS: [&str; 2] = ["LAUNCHPAD_REMOTE_URL", "NEXT_PUBLIC_SUPABASE_URL"];
/// Anonymous API key, first match wins.
const API_KEY_VARS: [&str; 2] = ["LAUNCHPAD_API_KEY", "NEXT_PUBLIC_SUPABASE_ANON_KEY"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not find home directory")]
    HomeDirNotFound,

    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid remote URL '{value}': {source}")]
    InvalidUrl {
        value: String,
        source: url::ParseError,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Contents of `~/.launchpad/config.json`. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub remote_url: Option<String>,
    pub api_key: Option<String>,
    /// Local mirror location; defaults to `~/.launchpad/launchpad.db`.
    pub db_path: Option<PathBuf>,
    pub feed_buffer: usize,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let feed = FeedOptions::default();
        Self {
            remote_url: None,
            api_key: None,
            db_path: None,
            feed_buffer: feed.buffer,
            reconnect_base_ms: feed.reconnect_base.as_millis() as u64,
            reconnect_max_ms: feed.reconnect_max.as_millis() as u64,
        }
    }
}

impl SyncConfig {
    pub fn feed_options(&self) -> FeedOptions {
        FeedOptions {
            buffer: self.feed_buffer,
            reconnect_base: Duration::from_millis(self.reconnect_base_ms),
            reconnect_max: Duration::from_millis(self.reconnect_max_ms),
        }
    }

    pub fn remote_url(&self) -> Result<Option<Url>, ConfigError> {
        self.remote_url
            .as_deref()
            .map(|value| {
                Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
                    value: value.to_string(),
                    source,
                })
            })
            .transpose()
    }

    pub fn database_path(&self) -> Result<PathBuf, DbError> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => RemoteDb::db_path(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.remote_url()?;
        if self.feed_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "feedBuffer",
                value: "0".to_string(),
            });
        }
        if self.reconnect_base_ms == 0 || self.reconnect_base_ms > self.reconnect_max_ms {
            return Err(ConfigError::InvalidValue {
                key: "reconnectBaseMs",
                value: format!("{} (max {})", self.reconnect_base_ms, self.reconnect_max_ms),
            });
        }
        Ok(())
    }
}

/// Path to `~/.launchpad/config.json`.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
    Ok(home.join(".launchpad").join("config.json"))
}

/// Load configuration from `~/.launchpad/config.json`, then apply
/// environment overrides.
pub fn load_config() -> Result<SyncConfig, ConfigError> {
    let path = config_path()?;
    let config = load_config_from(&path)?;
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

/// A missing file yields defaults; an unreadable or malformed one is an error.
pub fn load_config_from(path: &Path) -> Result<SyncConfig, ConfigError> {
    if !path.exists() {
        log::debug!("Config: {} not found, using defaults", path.display());
        return Ok(SyncConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

fn first_set(lookup: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .copied()
        .filter_map(|key| lookup(key))
        .find(|value| !value.trim().is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

/// Overlay environment variables on a loaded config and validate the result.
/// `lookup` is `std::env::var` in production and a map in tests.
pub fn apply_env_overrides(
    mut config: SyncConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SyncConfig, ConfigError> {
    if let Some(url) = first_set(&lookup, &REMOTE_URL_VARS) {
        config.remote_url = Some(url);
    }
    if let Some(key) = first_set(&lookup, &API_KEY_VARS) {
        config.api_key = Some(key);
    }
    if let Some(path) = first_set(&lookup, &["LAUNCHPAD_DB_PATH"]) {
        config.db_path = Some(PathBuf::from(path));
    }
    if let Some(v) = first_set(&lookup, &["LAUNCHPAD_FEED_BUFFER"]) {
        config.feed_buffer = parse_number("LAUNCHPAD_FEED_BUFFER", v)?;
    }
    if let Some(v) = first_set(&lookup, &["LAUNCHPAD_RECONNECT_BASE_MS"]) {
        config.reconnect_base_ms = parse_number("LAUNCHPAD_RECONNECT_BASE_MS", v)?;
    }
    if let Some(v) = first_set(&lookup, &["LAUNCHPAD_RECONNECT_MAX_MS"]) {
        config.reconnect_max_ms = parse_number("LAUNCHPAD_RECONNECT_MAX_MS", v)?;
    }

    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Everything one signed-in session needs: config, the backend connection
/// and the store registry.
pub struct AppState {
    pub config: SyncConfig,
    pub backend: Arc<Backend>,
    pub stores: Stores,
}

impl AppState {
    /// Open the backing store named by `config`.
    pub fn open(config: SyncConfig) -> Result<Self, StateError> {
        config.validate()?;
        let path = config.database_path()?;
        let db = RemoteDb::open_at(path.clone())?;

        match config.remote_url()? {
            Some(url) => log::info!("State: mirroring {} at {}", url, path.display()),
            None => log::info!("State: local store at {}", path.display()),
        }
        Ok(Self::with_db(config, db))
    }

    /// Build state around an already-open database.
    pub fn with_db(config: SyncConfig, db: RemoteDb) -> Self {
        let backend = Backend::new(db, config.feed_options());
        let stores = Stores::new(Arc::clone(&backend));
        Self {
            config,
            backend,
            stores,
        }
    }

    /// Drop every store's data and close their channels.
    pub fn logout(&self) {
        log::info!("State: logging out");
        self.stores.reset();
    }
}
