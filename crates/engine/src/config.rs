//! Engine configuration.
//!
//! Settings come from an optional YAML (or JSON) file named by `FLOWCACHE_CONFIG_PATH`,
//! falling back to defaults for anything the file leaves out. `FLOWCACHE_CACHE_DIR`
//! overrides the cache directory last. Without either, records live under the platform
//! cache directory (`~/.cache/flowcache` on most Linux systems).

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use dirs_next::{cache_dir, home_dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{resolve::RetryPolicy, store::FsStore};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "FLOWCACHE_CONFIG_PATH";

/// Environment variable overriding the cache directory.
pub const CACHE_DIR_ENV: &str = "FLOWCACHE_CACHE_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("config parse error at {path}: {source}")]
    Parse { path: PathBuf, source: serde_yaml::Error },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root of the on-disk result store.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Polling bounds for output-mode lazy resolution.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = non_empty_env(CONFIG_PATH_ENV).map(PathBuf::from);
        let cache_dir = non_empty_env(CACHE_DIR_ENV).map(PathBuf::from);
        Self::load_with(config_path.as_deref(), cache_dir)
    }

    /// Load from an optional file, then apply an optional cache directory override.
    pub fn load_with(config_path: Option<&Path>, cache_dir_override: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        if let Some(cache_dir) = cache_dir_override {
            config.cache_dir = expand_tilde(&cache_dir);
        }
        debug!(cache_dir = %config.cache_dir.display(), max_attempts = config.retry.max_attempts, "loaded engine config");
        Ok(config)
    }

    /// Parse a configuration file. JSON files parse too, as YAML is a superset.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let path = expand_tilde(path);
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let mut config: EngineConfig = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.cache_dir = expand_tilde(&config.cache_dir);
        Ok(config)
    }

    /// Result store rooted at the configured cache directory.
    pub fn open_store(&self) -> FsStore {
        FsStore::new(&self.cache_dir)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Platform cache directory joined with `flowcache`, or `./.flowcache` when unknown.
pub fn default_cache_dir() -> PathBuf {
    cache_dir()
        .map(|dir| dir.join("flowcache"))
        .unwrap_or_else(|| PathBuf::from(".flowcache"))
}

/// Replace a leading `~` with the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}
