//! Configuration management for Stowage

pub mod schema;

pub use schema::{Config, Environment};

use crate::error::{StowageError, StowageResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stowage")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stowage")
    }

    /// Get the directory for disk-backed store files and the local blob mirror
    pub fn cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stowage")
    }

    /// Get the default root of the filesystem bucket backend
    pub fn buckets_dir() -> PathBuf {
        Self::state_dir().join("buckets")
    }

    /// Get the default version registry document path
    pub fn registry_path() -> PathBuf {
        Self::state_dir().join("versions.json")
    }

    /// Load configuration, creating default if not exists
    pub async fn load(&self) -> StowageResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> StowageResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StowageError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| StowageError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> StowageResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            StowageError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> StowageResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StowageError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Directory of disk-backed store files
    pub fn disk_dir(&self) -> PathBuf {
        self.disk
            .dir
            .clone()
            .unwrap_or_else(|| ConfigManager::cache_dir().join("stores"))
    }

    /// Root of the filesystem bucket backend
    pub fn blob_root(&self) -> PathBuf {
        self.blob
            .root
            .clone()
            .unwrap_or_else(ConfigManager::buckets_dir)
    }

    /// Local mirror directory for content-addressed objects, if mirroring is on
    pub fn blob_mirror_dir(&self) -> Option<PathBuf> {
        let enabled = self
            .blob
            .local_mirror
            .unwrap_or_else(|| self.general.environment.mirrors_blobs_locally());
        enabled.then(|| ConfigManager::cache_dir().join("objects"))
    }

    /// Version registry document path
    pub fn registry_path(&self) -> PathBuf {
        self.registry
            .path
            .clone()
            .unwrap_or_else(ConfigManager::registry_path)
    }
}
