//! Configuration schema for Stowage
//!
//! Configuration is stored at `~/.config/stowage/config.toml`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Bounded memory store settings
    pub memory: MemoryConfig,

    /// Disk-backed store settings
    pub disk: DiskConfig,

    /// Remote key-value store settings
    pub remote: RemoteConfig,

    /// Content-addressed blob store settings
    pub blob: BlobConfig,

    /// Version registry settings
    pub registry: RegistryConfig,
}

/// Deployment environment the process runs in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Developer machine
    #[default]
    Local,
    /// Shared development deployment
    Development,
    /// Pre-production deployment
    Staging,
    /// Production deployment
    Production,
}

impl Environment {
    /// Whether this is one of the deployed environments backed by shared services
    pub fn is_deployed(&self) -> bool {
        !matches!(self, Self::Local)
    }

    /// Whether content-addressed objects are mirrored to the local disk cache
    pub fn mirrors_blobs_locally(&self) -> bool {
        matches!(self, Self::Local)
    }

    /// Label used for key namespacing
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "development" | "dev" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment: {}", other)),
        }
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Deployment environment
    pub environment: Environment,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Local,
            log_format: "text".to_string(),
        }
    }
}

/// Bounded memory store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum number of entries (0 = unbounded)
    pub max_size: usize,

    /// Entry lifetime in seconds (0 = no expiry)
    pub ttl_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            ttl_secs: 0,
        }
    }
}

/// Disk-backed store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Directory holding one `<name>.json` file per store (default: user cache dir)
    pub dir: Option<PathBuf>,

    /// Number of writes that triggers a flush to disk
    pub flush_threshold: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            dir: None,
            flush_threshold: 100,
        }
    }
}

/// Remote key-value store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Entry lifetime in seconds (0 = no expiry)
    pub ttl_secs: u64,

    /// Maximum outstanding operations across the process (0 = unlimited)
    pub max_parallel: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 0,
            max_parallel: 50,
        }
    }
}

/// Content-addressed blob store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Bucket name
    pub bucket: String,

    /// Root directory of the filesystem bucket backend (default: state dir)
    pub root: Option<PathBuf>,

    /// Override for local mirroring (default: only in the local environment)
    pub local_mirror: Option<bool>,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            bucket: "stowage-cache".to_string(),
            root: None,
            local_mirror: None,
        }
    }
}

/// Version registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry document path (default: `versions.json` in the state dir)
    pub path: Option<PathBuf>,

    /// Age in hours after which an entry is stale
    pub ttl_hours: u32,

    /// Whether stale entries may be recomputed
    pub update_allowed: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: None,
            ttl_hours: 24,
            update_allowed: true,
        }
    }
}
