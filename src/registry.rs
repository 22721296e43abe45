//! Version registry
//!
//! A JSON document maps identifiers (conventionally `module.function`) to the
//! content hash of the last successful result and when it was produced:
//!
//! ```json
//! {
//!   "nlu.vocabulary": {
//!     "result_hash": "3f2a...",
//!     "last_run_timestamp": "2026-10-18T08:00:00Z"
//!   }
//! }
//! ```
//!
//! [`VersionRegistry::auto_update`] recomputes an identifier's artifact when
//! its entry is missing or stale. A failed recomputation falls back to the
//! last known good hash.

use crate::blob::BlobStore;
use crate::config::schema::RegistryConfig;
use crate::error::{BoxError, StowageError, StowageResult};
use crate::store::write_atomic_async;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Registry document: identifier to entry, kept sorted
pub type RegistryDocument = BTreeMap<String, RegistryEntry>;

/// Last successful result of one identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    #[serde(alias = "hash_version")]
    pub result_hash: String,

    #[serde(deserialize_with = "deserialize_timestamp")]
    pub last_run_timestamp: DateTime<Utc>,

    /// Extra fields written by other tools, carried through rewrites
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

/// Accept RFC 3339 timestamps and naive ISO 8601 ones (read as UTC)
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// When an identifier is recomputed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatePolicy {
    /// Recompute even if the entry is fresh
    pub force_update: bool,
    /// Allow stale entries to be recomputed
    pub update_allowed: bool,
    /// Age after which an entry is stale
    pub ttl: Duration,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            force_update: false,
            update_allowed: true,
            ttl: Duration::hours(24),
        }
    }
}

impl UpdatePolicy {
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            force_update: false,
            update_allowed: config.update_allowed,
            ttl: Duration::hours(i64::from(config.ttl_hours)),
        }
    }

    /// Same policy, recomputing unconditionally
    pub fn forced(self) -> Self {
        Self {
            force_update: true,
            ..self
        }
    }

    /// Whether `entry` must be recomputed at `now`
    pub fn needs_update(&self, entry: Option<&RegistryEntry>, now: DateTime<Utc>) -> bool {
        match entry {
            None => true,
            Some(_) if self.force_update => true,
            Some(entry) => self.update_allowed && now - entry.last_run_timestamp > self.ttl,
        }
    }
}

/// Conventional identifier of a factory: `module.function`
pub fn identifier(module: &str, function: &str) -> String {
    format!("{}.{}", module, function)
}

/// Registry document plus the blob store holding its artifacts
pub struct VersionRegistry {
    path: PathBuf,
    blobs: Arc<BlobStore>,
    write_lock: Mutex<()>,
}

impl VersionRegistry {
    pub fn new(path: impl Into<PathBuf>, blobs: Arc<BlobStore>) -> Self {
        Self {
            path: path.into(),
            blobs,
            write_lock: Mutex::new(()),
        }
    }

    /// Registry document path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blob store holding the artifacts
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Read the whole document; a missing file is an empty registry
    pub async fn entries(&self) -> StowageResult<RegistryDocument> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Registry {} does not exist yet", self.path.display());
                Ok(RegistryDocument::new())
            }
            Err(e) => Err(StowageError::io(
                format!("reading registry {}", self.path.display()),
                e,
            )),
        }
    }

    /// Entry of a single identifier
    pub async fn entry(&self, identifier: &str) -> StowageResult<Option<RegistryEntry>> {
        Ok(self.entries().await?.remove(identifier))
    }

    /// Resolve `identifier` to its stored artifact
    pub async fn load<T: DeserializeOwned>(&self, identifier: &str) -> StowageResult<T> {
        let entry = self
            .entry(identifier)
            .await?
            .ok_or_else(|| StowageError::UnknownIdentifier(identifier.to_string()))?;
        self.blobs.load(&entry.result_hash).await
    }

    /// Return the current result hash of `identifier`, recomputing it first
    /// if `policy` says so
    ///
    /// A recomputed result is saved to the blob store and recorded in the
    /// document. If `factory` or the save fails, the previous hash is
    /// returned and the document is left untouched; with no previous entry
    /// the call fails with [`StowageError::VersionNotFound`].
    pub async fn auto_update<T, E, F, Fut>(
        &self,
        identifier: &str,
        policy: UpdatePolicy,
        factory: F,
    ) -> StowageResult<String>
    where
        T: Serialize,
        E: Into<BoxError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let previous = self.entry(identifier).await?;
        if let Some(entry) = &previous {
            if !policy.needs_update(Some(entry), Utc::now()) {
                debug!("Version '{}' is fresh", identifier);
                return Ok(entry.result_hash.clone());
            }
        }

        info!("Updating version '{}'", identifier);
        let outcome = match factory().await {
            Ok(result) => self
                .blobs
                .save_returning_hash(&result)
                .await
                .map_err(BoxError::from),
            Err(e) => Err(e.into()),
        };

        match (outcome, previous) {
            (Ok(hash), previous) => {
                self.record(identifier, &hash, previous).await?;
                Ok(hash)
            }
            (Err(e), Some(previous)) => {
                error!(
                    "Unable to update version '{}': {}. Using old hash {} created on {}",
                    identifier, e, previous.result_hash, previous.last_run_timestamp
                );
                Ok(previous.result_hash)
            }
            (Err(source), None) => Err(StowageError::VersionNotFound {
                identifier: identifier.to_string(),
                source,
            }),
        }
    }

    /// [`auto_update`](Self::auto_update) with a synchronous factory
    pub async fn auto_update_blocking<T, E, F>(
        &self,
        identifier: &str,
        policy: UpdatePolicy,
        factory: F,
    ) -> StowageResult<String>
    where
        T: Serialize,
        E: Into<BoxError>,
        F: FnOnce() -> Result<T, E>,
    {
        self.auto_update(identifier, policy, || std::future::ready(factory()))
            .await
    }

    /// Merge the new entry into the current document and replace the file
    async fn record(
        &self,
        identifier: &str,
        hash: &str,
        previous: Option<RegistryEntry>,
    ) -> StowageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.entries().await?;

        // Re-read under the lock: another writer may have moved the entry on
        let previous = document.get(identifier).cloned().or(previous);
        let now = Utc::now();
        let (timestamp, metadata) = match previous {
            Some(entry) => (now.max(entry.last_run_timestamp), entry.metadata),
            None => (now, BTreeMap::new()),
        };

        document.insert(
            identifier.to_string(),
            RegistryEntry {
                result_hash: hash.to_string(),
                last_run_timestamp: timestamp,
                metadata,
            },
        );

        let mut bytes = serde_json::to_vec_pretty(&document)?;
        bytes.push(b'\n');
        write_atomic_async(&self.path, bytes).await?;
        info!("Recorded version '{}' as {}", identifier, hash);
        Ok(())
    }
}
