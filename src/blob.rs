//! Content-addressed blob store
//!
//! Objects are stored under `items/{hash}.json`, where `hash` is the stable
//! hash of the object's canonical JSON. Saving the same content twice yields
//! the same hash and the same object. Uploads are gzip-compressed.
//!
//! When a mirror directory is configured, every object saved or downloaded is
//! also kept there uncompressed, and loads try it first. Mirror files are
//! written once and only replaced when they no longer parse.

use crate::error::{StowageError, StowageResult};
use crate::key::{canonical_json, stable_hash};
use crate::store::write_atomic_async;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Content-encoding marker for gzip-compressed objects
pub const GZIP_ENCODING: &str = "gzip";

/// Raw object as held by a [`BlobBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobObject {
    pub data: Vec<u8>,
    pub content_encoding: Option<String>,
}

impl BlobObject {
    /// Object with no content encoding
    pub fn plain(data: Vec<u8>) -> Self {
        Self {
            data,
            content_encoding: None,
        }
    }

    /// Gzip-compress `data` and mark the object accordingly
    pub fn gzip(data: &[u8]) -> StowageResult<Self> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(data)
            .map_err(|e| StowageError::io("compressing object", e))?;
        let compressed = encoder
            .finish()
            .map_err(|e| StowageError::io("compressing object", e))?;

        Ok(Self {
            data: compressed,
            content_encoding: Some(GZIP_ENCODING.to_string()),
        })
    }

    /// Object payload with any content encoding removed
    pub fn decoded(&self) -> StowageResult<Vec<u8>> {
        match self.content_encoding.as_deref() {
            None => Ok(self.data.clone()),
            Some(GZIP_ENCODING) => {
                let mut decoded = Vec::new();
                GzDecoder::new(self.data.as_slice())
                    .read_to_end(&mut decoded)
                    .map_err(|e| StowageError::io("decompressing object", e))?;
                Ok(decoded)
            }
            Some(other) => Err(StowageError::backend(
                "download",
                format!("unsupported content encoding {}", other),
            )),
        }
    }
}

/// Object storage organized in buckets
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Store `object` under `key`, replacing any existing object
    async fn upload(&self, bucket: &str, key: &str, object: BlobObject) -> StowageResult<()>;

    /// Fetch the object under `key`, `None` if there is none
    async fn download(&self, bucket: &str, key: &str) -> StowageResult<Option<BlobObject>>;

    /// Whether an object exists under `key`
    async fn exists(&self, bucket: &str, key: &str) -> StowageResult<bool>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_encoding: Option<String>,
}

/// Bucket backend on the local filesystem
///
/// Each bucket is a directory under `root`. An object's content encoding is
/// kept in a sidecar `<key>.meta` file.
#[derive(Debug, Clone)]
pub struct FsBlobBackend {
    root: PathBuf,
}

impl FsBlobBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }

    fn meta_path(object_path: &Path) -> PathBuf {
        let mut name = object_path.as_os_str().to_os_string();
        name.push(".meta");
        PathBuf::from(name)
    }
}

#[async_trait]
impl BlobBackend for FsBlobBackend {
    async fn upload(&self, bucket: &str, key: &str, object: BlobObject) -> StowageResult<()> {
        let path = self.object_path(bucket, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StowageError::io(format!("creating directory {}", parent.display()), e)
            })?;
        }

        let meta = serde_json::to_vec(&ObjectMeta {
            content_encoding: object.content_encoding,
        })?;
        fs::write(Self::meta_path(&path), meta)
            .await
            .map_err(|e| StowageError::io(format!("writing metadata for {}", key), e))?;
        fs::write(&path, object.data)
            .await
            .map_err(|e| StowageError::io(format!("writing {}", path.display()), e))?;

        debug!("Uploaded {} to bucket {}", key, bucket);
        Ok(())
    }

    async fn download(&self, bucket: &str, key: &str) -> StowageResult<Option<BlobObject>> {
        let path = self.object_path(bucket, key);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StowageError::io(format!("reading {}", path.display()), e)),
        };

        let meta = match fs::read(Self::meta_path(&path)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => ObjectMeta::default(),
            Err(e) => {
                return Err(StowageError::io(format!("reading metadata for {}", key), e));
            }
        };

        Ok(Some(BlobObject {
            data,
            content_encoding: meta.content_encoding,
        }))
    }

    async fn exists(&self, bucket: &str, key: &str) -> StowageResult<bool> {
        let path = self.object_path(bucket, key);
        fs::try_exists(&path)
            .await
            .map_err(|e| StowageError::io(format!("checking {}", path.display()), e))
    }
}

/// Bucket-relative path of the object with content hash `hash`
pub fn hash_to_path(hash: &str) -> String {
    format!("items/{}.json", hash)
}

/// Content-addressed store over a bucket
pub struct BlobStore {
    backend: Arc<dyn BlobBackend>,
    bucket: String,
    mirror_dir: Option<PathBuf>,
}

impl BlobStore {
    /// Create a store over `bucket`, mirroring into `mirror_dir` if given
    pub fn new(
        backend: Arc<dyn BlobBackend>,
        bucket: impl Into<String>,
        mirror_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            backend,
            bucket: bucket.into(),
            mirror_dir,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn mirror_dir(&self) -> Option<&Path> {
        self.mirror_dir.as_deref()
    }

    /// Upload `payload` and return its content hash
    pub async fn save_returning_hash<T: Serialize + ?Sized>(
        &self,
        payload: &T,
    ) -> StowageResult<String> {
        let hash = stable_hash(payload)?;
        let body = canonical_json(payload)?.into_bytes();
        let path = hash_to_path(&hash);

        self.backend
            .upload(&self.bucket, &path, BlobObject::gzip(&body)?)
            .await?;
        self.save_local(&hash, &body, false).await;

        info!("Saved hash {}", hash);
        Ok(hash)
    }

    /// Fetch the payload with content hash `hash`
    pub async fn load_by_hash(&self, hash: &str) -> StowageResult<Value> {
        self.load(hash).await
    }

    /// Fetch the payload with content hash `hash` as a typed value
    pub async fn load<T: DeserializeOwned>(&self, hash: &str) -> StowageResult<T> {
        validate_hash(hash)?;

        let mut repair = false;
        if let Some(bytes) = self.load_local(hash).await {
            match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    info!("Loaded {} from local cache", hash);
                    return Ok(value);
                }
                Err(e) => {
                    warn!("Local copy of {} is unreadable, downloading: {}", hash, e);
                    repair = true;
                }
            }
        }

        info!("Loading {} from bucket {}", hash, self.bucket);
        let path = hash_to_path(hash);
        let object = self
            .backend
            .download(&self.bucket, &path)
            .await?
            .ok_or_else(|| StowageError::NotFound {
                bucket: self.bucket.clone(),
                key: path.clone(),
            })?;

        let body = object.decoded()?;
        let value = serde_json::from_slice(&body)?;
        self.save_local(hash, &body, repair).await;
        Ok(value)
    }

    /// Whether the bucket holds an object with content hash `hash`
    pub async fn exists(&self, hash: &str) -> StowageResult<bool> {
        validate_hash(hash)?;
        self.backend.exists(&self.bucket, &hash_to_path(hash)).await
    }

    fn local_path(&self, hash: &str) -> Option<PathBuf> {
        self.mirror_dir
            .as_ref()
            .map(|dir| dir.join(hash_to_path(hash)))
    }

    async fn load_local(&self, hash: &str) -> Option<Vec<u8>> {
        let path = self.local_path(hash)?;
        match fs::read(&path).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Could not read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write the mirror copy unless one exists or `replace` is set
    ///
    /// Failures are only logged.
    async fn save_local(&self, hash: &str, body: &[u8], replace: bool) {
        let Some(path) = self.local_path(hash) else {
            return;
        };
        if !replace && fs::try_exists(&path).await.unwrap_or(false) {
            return;
        }

        match write_atomic_async(&path, body.to_vec()).await {
            Ok(()) => info!("Saved {} to local cache", hash),
            Err(e) => warn!("Could not mirror {} to {}: {}", hash, path.display(), e),
        }
    }
}

fn validate_hash(hash: &str) -> StowageResult<()> {
    let valid = hash.len() == 64
        && hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    if valid {
        Ok(())
    } else {
        Err(StowageError::InvalidHash(hash.to_string()))
    }
}
