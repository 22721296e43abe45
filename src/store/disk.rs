//! Disk-backed store
//!
//! Keeps the authoritative map in memory and mirrors it to
//! `<dir>/<name>.json` once every `flush_threshold` writes. The file is
//! replaced atomically, so a crash mid-flush leaves the previous snapshot
//! intact. A missing or unreadable file at startup yields an empty store.

use crate::error::{Miss, StowageError, StowageResult};
use crate::key::CacheKey;
use crate::store::Store;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

struct DiskState<V> {
    entries: BTreeMap<String, V>,
    /// Writes not yet covered by a successful flush
    pending: u64,
    flushing: bool,
}

/// Process-local map mirrored to a JSON file with batched durability
pub struct DiskStore<V> {
    name: String,
    path: PathBuf,
    flush_threshold: u64,
    state: Mutex<DiskState<V>>,
}

impl<V> DiskStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send,
{
    /// Open the store named `name` under `dir`
    ///
    /// Never fails: unreadable state is logged and replaced by an empty map.
    pub fn open(name: &str, dir: &Path, flush_threshold: u64) -> Self {
        let path = dir.join(format!("{}.json", name));
        let entries = load_entries(name, &path);

        Self {
            name: name.to_string(),
            path,
            flush_threshold: flush_threshold.max(1),
            state: Mutex::new(DiskState {
                entries,
                pending: 0,
                flushing: false,
            }),
        }
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries in memory
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Canonical text of every stored key, sorted
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().entries.keys().cloned().collect()
    }

    /// Writes made since the last successful flush
    pub fn pending_writes(&self) -> u64 {
        self.state.lock().pending
    }

    /// Write the whole map to disk now
    ///
    /// Returns `Ok(false)` without writing if another flush is in progress.
    pub fn flush(&self) -> StowageResult<bool> {
        let Some((snapshot, captured)) = self.begin_flush()? else {
            return Ok(false);
        };

        let result = self.write_snapshot(&snapshot);
        self.finish_flush(result.is_ok(), captured);
        result.map(|()| true)
    }

    /// Serialize the map and mark a flush as running
    ///
    /// Returns `None` if a flush is already running.
    fn begin_flush(&self) -> StowageResult<Option<(Vec<u8>, u64)>> {
        let mut state = self.state.lock();
        if state.flushing {
            debug!("Flush of {} already running, skipping", self.name);
            return Ok(None);
        }
        let snapshot = serde_json::to_vec(&state.entries)?;
        state.flushing = true;
        Ok(Some((snapshot, state.pending)))
    }

    fn finish_flush(&self, succeeded: bool, committed: u64) {
        let mut state = self.state.lock();
        state.flushing = false;
        if succeeded {
            state.pending = state.pending.saturating_sub(committed);
        }
    }

    fn write_snapshot(&self, snapshot: &[u8]) -> StowageResult<()> {
        sync_file(&self.name, &self.path, snapshot)
    }

    /// Insert `value`, returning a snapshot to write once the threshold is hit
    fn record(&self, key: &CacheKey, value: V) -> Option<Vec<u8>> {
        {
            let mut state = self.state.lock();
            state.entries.insert(key.canonical().to_string(), value);
            state.pending += 1;
            if state.pending < self.flush_threshold || state.flushing {
                return None;
            }
        }

        info!(
            "{} writes pending in cache {}, syncing with local file",
            self.flush_threshold, self.name
        );

        match self.begin_flush() {
            Ok(Some((snapshot, _))) => Some(snapshot),
            Ok(None) => None,
            Err(e) => {
                error!("Could not serialize cache {}: {}", self.name, e);
                None
            }
        }
    }

    fn settle_threshold_flush(&self, result: StowageResult<()>) {
        if let Err(ref e) = result {
            error!("Could not sync {} with local file: {}", self.name, e);
        }
        self.finish_flush(result.is_ok(), self.flush_threshold);
    }
}

impl<V> Store<V> for DiskStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send,
{
    fn get(&self, key: &CacheKey) -> Result<V, Miss> {
        self.state
            .lock()
            .entries
            .get(key.canonical())
            .cloned()
            .ok_or(Miss::Absent)
    }

    fn set(&self, key: &CacheKey, value: V) {
        if let Some(snapshot) = self.record(key, value) {
            let result = self.write_snapshot(&snapshot);
            self.settle_threshold_flush(result);
        }
    }
}

#[async_trait::async_trait]
impl<V> crate::store::AsyncStore<V> for DiskStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    async fn get(&self, key: &CacheKey) -> Result<V, Miss> {
        Store::get(self, key)
    }

    async fn set(&self, key: &CacheKey, value: V) {
        let Some(snapshot) = self.record(key, value) else {
            return;
        };
        let (name, path) = (self.name.clone(), self.path.clone());
        let result = tokio::task::spawn_blocking(move || sync_file(&name, &path, &snapshot))
            .await
            .unwrap_or_else(|e| Err(StowageError::Internal(format!("flush task failed: {}", e))));
        self.settle_threshold_flush(result);
    }
}

fn sync_file(name: &str, path: &Path, snapshot: &[u8]) -> StowageResult<()> {
    let start = Instant::now();
    write_atomic(path, snapshot)?;
    info!(
        "Synced cache {} to {} in {:?}",
        name,
        path.display(),
        start.elapsed()
    );
    Ok(())
}

fn load_entries<V: DeserializeOwned>(name: &str, path: &Path) -> BTreeMap<String, V> {
    let start = Instant::now();
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("Cache {} does not exist yet, starting empty", name);
            return BTreeMap::new();
        }
        Err(e) => {
            warn!("Cache {} could not be read, starting empty: {}", name, e);
            return BTreeMap::new();
        }
    };

    match serde_json::from_slice::<BTreeMap<String, V>>(&bytes) {
        Ok(entries) => {
            info!(
                "Loaded {} cache items from local file for {} in {:?}",
                entries.len(),
                name,
                start.elapsed()
            );
            entries
        }
        Err(e) => {
            warn!("Cache {} is invalid, starting empty: {}", name, e);
            BTreeMap::new()
        }
    }
}

/// Replace `path` with `bytes` via a temp file in the same directory
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> StowageResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StowageError::Internal(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir)
        .map_err(|e| StowageError::io(format!("creating directory {}", dir.display()), e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    fs::write(&tmp, bytes)
        .map_err(|e| StowageError::io(format!("writing {}", tmp.display()), e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StowageError::io(format!("replacing {}", path.display()), e)
    })
}

/// [`write_atomic`] on the blocking pool, for use from async code
pub(crate) async fn write_atomic_async(path: &Path, bytes: Vec<u8>) -> StowageResult<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
        .await
        .map_err(|e| StowageError::Internal(format!("write task failed: {}", e)))?
}
