//! Backend selection
//!
//! Picks the store for a cache from the deployment environment and whether
//! the cached function reaches an external service.

use crate::config::{Config, Environment};
use crate::store::{AsyncStore, DiskStore, KvClient, KvThrottle, MemoryStore, RemoteKvStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Store backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Bounded in-process LRU
    Memory,
    /// Local file with batched flushes
    Disk,
    /// Shared network KV service
    Remote,
}

impl BackendKind {
    /// Get a human-readable backend name
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Disk => "disk",
            BackendKind::Remote => "remote",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Choose the backend for a cache
///
/// Deployed environments keep internal results in process memory and share
/// external results through the KV service. A local environment persists
/// everything to disk.
pub fn select_backend(environment: Environment, is_external: bool) -> BackendKind {
    match (environment.is_deployed(), is_external) {
        (true, false) => BackendKind::Memory,
        (true, true) => BackendKind::Remote,
        (false, _) => BackendKind::Disk,
    }
}

/// Create the store for cache `name`
///
/// `client` and `throttle` are only used when the remote backend is chosen.
pub fn build_store<V>(
    config: &Config,
    name: &str,
    is_external: bool,
    client: Arc<dyn KvClient>,
    throttle: Arc<KvThrottle>,
) -> Arc<dyn AsyncStore<V>>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let environment = config.general.environment;
    let kind = select_backend(environment, is_external);
    debug!("Using {} backend for cache {} ({})", kind, name, environment);

    match kind {
        BackendKind::Memory => {
            let max_size = config.memory.max_size;
            match config.memory.ttl_secs {
                0 => Arc::new(MemoryStore::new(max_size)),
                secs => Arc::new(MemoryStore::with_ttl(max_size, Duration::from_secs(secs))),
            }
        }
        BackendKind::Disk => Arc::new(DiskStore::open(
            name,
            &config.disk_dir(),
            config.disk.flush_threshold,
        )),
        BackendKind::Remote => Arc::new(RemoteKvStore::new(
            client,
            throttle,
            environment,
            name,
            Duration::from_secs(config.remote.ttl_secs),
        )),
    }
}
