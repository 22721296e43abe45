//! Remote key-value store
//!
//! Wraps a network KV service behind the [`KvClient`] boundary. The service
//! enforces TTLs; this side only namespaces keys, encodes values, throttles
//! concurrency and turns transport failures into misses.

use crate::config::Environment;
use crate::error::Miss;
use crate::key::CacheKey;
use crate::store::AsyncStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error};

/// Share of throttle permits reserved for reads, in percent
const READ_SHARE_PERCENT: usize = 80;

/// Transport failure reported by a [`KvClient`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Client side of a network key-value service
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Fetch the raw value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Store `value` under `key` without expiry
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), KvError>;

    /// Store `value` under `key`, expiring after `ttl`
    async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<(), KvError>;
}

/// Value encoding used on the wire
pub trait KvCodec<V>: Send + Sync {
    /// Encode a value
    fn encode(&self, value: &V) -> Result<Vec<u8>, String>;

    /// Decode a value; failures are reported as malformed entries
    fn decode(&self, bytes: &[u8]) -> Result<V, String>;
}

/// JSON encoding of any serde type
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<V: Serialize + DeserializeOwned> KvCodec<V> for JsonCodec {
    fn encode(&self, value: &V) -> Result<Vec<u8>, String> {
        serde_json::to_vec(value).map_err(|e| e.to_string())
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }
}

/// Process-wide cap on outstanding KV operations
///
/// Permits are split so that reads hold most of the pool while writes keep a
/// reserved share: a read-heavy burst cannot take every connection. Callers
/// past the cap wait for a permit.
#[derive(Debug)]
pub struct KvThrottle {
    reads: Option<Semaphore>,
    writes: Option<Semaphore>,
}

impl KvThrottle {
    /// Create a throttle for `max_parallel` operations (0 = unlimited)
    pub fn new(max_parallel: usize) -> Self {
        if max_parallel == 0 {
            return Self::unlimited();
        }
        let (reads, writes) = Self::partition(max_parallel);
        Self {
            reads: Some(Semaphore::new(reads)),
            writes: Some(Semaphore::new(writes)),
        }
    }

    /// Throttle that never waits
    pub fn unlimited() -> Self {
        Self {
            reads: None,
            writes: None,
        }
    }

    /// Split `max_parallel` into (read, write) permits, each at least one
    ///
    /// A cap of 1 cannot be split and yields one permit of each kind, so up
    /// to two operations may be outstanding.
    pub fn partition(max_parallel: usize) -> (usize, usize) {
        let writes = (max_parallel * (100 - READ_SHARE_PERCENT) / 100).max(1);
        let reads = max_parallel.saturating_sub(writes).max(1);
        (reads, writes)
    }

    /// Permits currently free for (reads, writes); `None` when unlimited
    pub fn available(&self) -> Option<(usize, usize)> {
        match (&self.reads, &self.writes) {
            (Some(r), Some(w)) => Some((r.available_permits(), w.available_permits())),
            _ => None,
        }
    }

    async fn read(&self) -> Option<SemaphorePermit<'_>> {
        match &self.reads {
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        }
    }

    async fn write(&self) -> Option<SemaphorePermit<'_>> {
        match &self.writes {
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        }
    }
}

/// TTL store over a remote KV service
///
/// Keys are namespaced as `{environment}:{name}:{canonical key}` so caches
/// sharing one service never collide.
pub struct RemoteKvStore<V, C = JsonCodec> {
    client: Arc<dyn KvClient>,
    throttle: Arc<KvThrottle>,
    prefix: String,
    ttl: Duration,
    timeout: Option<Duration>,
    codec: C,
    _value: PhantomData<fn() -> V>,
}

impl<V> RemoteKvStore<V, JsonCodec>
where
    V: Serialize + DeserializeOwned,
{
    /// Create a JSON-encoded store; a zero `ttl` means entries never expire
    pub fn new(
        client: Arc<dyn KvClient>,
        throttle: Arc<KvThrottle>,
        environment: Environment,
        name: &str,
        ttl: Duration,
    ) -> Self {
        debug!("Initialized remote store {}:{}", environment, name);
        Self {
            client,
            throttle,
            prefix: format!("{}:{}", environment, name),
            ttl,
            timeout: None,
            codec: JsonCodec,
            _value: PhantomData,
        }
    }
}

impl<V, C: KvCodec<V>> RemoteKvStore<V, C> {
    /// Replace the value codec
    pub fn with_codec<D: KvCodec<V>>(self, codec: D) -> RemoteKvStore<V, D> {
        RemoteKvStore {
            client: self.client,
            throttle: self.throttle,
            prefix: self.prefix,
            ttl: self.ttl,
            timeout: self.timeout,
            codec,
            _value: PhantomData,
        }
    }

    /// Give up on any single operation after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Full key string sent to the service
    pub fn namespaced_key(&self, key: &CacheKey) -> String {
        format!("{}:{}", self.prefix, key.canonical())
    }

    async fn guarded<T, F>(&self, op: F) -> Result<T, KvError>
    where
        F: Future<Output = Result<T, KvError>> + Send,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, op)
                .await
                .unwrap_or(Err(KvError::Timeout(limit))),
            None => op.await,
        }
    }
}

#[async_trait]
impl<V, C> AsyncStore<V> for RemoteKvStore<V, C>
where
    V: Send + Sync + 'static,
    C: KvCodec<V>,
{
    async fn get(&self, key: &CacheKey) -> Result<V, Miss> {
        let full_key = self.namespaced_key(key);
        let _permit = self.throttle.read().await;

        match self.guarded(self.client.get(&full_key)).await {
            Ok(None) => {
                debug!("{} is not in {}", key, self.prefix);
                Err(Miss::Absent)
            }
            Ok(Some(bytes)) => self.codec.decode(&bytes).map_err(|reason| {
                // Malformed contents force the key to be recomputed
                error!("Malformed key detected: {} in {}: {}", key, self.prefix, reason);
                Miss::Malformed(reason)
            }),
            Err(e) => {
                error!("Remote store {} unavailable on get: {}", self.prefix, e);
                Err(Miss::Unavailable(e.to_string()))
            }
        }
    }

    async fn set(&self, key: &CacheKey, value: V) {
        let full_key = self.namespaced_key(key);
        let bytes = match self.codec.encode(&value) {
            Ok(bytes) => bytes,
            Err(reason) => {
                error!("Could not encode value for {}: {}", full_key, reason);
                return;
            }
        };

        let _permit = self.throttle.write().await;
        let result = if self.ttl.is_zero() {
            self.guarded(self.client.set(&full_key, bytes)).await
        } else {
            self.guarded(self.client.setex(&full_key, self.ttl, bytes))
                .await
        };

        if let Err(e) = result {
            error!("Remote store {} unavailable on set: {}", self.prefix, e);
        }
    }
}

/// In-process KV service with expiry, for local runs and tests
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
}

impl MemoryKv {
    /// Create an empty service
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|(_, expires)| expires.map_or(true, |at| now < at))
            .count()
    }

    /// Whether no live entries remain
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            None => return Ok(None),
            Some((_, Some(at))) => Instant::now() >= *at,
            Some(_) => false,
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), KvError> {
        self.entries.lock().insert(key.to_string(), (value, None));
        Ok(())
    }

    async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<(), KvError> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .insert(key.to_string(), (value, Some(expires_at)));
        Ok(())
    }
}
