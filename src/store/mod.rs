//! Cache store backends
//!
//! Every backend implements the same `get`/`set` contract:
//!
//! - `get` returns the value or a [`Miss`] tagged with the reason
//! - `set` never fails; durable and remote backends log and swallow errors
//!
//! | Backend | Trait | Suspends | Survives restart |
//! |---------|-------|----------|------------------|
//! | [`MemoryStore`] | [`Store`] | no | no |
//! | [`DiskStore`] | [`Store`] | no | yes (batched) |
//! | [`RemoteKvStore`] | [`AsyncStore`] | yes | yes (remote TTL) |
//!
//! Blocking stores are usable wherever an [`AsyncStore`] is expected.

mod disk;
mod factory;
mod memory;
mod remote;

pub use disk::DiskStore;
pub(crate) use disk::write_atomic_async;
pub use factory::{build_store, select_backend, BackendKind};
pub use memory::MemoryStore;
pub use remote::{JsonCodec, KvClient, KvCodec, KvError, KvThrottle, MemoryKv, RemoteKvStore};

use crate::error::Miss;
use crate::key::CacheKey;
use async_trait::async_trait;

/// Store whose operations never suspend
pub trait Store<V>: Send + Sync {
    /// Look up a value
    fn get(&self, key: &CacheKey) -> Result<V, Miss>;

    /// Insert or overwrite a value
    fn set(&self, key: &CacheKey, value: V);
}

/// Store whose operations may wait on I/O
#[async_trait]
pub trait AsyncStore<V: Send + 'static>: Send + Sync {
    /// Look up a value
    async fn get(&self, key: &CacheKey) -> Result<V, Miss>;

    /// Insert or overwrite a value
    async fn set(&self, key: &CacheKey, value: V);
}
