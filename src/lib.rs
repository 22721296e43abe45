//! Stowage - persistent caching and content-addressed artifacts
//!
//! Memoizes expensive or external computations through interchangeable
//! stores (bounded memory, disk, remote KV), stores results in a
//! content-addressed bucket, and tracks the latest artifact of each
//! long-running factory in a version registry.

pub mod blob;
pub mod cli;
pub mod config;
pub mod error;
pub mod key;
pub mod memo;
pub mod registry;
pub mod store;

pub use blob::{BlobBackend, BlobObject, BlobStore, FsBlobBackend};
pub use error::{BoxError, Miss, StowageError, StowageResult};
pub use key::{make_key, stable_hash, CacheKey, CallArgs, FunctionSignature};
pub use memo::{AsyncMemoizedFn, MemoizedFn};
pub use registry::{identifier, RegistryEntry, UpdatePolicy, VersionRegistry};
pub use store::{AsyncStore, Store};
