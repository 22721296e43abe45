//! Persistent memoization
//!
//! Binds a [`FunctionSignature`] to a store. The blocking wrapper runs the
//! computation inline on a miss. The async wrapper also collapses concurrent
//! misses for one key into a single computation whose outcome every waiter
//! receives.

use crate::error::{StowageError, StowageResult};
use crate::key::{make_key, CacheKey, CallArgs, FunctionSignature};
use crate::store::{AsyncStore, Store};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Memoized function over a blocking store
pub struct MemoizedFn<V, S: ?Sized> {
    signature: FunctionSignature,
    store: Arc<S>,
    _value: PhantomData<fn() -> V>,
}

impl<V, S> MemoizedFn<V, S>
where
    V: Clone,
    S: Store<V> + ?Sized,
{
    pub fn new(signature: FunctionSignature, store: Arc<S>) -> Self {
        Self {
            signature,
            store,
            _value: PhantomData,
        }
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    /// Key of a call to this function
    pub fn key(&self, args: CallArgs) -> StowageResult<CacheKey> {
        make_key(&self.signature, args)
    }

    /// Return the cached value for `key`, running `compute` on a miss
    ///
    /// A successful result is written back; an error is returned unchanged
    /// and nothing is cached.
    pub fn get_or_compute<E, F>(&self, key: &CacheKey, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        match Store::get(&*self.store, key) {
            Ok(value) => {
                debug!("Cache hit for {}", self.signature.name());
                Ok(value)
            }
            Err(miss) => {
                debug!("Cache miss for {} ({})", self.signature.name(), miss);
                let value = compute()?;
                Store::set(&*self.store, key, value.clone());
                Ok(value)
            }
        }
    }

    /// Key the call and look it up, computing on a miss
    pub fn call<E, F>(&self, args: CallArgs, compute: F) -> Result<V, E>
    where
        E: From<StowageError>,
        F: FnOnce() -> Result<V, E>,
    {
        let key = self.key(args)?;
        self.get_or_compute(&key, compute)
    }
}

type Flight<V, E> = Shared<BoxFuture<'static, Result<V, Arc<E>>>>;

/// Memoized async function with single-flight misses
///
/// Errors are shared through an `Arc` so every waiter of one computation sees
/// the same error value.
pub struct AsyncMemoizedFn<V, E, S: ?Sized> {
    signature: FunctionSignature,
    store: Arc<S>,
    in_flight: Arc<Mutex<HashMap<CacheKey, Flight<V, E>>>>,
}

impl<V, E, S> AsyncMemoizedFn<V, E, S>
where
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
    S: AsyncStore<V> + ?Sized + 'static,
{
    pub fn new(signature: FunctionSignature, store: Arc<S>) -> Self {
        Self {
            signature,
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    /// Key of a call to this function
    pub fn key(&self, args: CallArgs) -> StowageResult<CacheKey> {
        make_key(&self.signature, args)
    }

    /// Number of computations currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Return the cached value for `key`, running `compute` on a miss
    ///
    /// While a computation for `key` is running, further misses wait for it
    /// instead of starting their own. The computation and its store write run
    /// as a spawned task, so they finish even when every caller goes away.
    /// Must be called from within a tokio runtime.
    pub async fn get_or_compute<F, Fut>(&self, key: &CacheKey, compute: F) -> Result<V, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        match AsyncStore::get(&*self.store, key).await {
            Ok(value) => {
                debug!("Cache hit for {}", self.signature.name());
                return Ok(value);
            }
            Err(miss) => debug!("Cache miss for {} ({})", self.signature.name(), miss),
        }

        let flight = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(key) {
                Some(flight) => {
                    debug!("Joining running computation for {}", self.signature.name());
                    flight.clone()
                }
                None => {
                    let flight = self.start_flight(key.clone(), compute());
                    in_flight.insert(key.clone(), flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Key the call and look it up, computing on a miss
    pub async fn call<F, Fut>(&self, args: CallArgs, compute: F) -> Result<V, Arc<E>>
    where
        E: From<StowageError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let key = self.key(args).map_err(|e| Arc::new(E::from(e)))?;
        self.get_or_compute(&key, compute).await
    }

    fn start_flight<Fut>(&self, key: CacheKey, computation: Fut) -> Flight<V, E>
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);
        let name = self.signature.name().to_string();

        let task = tokio::spawn(async move {
            let result = computation.await.map_err(Arc::new);
            if let Ok(value) = &result {
                AsyncStore::set(&*store, &key, value.clone()).await;
            }
            // Stored before leaving the map, so later callers hit the store
            in_flight.lock().remove(&key);
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(join) => match join.try_into_panic() {
                    Ok(payload) => std::panic::resume_unwind(payload),
                    Err(join) => panic!("computation for {} was cancelled: {}", name, join),
                },
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DiskStore, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use thiserror::Error;

    #[derive(Error, Debug, PartialEq)]
    enum ComputeError {
        #[error("upstream failed: {0}")]
        Upstream(String),
        #[error(transparent)]
        Stowage(#[from] StowageErrorText),
    }

    #[derive(Error, Debug, PartialEq)]
    #[error("{0}")]
    struct StowageErrorText(String);

    impl From<StowageError> for ComputeError {
        fn from(e: StowageError) -> Self {
            ComputeError::Stowage(StowageErrorText(e.to_string()))
        }
    }

    fn add4() -> FunctionSignature {
        FunctionSignature::new("tests.add", &["a", "b", "c", "d"])
    }

    #[test]
    fn computes_once_per_key() {
        let memo = MemoizedFn::new(add4(), Arc::new(MemoryStore::new(0)));
        let calls = AtomicUsize::new(0);
        let add = |a: i64, b: i64, c: i64, d: i64| -> Result<i64, ComputeError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(a + b + c + d)
        };

        let first = memo.call(
            CallArgs::new().arg(&1).arg(&2).kwarg("c", &3).kwarg("d", &4),
            || add(1, 2, 3, 4),
        );
        let second = memo.call(
            CallArgs::new().arg(&1).arg(&2).arg(&3).kwarg("d", &4),
            || add(1, 2, 3, 4),
        );

        assert_eq!(first, Ok(10));
        assert_eq!(second, Ok(10));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn errors_are_not_cached() {
        let memo = MemoizedFn::new(add4(), Arc::new(MemoryStore::new(0)));
        let key = memo.key(CallArgs::new().arg(&1).arg(&1).arg(&1).arg(&1)).unwrap();

        let failed: Result<i64, ComputeError> =
            memo.get_or_compute(&key, || Err(ComputeError::Upstream("timeout".to_string())));
        assert_eq!(failed, Err(ComputeError::Upstream("timeout".to_string())));

        let recovered: Result<i64, ComputeError> = memo.get_or_compute(&key, || Ok(4));
        assert_eq!(recovered, Ok(4));
    }

    #[test]
    fn invalid_call_is_reported_through_compute_error() {
        let memo = MemoizedFn::new(add4(), Arc::new(MemoryStore::<i64>::new(0)));
        let result: Result<i64, ComputeError> =
            memo.call(CallArgs::new().kwarg("e", &5), || Ok(0));
        assert!(matches!(result, Err(ComputeError::Stowage(_))));
    }

    #[test]
    fn disk_results_survive_restart() {
        let temp = TempDir::new().unwrap();
        let sig = FunctionSignature::new("tests.square", &["x"]);

        {
            let store = Arc::new(DiskStore::open("squares", temp.path(), 1));
            let memo = MemoizedFn::new(sig.clone(), store);
            let value: Result<i64, ComputeError> = memo.call(CallArgs::new().arg(&7), || Ok(49));
            assert_eq!(value, Ok(49));
        }

        let store = Arc::new(DiskStore::open("squares", temp.path(), 1));
        let memo = MemoizedFn::new(sig, store);
        let value: Result<i64, ComputeError> = memo.call(CallArgs::new().arg(&7), || {
            Err(ComputeError::Upstream("should not run".to_string()))
        });
        assert_eq!(value, Ok(49));
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_computation() {
        let store: Arc<dyn AsyncStore<i64>> = Arc::new(MemoryStore::new(0));
        let memo = Arc::new(AsyncMemoizedFn::<i64, ComputeError, _>::new(add4(), store));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let memo = Arc::clone(&memo);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                let args = CallArgs::new().arg(&1).arg(&2).arg(&3).arg(&4);
                memo.call(args, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(10)
                })
                .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(10));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(memo.in_flight(), 0);
    }

    #[tokio::test]
    async fn concurrent_waiters_receive_the_same_error() {
        let store = Arc::new(MemoryStore::<i64>::new(0));
        let memo = Arc::new(AsyncMemoizedFn::<i64, ComputeError, _>::new(add4(), store));
        let key = memo.key(CallArgs::new().arg(&0)).unwrap();

        let slow_failure = || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(ComputeError::Upstream("quota exceeded".to_string()))
        };

        let (first, second) = tokio::join!(
            memo.get_or_compute(&key, slow_failure),
            memo.get_or_compute(&key, || async { Ok(0) }),
        );

        let (first, second) = (first.unwrap_err(), second.unwrap_err());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, ComputeError::Upstream("quota exceeded".to_string()));

        // Failure is not cached
        let retry = memo.get_or_compute(&key, || async { Ok(5) }).await;
        assert_eq!(retry, Ok(5));
    }

    #[tokio::test]
    async fn abandoned_computation_still_stores_its_result() {
        let store = Arc::new(MemoryStore::<i64>::new(0));
        let memo =
            AsyncMemoizedFn::<i64, ComputeError, _>::new(add4(), Arc::clone(&store));
        let key = memo.key(CallArgs::new().arg(&9)).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let counted = {
            let calls = Arc::clone(&calls);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(81)
            }
        };
        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), memo.get_or_compute(&key, counted)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(Store::get(&*store, &key), Ok(81));
        assert_eq!(memo.in_flight(), 0);

        let cached = memo.get_or_compute(&key, || async { Ok(0) }).await;
        assert_eq!(cached, Ok(81));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn caller_joining_an_abandoned_flight_gets_its_result() {
        let store = Arc::new(MemoryStore::<i64>::new(0));
        let memo = AsyncMemoizedFn::<i64, ComputeError, _>::new(add4(), store);
        let key = memo.key(CallArgs::new().arg(&3)).unwrap();

        let slow = || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(9)
        };
        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), memo.get_or_compute(&key, slow)).await;
        assert!(abandoned.is_err());
        assert_eq!(memo.in_flight(), 1);

        let joined = memo.get_or_compute(&key, || async { Ok(0) }).await;
        assert_eq!(joined, Ok(9));
        assert_eq!(memo.in_flight(), 0);
    }
}
