use std::any::Any;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::slice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::try_join_all;
use futures_util::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cache::ResultCache;
use super::dispatcher;
use super::load_future::LoadFuture;
use super::loader::Loader;
use super::observer::{notify, NoopObserver, Observer};
use super::pending::{PendingRequest, PendingRequests};
use crate::core::config::{Options, Settings};
use crate::core::error::{Error, Result};

type CacheKeyResolver<K, C> = Box<dyn Fn(&K) -> C + Send + Sync>;

/// Data loader.
///
/// Collects keys requested through [DataLoader::load_one] and fetches them in
/// batches through a [Loader], caching the resulting futures per cache key.
///
/// Reference: <https://github.com/facebook/dataloader>
pub struct DataLoader<K, L, C = K>
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    L: Loader<K>,
    C: Send + Sync + Hash + Eq + Clone + 'static,
{
    inner: Arc<DataLoaderInner<K, L, C>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

pub(crate) struct DataLoaderInner<K, L, C>
where
    K: Send + Sync + 'static,
    L: Loader<K>,
    C: Hash + Eq,
{
    loader: L,
    pub(crate) settings: Settings,
    resolver: CacheKeyResolver<K, C>,
    requests: Mutex<PendingRequests<K, C, L::Value>>,
    cache: Arc<ResultCache<C, L::Value>>,
    observer: Arc<dyn Observer<K, L::Value, C>>,
    pub(crate) cancel: CancellationToken,
    /// Signalled when the first key of a dispatch cycle is registered.
    pub(crate) pending: Notify,
    /// Signalled to flush without waiting for the delay.
    pub(crate) nudge: Notify,
    disposed: AtomicBool,
}

/// Builder for a [DataLoader].
pub struct DataLoaderBuilder<K, L, C = K>
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    L: Loader<K>,
    C: Send + Sync + Hash + Eq + Clone + 'static,
{
    loader: L,
    options: Options,
    resolver: CacheKeyResolver<K, C>,
    observer: Arc<dyn Observer<K, L::Value, C>>,
}

impl<K, L> DataLoaderBuilder<K, L, K>
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    L: Loader<K>,
{
    /// Uses the key itself as cache key.
    pub fn new(loader: L) -> Self {
        Self::with_cache_key(loader, |key: &K| key.clone())
    }
}

impl<K, L, C> DataLoaderBuilder<K, L, C>
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    L: Loader<K>,
    C: Send + Sync + Hash + Eq + Clone + 'static,
{
    /// Caches results under the key computed by `resolver`.
    pub fn with_cache_key<F>(loader: L, resolver: F) -> Self
    where
        F: Fn(&K) -> C + Send + Sync + 'static,
    {
        Self {
            loader,
            options: Options::default(),
            resolver: Box::new(resolver),
            observer: Arc::new(NoopObserver),
        }
    }

    #[must_use]
    pub fn options(self, options: Options) -> Self {
        Self { options, ..self }
    }

    #[must_use]
    pub fn observer(self, observer: impl Observer<K, L::Value, C> + 'static) -> Self {
        Self { observer: Arc::new(observer), ..self }
    }

    /// Creates the loader and starts its background tasks. Must be called
    /// from within a tokio runtime when auto dispatching or sliding
    /// expiration is enabled.
    pub fn build(self) -> DataLoader<K, L, C> {
        let settings = Settings::from(self.options);
        let cache = Arc::new(ResultCache::new(
            settings.capacity,
            settings.sliding_expiration,
        ));
        let cancel = CancellationToken::new();

        let inner = Arc::new(DataLoaderInner {
            loader: self.loader,
            settings,
            resolver: self.resolver,
            requests: Mutex::new(PendingRequests::new()),
            cache: cache.clone(),
            observer: self.observer,
            cancel: cancel.clone(),
            pending: Notify::new(),
            nudge: Notify::new(),
            disposed: AtomicBool::new(false),
        });

        let mut tasks = Vec::new();
        if inner.settings.batching && inner.settings.auto_dispatching {
            tasks.push(tokio::spawn(dispatcher::run(inner.clone())));
        }
        if inner.settings.caching && inner.settings.sliding_expiration.is_some() {
            tasks.push(tokio::spawn(cache.run_expiration(cancel.child_token())));
        }

        tracing::debug!(settings = ?inner.settings, "data loader created");
        DataLoader { inner, tasks: Mutex::new(tasks) }
    }
}

impl<K, L> DataLoader<K, L, K>
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    L: Loader<K>,
{
    /// Use `Loader` to create a [DataLoader] with default options.
    pub fn new(loader: L) -> Self {
        DataLoaderBuilder::new(loader).build()
    }

    pub fn with_options(loader: L, options: Options) -> Self {
        DataLoaderBuilder::new(loader).options(options).build()
    }

    pub fn builder(loader: L) -> DataLoaderBuilder<K, L, K> {
        DataLoaderBuilder::new(loader)
    }
}

impl<K, L, C> DataLoader<K, L, C>
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    L: Loader<K>,
    C: Send + Sync + Hash + Eq + Clone + 'static,
{
    /// Get the loader.
    #[inline]
    pub fn loader(&self) -> &L {
        &self.inner.loader
    }

    /// Requests the value for `key`.
    ///
    /// Never waits for the fetch: the returned future resolves once the batch
    /// containing `key` has been dispatched, or immediately on a cache hit.
    pub fn load_one(&self, key: K) -> LoadFuture<L::Value> {
        self.inner.load(key, None)
    }

    /// Same as [DataLoader::load_one]. When batching is disabled, `cancel`
    /// aborts the single fetch started for `key`.
    pub fn load_one_with(&self, key: K, cancel: CancellationToken) -> LoadFuture<L::Value> {
        self.inner.load(key, Some(cancel))
    }

    /// Requests every key and resolves with the values in input order, or
    /// with the first error.
    pub fn load_many<I>(
        &self,
        keys: I,
    ) -> impl Future<Output = Result<Vec<L::Value>>> + Send + 'static
    where
        I: IntoIterator<Item = K>,
    {
        let futures: Vec<_> = keys.into_iter().map(|key| self.load_one(key)).collect();
        try_join_all(futures)
    }

    /// Evicts the cached future for `key`. Keys waiting for a dispatch are not
    /// affected.
    pub fn remove(&self, key: &K) -> bool {
        if self.inner.is_disposed() || !self.inner.settings.caching {
            return false;
        }
        self.inner.cache.remove(&(self.inner.resolver)(key))
    }

    /// Seeds the cache with `future` unless a live entry exists for `key`.
    pub fn set(&self, key: K, future: LoadFuture<L::Value>) -> bool {
        if !self.inner.settings.caching {
            return false;
        }

        let cache_key = (self.inner.resolver)(&key);
        let _requests = self.inner.requests();
        if self.inner.is_disposed() {
            return false;
        }
        self.inner.cache.try_add(cache_key, future)
    }

    /// Feed some data into the cache.
    pub fn feed_one(&self, key: K, value: L::Value) -> bool {
        self.set(key, LoadFuture::ready(Ok(value)))
    }

    /// Feed some data into the cache, returning how many entries were added.
    pub fn feed_many<I>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = (K, L::Value)>,
    {
        values
            .into_iter()
            .filter(|(key, value)| self.feed_one(key.clone(), value.clone()))
            .count()
    }

    /// Clears the cache.
    pub fn clear(&self) {
        if !self.inner.is_disposed() {
            self.inner.cache.clear();
        }
    }

    /// Gets all successfully loaded values in the cache.
    pub fn cached_values(&self) -> Vec<(C, L::Value)> {
        self.inner.cache.resolved()
    }

    /// Number of entries in the cache.
    pub fn usage(&self) -> usize {
        self.inner.cache.usage()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Flushes the keys requested so far.
    ///
    /// Does nothing when batching is disabled. With auto dispatching this only
    /// wakes the background dispatcher; otherwise it fetches every pending
    /// key and returns once all of them are resolved.
    pub async fn dispatch(&self) {
        self.dispatch_inner(None).await
    }

    /// Same as [DataLoader::dispatch], aborting the fetches once `cancel`
    /// fires.
    pub async fn dispatch_with(&self, cancel: &CancellationToken) {
        self.dispatch_inner(Some(cancel)).await
    }

    async fn dispatch_inner(&self, cancel: Option<&CancellationToken>) {
        let settings = &self.inner.settings;
        if !settings.batching || self.inner.is_disposed() {
            return;
        }

        if settings.auto_dispatching {
            if self.inner.requests().request_flush() {
                self.inner.nudge.notify_one();
            }
            return;
        }

        self.inner.dispatch(cancel).await
    }

    /// Stops the background tasks, fails every key still waiting for a
    /// dispatch and empties the cache. Later calls are no-ops.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.cancel.cancel();

        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(error) = task.await {
                tracing::warn!(%error, "background task did not shut down cleanly");
            }
        }

        let pending = self.inner.requests().take();
        let failed = pending.len();
        for (_, request) in pending {
            self.inner.complete(request, Err(Error::Disposed));
        }

        self.inner.cache.clear();
        tracing::debug!(failed, "data loader disposed");
    }
}

impl<K, L, C> Drop for DataLoader<K, L, C>
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    L: Loader<K>,
    C: Send + Sync + Hash + Eq + Clone + 'static,
{
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl<K, L, C> DataLoaderInner<K, L, C>
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    L: Loader<K>,
    C: Send + Sync + Hash + Eq + Clone + 'static,
{
    fn requests(&self) -> MutexGuard<'_, PendingRequests<K, C, L::Value>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Whether the current cycle should be dispatched before its delay runs
    /// out, because the batch is full or a flush was requested.
    pub(crate) fn should_flush(&self) -> bool {
        let requests = self.requests();
        requests.flush_requested() || self.batch_full(requests.len())
    }

    fn batch_full(&self, len: usize) -> bool {
        self.settings
            .max_batch_size
            .is_some_and(|max| len >= max.get())
    }

    fn load(
        self: &Arc<Self>,
        key: K,
        cancel: Option<CancellationToken>,
    ) -> LoadFuture<L::Value> {
        let cache_key = self.settings.caching.then(|| (self.resolver)(&key));

        let mut requests = self.requests();
        if self.is_disposed() {
            return LoadFuture::ready(Err(Error::Disposed));
        }

        if let Some(cache_key) = &cache_key {
            if let Some(future) = self.cache.get(cache_key) {
                drop(requests);
                notify("cache_hit", || self.observer.on_cache_hit(&key, cache_key));
                return future;
            }
        }

        if self.settings.batching {
            let (future, created) = requests.register(key, cache_key.clone());
            if let Some(cache_key) = cache_key {
                self.cache.try_add(cache_key, future.clone());
            }

            let len = requests.len();
            drop(requests);

            if created && self.settings.auto_dispatching {
                if len == 1 {
                    self.pending.notify_one();
                }
                if self.batch_full(len) {
                    self.nudge.notify_one();
                }
            }
            return future;
        }

        let (completer, future) = LoadFuture::pending();
        if let Some(cache_key) = &cache_key {
            self.cache.try_add(cache_key.clone(), future.clone());
        }
        drop(requests);

        let request = PendingRequest { completer, future: future.clone(), cache_key };
        tokio::spawn(self.clone().fetch_single(key, request, cancel));
        future
    }

    async fn fetch_single(
        self: Arc<Self>,
        key: K,
        request: PendingRequest<C, L::Value>,
        cancel: Option<CancellationToken>,
    ) {
        notify("single_start", || self.observer.on_single_start(&key));

        let result = self
            .fetch(slice::from_ref(&key), cancel.as_ref())
            .await
            .pop()
            .unwrap_or(Err(Error::KeyCountMismatch { expected: 1, actual: 0 }));

        notify("single_stop", || self.observer.on_single_stop(&key, &result));
        self.complete(request, result);
    }

    /// Runs one dispatch cycle over everything pending right now.
    pub(crate) async fn dispatch(&self, cancel: Option<&CancellationToken>) {
        let batch = self.requests().take();
        if batch.is_empty() {
            return;
        }

        let chunk_size = self
            .settings
            .max_batch_size
            .map_or(batch.len(), NonZeroUsize::get);
        tracing::debug!(keys = batch.len(), chunk_size, "dispatching batch");

        // chunks are fetched one after another, never concurrently
        let mut batch = batch.into_iter().peekable();
        while batch.peek().is_some() {
            let (keys, requests): (Vec<_>, Vec<_>) = batch.by_ref().take(chunk_size).unzip();

            let results = if self.cancel.is_cancelled() {
                vec![Err(Error::Disposed); keys.len()]
            } else if cancel.is_some_and(CancellationToken::is_cancelled) {
                vec![Err(Error::Canceled); keys.len()]
            } else {
                notify("batch_start", || self.observer.on_batch_start(&keys));
                let results = self.fetch(&keys, cancel).await;
                notify("batch_stop", || self.observer.on_batch_stop(&keys, &results));
                results
            };

            for (request, result) in requests.into_iter().zip(results) {
                self.complete(request, result);
            }
        }
    }

    /// Fetches `keys` and returns exactly one result per key, in order.
    async fn fetch(
        &self,
        keys: &[K],
        cancel: Option<&CancellationToken>,
    ) -> Vec<Result<L::Value>> {
        let token = self.cancel.child_token();
        let caller_cancelled = async {
            match cancel {
                Some(cancel) => cancel.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Disposed),
            _ = caller_cancelled => Err(Error::Canceled),
            result = AssertUnwindSafe(self.loader.load(keys, token.clone())).catch_unwind() => {
                match result {
                    Ok(Ok(results)) if results.len() == keys.len() => Ok(results),
                    Ok(Ok(results)) => Err(Error::KeyCountMismatch {
                        expected: keys.len(),
                        actual: results.len(),
                    }),
                    Ok(Err(error)) => Err(Error::batch_fetch(error)),
                    Err(panic) => Err(Error::batch_fetch(anyhow::anyhow!(
                        "batch fetch panicked: {}",
                        panic_message(panic.as_ref())
                    ))),
                }
            }
        };

        match outcome {
            Ok(results) => results
                .into_iter()
                .zip(keys)
                .map(|(result, key)| {
                    result.map_err(|error| {
                        let error = Error::key(error);
                        notify("error", || {
                            self.observer.on_error(slice::from_ref(key), &error)
                        });
                        error
                    })
                })
                .collect(),
            Err(error) => {
                notify("error", || self.observer.on_error(keys, &error));
                vec![Err(error); keys.len()]
            }
        }
    }

    /// Resolves a request, evicting its cache entry first when it failed so
    /// that a retry triggered by the failure fetches again.
    fn complete(&self, request: PendingRequest<C, L::Value>, result: Result<L::Value>) {
        if result.is_err() {
            if let Some(cache_key) = &request.cache_key {
                self.cache.remove_if(cache_key, &request.future);
            }
        }
        request.completer.complete(result);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
