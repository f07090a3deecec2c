use std::hash::Hash;

use indexmap::IndexMap;

use super::load_future::{Completer, LoadFuture};

/// A key waiting for the next dispatch cycle.
pub(crate) struct PendingRequest<C, V> {
    pub completer: Completer<V>,
    pub future: LoadFuture<V>,
    /// Set when the future was also stored in the result cache.
    pub cache_key: Option<C>,
}

/// Keys requested since the last dispatch, in submission order.
pub(crate) struct PendingRequests<K, C, V> {
    entries: IndexMap<K, PendingRequest<C, V>>,
    /// An explicit flush was requested for the keys currently buffered.
    flush: bool,
}

impl<K, C, V> Default for PendingRequests<K, C, V> {
    fn default() -> Self {
        Self { entries: IndexMap::new(), flush: false }
    }
}

impl<K, C, V> PendingRequests<K, C, V>
where
    K: Hash + Eq,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the future registered for `key`, registering a new one if the
    /// key is not pending yet. The flag tells whether a new entry was created.
    pub fn register(&mut self, key: K, cache_key: Option<C>) -> (LoadFuture<V>, bool) {
        if let Some(request) = self.entries.get(&key) {
            return (request.future.clone(), false);
        }

        let (completer, future) = LoadFuture::pending();
        self.entries.insert(
            key,
            PendingRequest { completer, future: future.clone(), cache_key },
        );
        (future, true)
    }

    /// Drains every pending request, leaving an empty buffer behind.
    pub fn take(&mut self) -> Vec<(K, PendingRequest<C, V>)> {
        self.flush = false;
        std::mem::take(&mut self.entries).into_iter().collect()
    }

    /// Marks the buffered keys for dispatch without waiting for the delay.
    /// An empty buffer has nothing to flush, so the request is dropped.
    pub fn request_flush(&mut self) -> bool {
        self.flush = !self.is_empty();
        self.flush
    }

    pub fn flush_requested(&self) -> bool {
        self.flush
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
