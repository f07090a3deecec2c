use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::load_future::LoadFuture;

/// How often the background sweep looks for expired entries.
pub const EXPIRATION_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct CacheEntry<V> {
    future: LoadFuture<V>,
    last_touched: Instant,
}

/// Bounded map from cache key to [LoadFuture], evicting the least recently
/// touched entry on overflow and, optionally, entries idle for longer than
/// the sliding expiration.
///
/// The recency list and the map live under one lock, so the tail of the list
/// is always the entry with the oldest `last_touched`.
pub struct ResultCache<C: Hash + Eq, V> {
    entries: Mutex<lru::LruCache<C, CacheEntry<V>>>,
    sliding_expiration: Option<Duration>,
}

impl<C, V> ResultCache<C, V>
where
    C: Hash + Eq + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: NonZeroUsize, sliding_expiration: Option<Duration>) -> Self {
        Self { entries: Mutex::new(lru::LruCache::new(capacity)), sliding_expiration }
    }

    fn entries(&self) -> MutexGuard<'_, lru::LruCache<C, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        self.sliding_expiration
            .is_some_and(|ttl| now.saturating_duration_since(entry.last_touched) > ttl)
    }

    /// Inserts `future` unless a live entry exists for `key`.
    pub fn try_add(&self, key: C, future: LoadFuture<V>) -> bool {
        let now = Instant::now();
        let mut entries = self.entries();
        if let Some(entry) = entries.peek(&key) {
            if !self.is_expired(entry, now) {
                return false;
            }
        }

        if entries
            .push(key, CacheEntry { future, last_touched: now })
            .is_some()
        {
            tracing::trace!("replaced or evicted a cache entry");
        }
        true
    }

    /// Looks up `key`, marking the entry as most recently used.
    pub fn get(&self, key: &C) -> Option<LoadFuture<V>> {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get_mut(key) {
            Some(entry) if !self.is_expired(entry, now) => {
                entry.last_touched = now;
                return Some(entry.future.clone());
            }
            Some(_) => {}
            None => return None,
        }

        // expired but not swept yet
        entries.pop(key);
        None
    }

    pub fn remove(&self, key: &C) -> bool {
        self.entries().pop(key).is_some()
    }

    /// Removes the entry for `key` only if it still holds `future`.
    pub fn remove_if(&self, key: &C, future: &LoadFuture<V>) -> bool {
        let mut entries = self.entries();
        let same = entries
            .peek(key)
            .is_some_and(|entry| entry.future.ptr_eq(future));
        if same {
            entries.pop(key);
        }
        same
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn usage(&self) -> usize {
        self.entries().len()
    }

    /// Successfully resolved values, most recently used first.
    ///
    /// Futures are polled after the lock is released, since a seeded future
    /// may run arbitrary code.
    pub fn resolved(&self) -> Vec<(C, V)> {
        let snapshot: Vec<_> = self
            .entries()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.future.clone()))
            .collect();

        snapshot
            .into_iter()
            .filter_map(|(key, future)| match future.try_get() {
                Some(Ok(value)) => Some((key, value)),
                _ => None,
            })
            .collect()
    }

    /// Evicts every entry idle for longer than the sliding expiration,
    /// walking from the least recently used end.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let Some(ttl) = self.sliding_expiration else {
            return 0;
        };

        let mut entries = self.entries();
        let mut evicted = 0;
        while entries
            .peek_lru()
            .is_some_and(|(_, entry)| now.saturating_duration_since(entry.last_touched) > ttl)
        {
            entries.pop_lru();
            evicted += 1;
        }
        evicted
    }

    /// Runs the expiration sweep until `cancel` fires.
    pub async fn run_expiration(self: Arc<Self>, cancel: CancellationToken) {
        if self.sliding_expiration.is_none() {
            return;
        }

        loop {
            let evicted = self.evict_expired(Instant::now());
            if evicted > 0 {
                tracing::trace!(evicted, "evicted expired cache entries");
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(EXPIRATION_POLL_INTERVAL) => {}
            }
        }

        tracing::debug!("cache expiration sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn cache(capacity: usize, ttl: Option<u64>) -> ResultCache<&'static str, u64> {
        ResultCache::new(
            NonZeroUsize::new(capacity).unwrap(),
            ttl.map(Duration::from_millis),
        )
    }

    fn ready(value: u64) -> LoadFuture<u64> {
        LoadFuture::ready(Ok(value))
    }

    fn keys(cache: &ResultCache<&'static str, u64>) -> Vec<&'static str> {
        let mut keys: Vec<_> = cache.resolved().into_iter().map(|(key, _)| key).collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_try_add_does_not_overwrite() {
        let cache = cache(10, None);
        assert!(cache.try_add("a", ready(1)));
        assert!(!cache.try_add("a", ready(2)));

        let future = cache.get(&"a").unwrap();
        assert_eq!(future.try_get().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_capacity_evicts_least_recently_touched() {
        let cache = cache(2, None);
        cache.try_add("a", ready(1));
        cache.try_add("b", ready(2));
        cache.try_add("c", ready(3));

        assert_eq!(cache.usage(), 2);
        assert_eq!(keys(&cache), vec!["b", "c"]);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = cache(2, None);
        cache.try_add("a", ready(1));
        cache.try_add("b", ready(2));
        assert!(cache.get(&"a").is_some());
        cache.try_add("c", ready(3));

        assert_eq!(keys(&cache), vec!["a", "c"]);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = cache(10, None);
        cache.try_add("a", ready(1));
        cache.try_add("b", ready(2));

        assert!(cache.remove(&"a"));
        assert!(!cache.remove(&"a"));
        assert!(cache.get(&"a").is_none());

        cache.clear();
        assert_eq!(cache.usage(), 0);
    }

    #[test]
    fn test_remove_if_checks_identity() {
        let cache = cache(10, None);
        let stale = ready(1);
        let fresh = ready(2);
        cache.try_add("a", fresh.clone());

        assert!(!cache.remove_if(&"a", &stale));
        assert_eq!(cache.usage(), 1);
        assert!(cache.remove_if(&"a", &fresh));
        assert_eq!(cache.usage(), 0);
    }

    #[test]
    fn test_resolved_polls_outside_the_lock() {
        let cache = Arc::new(cache(4, None));
        let inner = cache.clone();
        let seeded = LoadFuture::from_future(async move { Ok(inner.usage() as u64) });
        assert!(cache.try_add("a", seeded));

        assert_eq!(cache.resolved(), vec![("a", 1)]);
    }

    #[test]
    fn test_resolved_skips_pending_and_failed() {
        let cache = cache(10, None);
        let (_completer, pending) = LoadFuture::pending();
        cache.try_add("a", ready(1));
        cache.try_add("b", pending);
        cache.try_add("c", LoadFuture::ready(Err(crate::core::error::Error::Canceled)));

        assert_eq!(cache.resolved(), vec![("a", 1)]);
    }

    #[test]
    fn test_evict_expired_drains_all_expired_entries() {
        let cache = cache(10, Some(100));
        cache.try_add("a", ready(1));
        cache.try_add("b", ready(2));
        cache.try_add("c", ready(3));

        let now = Instant::now();
        assert_eq!(cache.evict_expired(now), 0);
        assert_eq!(cache.evict_expired(now + Duration::from_millis(500)), 3);
        assert_eq!(cache.usage(), 0);
    }

    #[test]
    fn test_evict_expired_disabled() {
        let cache = cache(10, None);
        cache.try_add("a", ready(1));
        assert_eq!(
            cache.evict_expired(Instant::now() + Duration::from_secs(3600)),
            0
        );
        assert_eq!(cache.usage(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_resets_sliding_expiration() {
        let cache = cache(10, Some(100));
        cache.try_add("a", ready(1));
        cache.try_add("b", ready(2));

        tokio::time::advance(Duration::from_millis(80)).await;
        assert!(cache.get(&"a").is_some());

        tokio::time::advance(Duration::from_millis(80)).await;
        assert_eq!(cache.evict_expired(Instant::now()), 1);
        assert_eq!(keys(&cache), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_treats_expired_entry_as_missing() {
        let cache = cache(10, Some(100));
        cache.try_add("a", ready(1));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(cache.get(&"a").is_none());
        assert_eq!(cache.usage(), 0);

        assert!(cache.try_add("a", ready(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_can_be_replaced() {
        let cache = cache(10, Some(100));
        cache.try_add("a", ready(1));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(cache.try_add("a", ready(2)));
        assert_eq!(cache.resolved(), vec![("a", 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_expiration_sweeps_in_background() {
        let cache = Arc::new(cache(10, Some(100)));
        let cancel = CancellationToken::new();
        let sweep = tokio::spawn(cache.clone().run_expiration(cancel.clone()));

        cache.try_add("a", ready(1));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(cache.usage(), 0);

        cancel.cancel();
        sweep.await.unwrap();
    }
}
