use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::core::error::{Error, Result};

/// Receives notifications about what a
/// [DataLoader](super::DataLoader) is doing. Notifications are best-effort:
/// a panicking observer is logged and otherwise ignored.
pub trait Observer<K, V, C = K>: Send + Sync {
    fn on_cache_hit(&self, _key: &K, _cache_key: &C) {}

    fn on_batch_start(&self, _keys: &[K]) {}

    fn on_batch_stop(&self, _keys: &[K], _results: &[Result<V>]) {}

    fn on_single_start(&self, _key: &K) {}

    fn on_single_stop(&self, _key: &K, _result: &Result<V>) {}

    fn on_error(&self, _keys: &[K], _error: &Error) {}
}

impl<K, V, C, T: Observer<K, V, C> + ?Sized> Observer<K, V, C> for Arc<T> {
    fn on_cache_hit(&self, key: &K, cache_key: &C) {
        (**self).on_cache_hit(key, cache_key)
    }

    fn on_batch_start(&self, keys: &[K]) {
        (**self).on_batch_start(keys)
    }

    fn on_batch_stop(&self, keys: &[K], results: &[Result<V>]) {
        (**self).on_batch_stop(keys, results)
    }

    fn on_single_start(&self, key: &K) {
        (**self).on_single_start(key)
    }

    fn on_single_stop(&self, key: &K, result: &Result<V>) {
        (**self).on_single_stop(key, result)
    }

    fn on_error(&self, keys: &[K], error: &Error) {
        (**self).on_error(keys, error)
    }
}

/// Observer that ignores every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl<K, V, C> Observer<K, V, C> for NoopObserver {}

/// Observer that forwards every notification to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl<K: Debug, V, C: Debug> Observer<K, V, C> for TracingObserver {
    fn on_cache_hit(&self, key: &K, cache_key: &C) {
        tracing::trace!(?key, ?cache_key, "cache hit");
    }

    fn on_batch_start(&self, keys: &[K]) {
        tracing::debug!(?keys, "batch started");
    }

    fn on_batch_stop(&self, keys: &[K], results: &[Result<V>]) {
        let failed = results.iter().filter(|result| result.is_err()).count();
        tracing::debug!(?keys, failed, "batch finished");
    }

    fn on_single_start(&self, key: &K) {
        tracing::debug!(?key, "single fetch started");
    }

    fn on_single_stop(&self, key: &K, result: &Result<V>) {
        tracing::debug!(?key, ok = result.is_ok(), "single fetch finished");
    }

    fn on_error(&self, keys: &[K], error: &Error) {
        tracing::warn!(?keys, %error, "failed to load keys");
    }
}

/// Runs a single observer notification, containing any panic it raises.
pub(crate) fn notify(event: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!(event, "observer panicked while handling a notification");
    }
}
