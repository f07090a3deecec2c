use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::data_loader::DataLoaderInner;
use super::loader::Loader;

/// Background loop flushing pending keys when auto dispatching is enabled.
///
/// Sleeps until the first key of a cycle arrives, then waits `delay` to
/// collect more keys. A full batch or an explicit dispatch of the buffered
/// keys cuts the wait short. Exits once the loader's cancellation token fires.
pub(crate) async fn run<K, L, C>(inner: Arc<DataLoaderInner<K, L, C>>)
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    L: Loader<K>,
    C: Send + Sync + Hash + Eq + Clone + 'static,
{
    let cancel = inner.cancel.clone();
    let delay = inner.settings.delay;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = inner.pending.notified() => {}
        }

        if !delay.is_zero() && !wait_for_batch(&inner, &cancel, delay).await {
            break;
        }

        inner.dispatch(None).await;
    }

    tracing::debug!("background dispatcher stopped");
}

/// Waits until `delay` elapses or the cycle asks to be flushed early.
/// Returns `false` if the loader was cancelled meanwhile.
///
/// A nudge only wakes the loop up; the flush condition is read from the
/// pending buffer, so a stale nudge from an earlier cycle is ignored.
async fn wait_for_batch<K, L, C>(
    inner: &DataLoaderInner<K, L, C>,
    cancel: &CancellationToken,
    delay: Duration,
) -> bool
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    L: Loader<K>,
    C: Send + Sync + Hash + Eq + Clone + 'static,
{
    let deadline = Instant::now() + delay;
    while !inner.should_flush() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = inner.nudge.notified() => {}
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }
    true
}
