use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_channel::oneshot;
use futures_util::future::{self, BoxFuture, Shared};
use futures_util::FutureExt;

use crate::core::error::{Error, Result};

/// Cloneable handle to a value that is resolved exactly once.
///
/// Every clone observes the same resolution. A future created by
/// [LoadFuture::pending] resolves with [Error::Disposed] if its [Completer]
/// is dropped without being used.
pub struct LoadFuture<V> {
    inner: Shared<BoxFuture<'static, Result<V>>>,
}

/// Writing half of a pending [LoadFuture].
pub struct Completer<V> {
    tx: oneshot::Sender<Result<V>>,
}

impl<V: Clone + Send + Sync + 'static> LoadFuture<V> {
    pub fn pending() -> (Completer<V>, Self) {
        let (tx, rx) = oneshot::channel();
        let inner = rx
            .map(|result| result.unwrap_or(Err(Error::Disposed)))
            .boxed()
            .shared();

        (Completer { tx }, Self { inner })
    }

    pub fn ready(result: Result<V>) -> Self {
        Self { inner: future::ready(result).boxed().shared() }
    }

    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<V>> + Send + 'static,
    {
        Self { inner: future.boxed().shared() }
    }

    /// Returns the resolution if it is already available, without waiting.
    pub fn try_get(&self) -> Option<Result<V>> {
        self.inner.clone().now_or_never()
    }

    pub fn is_resolved(&self) -> bool {
        self.try_get().is_some()
    }

    /// Whether both handles observe the same underlying value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl<V> Clone for LoadFuture<V> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<V: Clone> Future for LoadFuture<V> {
    type Output = Result<V>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl<V: Clone + fmt::Debug> fmt::Debug for LoadFuture<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.peek() {
            Some(result) => f.debug_tuple("LoadFuture").field(result).finish(),
            None => f.write_str("LoadFuture(<pending>)"),
        }
    }
}

impl<V> Completer<V> {
    pub fn complete(self, result: Result<V>) {
        // Nobody is waiting anymore when the send fails.
        let _ = self.tx.send(result);
    }
}
