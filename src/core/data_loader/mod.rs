mod cache;
mod data_loader;
mod dispatcher;
mod erased;
mod load_future;
mod loader;
mod observer;
mod pending;
#[cfg(test)]
mod test_loader;

pub use cache::{ResultCache, EXPIRATION_POLL_INTERVAL};
pub use data_loader::{DataLoader, DataLoaderBuilder};
pub use erased::{AnyFuture, AnyKey, AnyValue, ErasedDataLoader};
pub use load_future::{Completer, LoadFuture};
pub use loader::Loader;
pub use observer::{NoopObserver, Observer, TracingObserver};
