use std::any::{type_name, Any};
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::{try_join_all, BoxFuture};
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use super::data_loader::DataLoader;
use super::load_future::LoadFuture;
use super::loader::Loader;
use crate::core::error::{Error, Result};

pub type AnyKey = Box<dyn Any + Send + Sync>;
pub type AnyValue = Arc<dyn Any + Send + Sync>;
pub type AnyFuture = BoxFuture<'static, Result<AnyValue>>;

/// Type-erased view of a [DataLoader], for callers that only know the key and
/// value types at runtime.
///
/// Arguments are checked on every call: a missing argument fails with
/// [Error::ArgumentNull] and a value of the wrong type with [Error::KeyType]
/// or [Error::ValueType].
pub trait ErasedDataLoader: Send + Sync {
    /// See [DataLoader::load_one_with] for how `cancel` is honoured.
    fn load_any(
        &self,
        key: Option<AnyKey>,
        cancel: Option<CancellationToken>,
    ) -> Result<AnyFuture>;

    fn load_many_any(
        &self,
        keys: Vec<Option<AnyKey>>,
    ) -> Result<BoxFuture<'static, Result<Vec<AnyValue>>>>;

    fn remove_any(&self, key: Option<&(dyn Any + Send + Sync)>) -> Result<bool>;

    fn set_any(&self, key: Option<AnyKey>, value: Option<AnyFuture>) -> Result<bool>;

    fn clear_any(&self);

    fn dispatch_any(&self, cancel: Option<CancellationToken>) -> BoxFuture<'_, ()>;
}

fn downcast_key<K: 'static>(key: Option<AnyKey>) -> Result<K> {
    let key = key.ok_or(Error::ArgumentNull("key"))?;
    key.downcast::<K>()
        .map(|key| *key)
        .map_err(|_| Error::KeyType(type_name::<K>()))
}

fn downcast_value<V: Clone + Send + Sync + 'static>(value: AnyValue) -> Result<V> {
    value
        .downcast::<V>()
        .map(|value| V::clone(&value))
        .map_err(|_| Error::ValueType(type_name::<V>()))
}

fn erase<V: Clone + Send + Sync + 'static>(future: LoadFuture<V>) -> AnyFuture {
    future
        .map(|result| result.map(|value| Arc::new(value) as AnyValue))
        .boxed()
}

impl<K, L, C> ErasedDataLoader for DataLoader<K, L, C>
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    L: Loader<K>,
    C: Send + Sync + Hash + Eq + Clone + 'static,
{
    fn load_any(
        &self,
        key: Option<AnyKey>,
        cancel: Option<CancellationToken>,
    ) -> Result<AnyFuture> {
        let key = downcast_key::<K>(key)?;
        let future = match cancel {
            Some(cancel) => self.load_one_with(key, cancel),
            None => self.load_one(key),
        };
        Ok(erase(future))
    }

    fn load_many_any(
        &self,
        keys: Vec<Option<AnyKey>>,
    ) -> Result<BoxFuture<'static, Result<Vec<AnyValue>>>> {
        // validate everything before registering anything
        let keys = keys
            .into_iter()
            .map(downcast_key::<K>)
            .collect::<Result<Vec<_>>>()?;

        let futures: Vec<_> = keys.into_iter().map(|key| erase(self.load_one(key))).collect();
        Ok(try_join_all(futures).boxed())
    }

    fn remove_any(&self, key: Option<&(dyn Any + Send + Sync)>) -> Result<bool> {
        let key = key.ok_or(Error::ArgumentNull("key"))?;
        let key = key
            .downcast_ref::<K>()
            .ok_or(Error::KeyType(type_name::<K>()))?;
        Ok(self.remove(key))
    }

    fn set_any(&self, key: Option<AnyKey>, value: Option<AnyFuture>) -> Result<bool> {
        let key = downcast_key::<K>(key)?;
        let value = value.ok_or(Error::ArgumentNull("value"))?;
        let future = LoadFuture::from_future(
            value.map(|result| result.and_then(downcast_value::<L::Value>)),
        );
        Ok(self.set(key, future))
    }

    fn clear_any(&self) {
        self.clear()
    }

    fn dispatch_any(&self, cancel: Option<CancellationToken>) -> BoxFuture<'_, ()> {
        async move {
            match cancel {
                Some(cancel) => self.dispatch_with(&cancel).await,
                None => self.dispatch().await,
            }
        }
        .boxed()
    }
}
