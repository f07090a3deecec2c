use tokio_util::sync::CancellationToken;

/// Trait for batch loading.
#[async_trait::async_trait]
pub trait Loader<K: Send + Sync + 'static>: Send + Sync + 'static {
    /// type of value.
    type Value: Send + Sync + Clone + 'static;

    /// Type of error.
    type Error: Into<anyhow::Error> + Send + 'static;

    /// Load the data set specified by the `keys`.
    ///
    /// Must return exactly one result per key, in the same order as `keys`.
    /// Returning `Err` fails every key of the batch. `cancel` fires when the
    /// loader is disposed or the caller gives up.
    async fn load(
        &self,
        keys: &[K],
        cancel: CancellationToken,
    ) -> Result<Vec<Result<Self::Value, Self::Error>>, Self::Error>;
}
