use std::sync::Arc;

/// Errors observed by callers of a [DataLoader](crate::core::data_loader::DataLoader).
///
/// The error is `Clone` because a single failure is shared by every caller
/// awaiting the same key.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("Argument `{0}` must not be null")]
    ArgumentNull(&'static str),

    #[error("Expected a key of type `{0}`")]
    KeyType(&'static str),

    #[error("Expected a value of type `{0}`")]
    ValueType(&'static str),

    #[error("Batch fetch returned {actual} results for {expected} keys")]
    KeyCountMismatch { expected: usize, actual: usize },

    #[error("Batch fetch failed: {0}")]
    BatchFetch(Arc<anyhow::Error>),

    #[error("Failed to load key: {0}")]
    Key(Arc<anyhow::Error>),

    #[error("Load was canceled")]
    Canceled,

    #[error("DataLoader has been disposed")]
    Disposed,
}

impl Error {
    pub fn batch_fetch(error: impl Into<anyhow::Error>) -> Self {
        Error::BatchFetch(Arc::new(error.into()))
    }

    pub fn key(error: impl Into<anyhow::Error>) -> Self {
        Error::Key(Arc::new(error.into()))
    }
}

pub type Result<A> = std::result::Result<A, Error>;
