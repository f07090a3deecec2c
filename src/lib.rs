pub mod core;

pub use core::config::{Options, Settings};
pub use core::data_loader::{
    DataLoader, DataLoaderBuilder, ErasedDataLoader, LoadFuture, Loader, Observer,
};
pub use core::{Error, Result};
