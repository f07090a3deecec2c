#![allow(clippy::module_inception)]

pub mod config;
pub mod data_loader;
pub mod error;
pub mod tracing;

pub use error::{Error, Result};

pub fn is_default<T: Default + Eq>(val: &T) -> bool {
    *val == T::default()
}
