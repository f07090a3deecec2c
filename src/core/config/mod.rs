mod error;
mod options;
mod source;

pub use error::ConfigError;
pub use options::*;
pub use source::*;
