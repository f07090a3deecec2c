use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use derive_setters::Setters;
use serde::{Deserialize, Serialize};

use super::{ConfigError, SourceType};
use crate::core::is_default;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const MIN_CAPACITY: NonZeroUsize = NonZeroUsize::MIN;
pub const DEFAULT_DELAY: u64 = 1;

/// Options of a single [DataLoader](crate::core::data_loader::DataLoader).
///
/// Durations are expressed in milliseconds so the options can be written by
/// hand in a JSON or YAML file.
#[derive(Serialize, Deserialize, Clone, Debug, Setters, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    /// Maximum number of entries kept in the result cache. Values below
    /// `MIN_CAPACITY` are raised to it.
    pub capacity: usize,

    /// Entries not touched for this many milliseconds are evicted. `0`
    /// disables expiration.
    #[serde(skip_serializing_if = "is_default")]
    pub sliding_expiration: u64,

    pub caching: bool,

    pub batching: bool,

    /// Flush pending keys from a background task instead of waiting for an
    /// explicit dispatch.
    pub auto_dispatching: bool,

    /// Milliseconds the background task waits to collect keys before it
    /// dispatches a batch.
    pub delay: u64,

    /// Upper bound of keys per fetch. `0` means unbounded.
    #[serde(skip_serializing_if = "is_default")]
    pub max_batch_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            sliding_expiration: 0,
            caching: true,
            batching: true,
            auto_dispatching: false,
            delay: DEFAULT_DELAY,
            max_batch_size: 0,
        }
    }
}

impl Options {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_json(&self, pretty: bool) -> Result<String, ConfigError> {
        if pretty {
            Ok(serde_json::to_string_pretty(self)?)
        } else {
            Ok(serde_json::to_string(self)?)
        }
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_source(source: SourceType, content: &str) -> Result<Self, ConfigError> {
        match source {
            SourceType::Json => Self::from_json(content),
            SourceType::Yml => Self::from_yaml(content),
        }
    }

    /// Reads options from a file, picking the format from its extension.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = SourceType::detect(&path.to_string_lossy())?;
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_source(source, &content)
    }
}

/// Normalized form of [Options] consumed by the loader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub capacity: NonZeroUsize,
    pub sliding_expiration: Option<Duration>,
    pub caching: bool,
    pub batching: bool,
    pub auto_dispatching: bool,
    pub delay: Duration,
    pub max_batch_size: Option<NonZeroUsize>,
}

impl Default for Settings {
    fn default() -> Self {
        Options::default().into()
    }
}

impl From<Options> for Settings {
    fn from(options: Options) -> Self {
        let capacity = NonZeroUsize::new(options.capacity)
            .map_or(MIN_CAPACITY, |capacity| capacity.max(MIN_CAPACITY));

        Settings {
            capacity,
            sliding_expiration: (options.sliding_expiration > 0)
                .then(|| Duration::from_millis(options.sliding_expiration)),
            caching: options.caching,
            batching: options.batching,
            auto_dispatching: options.auto_dispatching,
            delay: Duration::from_millis(options.delay),
            max_batch_size: NonZeroUsize::new(options.max_batch_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::from(Options::default());
        assert_eq!(settings.capacity.get(), DEFAULT_CAPACITY);
        assert_eq!(settings.sliding_expiration, None);
        assert!(settings.caching);
        assert!(settings.batching);
        assert!(!settings.auto_dispatching);
        assert_eq!(settings.delay, Duration::from_millis(DEFAULT_DELAY));
        assert_eq!(settings.max_batch_size, None);
    }

    #[test]
    fn test_capacity_is_floored() {
        let settings = Settings::from(Options::default().capacity(0));
        assert_eq!(settings.capacity, MIN_CAPACITY);

        let settings = Settings::from(Options::default().capacity(2));
        assert_eq!(settings.capacity.get(), 2);
    }

    #[test]
    fn test_durations() {
        let settings = Settings::from(
            Options::default()
                .sliding_expiration(250)
                .delay(10)
                .max_batch_size(50),
        );
        assert_eq!(
            settings.sliding_expiration,
            Some(Duration::from_millis(250))
        );
        assert_eq!(settings.delay, Duration::from_millis(10));
        assert_eq!(settings.max_batch_size.map(NonZeroUsize::get), Some(50));
    }

    #[test]
    fn test_from_json() {
        let options = Options::from_json(
            r#"{"capacity": 20, "slidingExpiration": 500, "autoDispatching": true}"#,
        )
        .unwrap();
        let expected = Options::default()
            .capacity(20)
            .sliding_expiration(500)
            .auto_dispatching(true);
        assert_eq!(options, expected);
    }

    #[test]
    fn test_from_yaml() {
        let options = Options::from_yaml("batching: false\nmaxBatchSize: 3\n").unwrap();
        let expected = Options::default().batching(false).max_batch_size(3);
        assert_eq!(options, expected);
    }

    #[test]
    fn test_json_skips_defaults() {
        let json = Options::default().to_json(false).unwrap();
        assert_eq!(
            json,
            r#"{"capacity":1000,"caching":true,"batching":true,"autoDispatching":false,"delay":1}"#
        );
    }

    #[tokio::test]
    async fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loader.yml");
        tokio::fs::write(&path, "capacity: 7\n").await.unwrap();

        let options = Options::from_file(&path).await.unwrap();
        assert_eq!(options, Options::default().capacity(7));
    }

    #[tokio::test]
    async fn test_from_file_unsupported() {
        let error = Options::from_file("loader.toml").await.unwrap_err();
        assert!(matches!(error, ConfigError::UnsupportedConfigFormat(_)));
    }
}
