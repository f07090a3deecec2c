use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::Loader;

/// Loader over `u64` keys that records every batch it receives.
#[derive(Default)]
pub struct MockLoader {
    calls: Mutex<Vec<Vec<u64>>>,
    failing: HashSet<u64>,
    missing: HashSet<u64>,
    panicking: HashSet<u64>,
    short: bool,
    latency: Option<Duration>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any batch containing one of `keys` fails as a whole.
    pub fn failing(self, keys: impl IntoIterator<Item = u64>) -> Self {
        Self { failing: keys.into_iter().collect(), ..self }
    }

    /// `keys` resolve with a per-key error.
    pub fn missing(self, keys: impl IntoIterator<Item = u64>) -> Self {
        Self { missing: keys.into_iter().collect(), ..self }
    }

    pub fn panicking(self, keys: impl IntoIterator<Item = u64>) -> Self {
        Self { panicking: keys.into_iter().collect(), ..self }
    }

    /// Return one result less than requested.
    pub fn short(self) -> Self {
        Self { short: true, ..self }
    }

    pub fn latency(self, latency: Duration) -> Self {
        Self { latency: Some(latency), ..self }
    }

    pub fn calls(&self) -> Vec<Vec<u64>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetch_count(&self, key: u64) -> usize {
        self.calls().iter().flatten().filter(|k| **k == key).count()
    }
}

pub fn value(key: u64) -> String {
    format!("value-{}", key)
}

#[async_trait::async_trait]
impl Loader<u64> for MockLoader {
    type Value = String;
    type Error = anyhow::Error;

    async fn load(
        &self,
        keys: &[u64],
        _cancel: CancellationToken,
    ) -> anyhow::Result<Vec<anyhow::Result<String>>> {
        self.calls.lock().unwrap().push(keys.to_vec());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if keys.iter().any(|key| self.panicking.contains(key)) {
            panic!("loader exploded");
        }

        if keys.iter().any(|key| self.failing.contains(key)) {
            anyhow::bail!("backend unavailable");
        }

        let mut values: Vec<_> = keys
            .iter()
            .map(|key| {
                if self.missing.contains(key) {
                    Err(anyhow::anyhow!("key {} not found", key))
                } else {
                    Ok(value(*key))
                }
            })
            .collect();

        if self.short {
            values.pop();
        }

        Ok(values)
    }
}
