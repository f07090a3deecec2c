use std::env;
use std::str::FromStr;

use tracing::Subscriber;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

const LONG_ENV_FILTER_VAR_NAME: &str = "TAILCALL_LOG_LEVEL";
const SHORT_ENV_FILTER_VAR_NAME: &str = "TC_LOG_LEVEL";

fn level_from(long: Option<String>, short: Option<String>) -> tracing::Level {
    long.or(short)
        .and_then(|v| tracing::Level::from_str(&v).ok())
        // use the log level from the env if there is one, otherwise use the default.
        .unwrap_or(tracing::Level::INFO)
}

pub fn log_level() -> tracing::Level {
    level_from(
        env::var(LONG_ENV_FILTER_VAR_NAME).ok(),
        env::var(SHORT_ENV_FILTER_VAR_NAME).ok(),
    )
}

pub fn default_tracing() -> impl Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_max_level(log_level())
        .compact()
        .finish()
        .with(default_filter_target())
}

pub fn default_filter_target<S: Subscriber>() -> impl Layer<S> {
    filter_fn(|metadata| metadata.target().starts_with("tailcall_dataloader"))
}
