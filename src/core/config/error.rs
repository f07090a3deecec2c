use derive_more::From;

use super::UnsupportedConfigFormat;

#[derive(From, thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Std IO Error: {0}")]
    StdIO(std::io::Error),

    #[error("Serde Json Error: {0}")]
    SerdeJson(serde_json::Error),

    #[error("Serde Yaml Error: {0}")]
    SerdeYaml(serde_yaml::Error),

    #[error("{0}")]
    UnsupportedConfigFormat(UnsupportedConfigFormat),
}
