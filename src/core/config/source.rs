use thiserror::Error;

use super::{ConfigError, Options};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SourceType {
    #[default]
    Json,
    Yml,
}

const JSON_EXT: &str = "json";
const YML_EXT: &str = "yml";
const YAML_EXT: &str = "yaml";
const ALL: [SourceType; 2] = [SourceType::Json, SourceType::Yml];

#[derive(Debug, Error, PartialEq)]
#[error("Unsupported config extension: {0}")]
pub struct UnsupportedConfigFormat(pub String);

impl std::str::FromStr for SourceType {
    type Err = UnsupportedConfigFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(SourceType::Json),
            "yml" | "yaml" => Ok(SourceType::Yml),
            _ => Err(UnsupportedConfigFormat(s.to_string())),
        }
    }
}

impl SourceType {
    /// Get the file extension for the given format
    pub fn ext(&self) -> &'static str {
        match self {
            SourceType::Json => JSON_EXT,
            SourceType::Yml => YML_EXT,
        }
    }

    fn ends_with(&self, file: &str) -> bool {
        match self {
            SourceType::Json => file.ends_with(&format!(".{}", JSON_EXT)),
            SourceType::Yml => {
                file.ends_with(&format!(".{}", YML_EXT))
                    || file.ends_with(&format!(".{}", YAML_EXT))
            }
        }
    }

    /// Detect the config format from the file name
    pub fn detect(name: &str) -> Result<SourceType, UnsupportedConfigFormat> {
        ALL.into_iter()
            .find(|format| format.ends_with(name))
            .ok_or(UnsupportedConfigFormat(name.to_string()))
    }

    /// Encode the options to the given format
    pub fn encode(&self, options: &Options) -> Result<String, ConfigError> {
        match self {
            SourceType::Yml => options.to_yaml(),
            SourceType::Json => options.to_json(true),
        }
    }

    /// Decode the options from the given data
    pub fn decode(&self, data: &str) -> Result<Options, ConfigError> {
        Options::from_source(*self, data)
    }
}
