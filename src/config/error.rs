use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("'{field}' must be a port between 1 and 65535, got {value}")]
    InvalidPort { field: &'static str, value: i64 },
    #[error("unknown rules backend '{value}' (expected auto, netsh or simulated)")]
    UnknownRulesBackend { value: String },
    #[error("'{field}' must not be empty")]
    EmptyField { field: &'static str },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
