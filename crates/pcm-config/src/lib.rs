//! Layered configuration for PostCodeMon.
//!
//! This crate provides:
//! - Typed tool, logging and wrapper configuration
//! - Discovery across system, user, project and explicit files
//! - Recursive merge of layers plus environment overrides
//! - Saving a configuration back to YAML or JSON

pub mod env;
pub mod load;
pub mod manager;
pub mod merge;
pub mod model;
pub mod resolve;

pub use load::{parse_config_str, ConfigFormat};
pub use manager::ConfigManager;
pub use model::{
    FileExistsRule, LoggingConfig, RequiredArgsRule, ToolConfig, ValidationRules, WrapperConfig,
};
pub use resolve::{ConfigLayer, ConfigOptions, ConfigSource, CONFIG_FILENAME};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load configuration from {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unsupported configuration file format '.{extension}' for {path}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("invalid value for {var}: '{value}' is not a valid {expected}")]
    InvalidEnv {
        var: String,
        value: String,
        expected: &'static str,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to serialize configuration: {0}")]
    Serialize(String),
}

impl ConfigError {
    /// File the error refers to, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ConfigError::Io { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::UnsupportedFormat { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl From<ConfigError> for pcm_common::Error {
    fn from(err: ConfigError) -> Self {
        pcm_common::Error::Configuration {
            path: err.path().cloned(),
            message: err.to_string(),
        }
    }
}
