//! Reading and parsing individual config documents.

use crate::ConfigError;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;

/// On-disk document format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Determine the format from `.yaml`, `.yml` or `.json`.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "json" => Ok(ConfigFormat::Json),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension: ext,
            }),
        }
    }
}

/// Parse one document into an untyped tree.
///
/// Empty documents become an empty mapping; any other non-mapping root is rejected.
pub fn parse_config_str(content: &str, format: ConfigFormat) -> Result<Value, String> {
    let value: Value = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string())?,
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string())?,
    };
    match value {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        Value::Mapping(_) => Ok(value),
        other => Err(format!(
            "top-level document must be a mapping, found {}",
            value_kind(&other)
        )),
    }
}

/// Read a config file from disk.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn read_config_file(path: &Path) -> Result<Option<Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let format = ConfigFormat::from_path(path)?;
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config_str(&content, format)
        .map(Some)
        .map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
