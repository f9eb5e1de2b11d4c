//! Environment-variable overrides.

use crate::merge::{deep_merge, nested_value};
use crate::resolve::ConfigOptions;
use crate::ConfigError;
use serde_yaml::Value;

/// Tokens accepted as `true` for boolean overrides (case-insensitive).
pub const TRUTHY_TOKENS: &[&str] = &["true", "1", "yes", "on"];

/// How an override value is coerced before insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coerce {
    Text,
    Integer,
    Flag,
}

/// Recognized variables and the config key path they set.
const ENV_OVERRIDES: &[(&str, &[&str], Coerce)] = &[
    ("POSTCODEMON_LOG_LEVEL", &["logging", "level"], Coerce::Text),
    ("POSTCODEMON_LOG_FILE", &["logging", "file_path"], Coerce::Text),
    ("POSTCODEMON_TIMEOUT", &["global_timeout"], Coerce::Integer),
    ("POSTCODEMON_MAX_JOBS", &["max_concurrent_jobs"], Coerce::Integer),
    ("POSTCODEMON_TEMP_DIR", &["temp_directory"], Coerce::Text),
    ("POSTCODEMON_MONITORING", &["monitoring_enabled"], Coerce::Flag),
];

/// Names of every recognized override variable.
pub fn override_vars() -> impl Iterator<Item = &'static str> {
    ENV_OVERRIDES.iter().map(|(var, _, _)| *var)
}

/// Parse a boolean override value.
pub fn parse_flag(value: &str) -> bool {
    let lowered = value.trim().to_ascii_lowercase();
    TRUTHY_TOKENS.contains(&lowered.as_str())
}

/// Apply every override present in the options' environment to `tree`.
pub fn apply_env_overrides(tree: &mut Value, options: &ConfigOptions) -> Result<(), ConfigError> {
    for (var, path, coerce) in ENV_OVERRIDES {
        let Some(raw) = options.env_var(var) else {
            continue;
        };
        let value = match coerce {
            Coerce::Text => Value::from(raw),
            Coerce::Flag => Value::from(parse_flag(&raw)),
            Coerce::Integer => {
                let parsed: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    var: var.to_string(),
                    value: raw.clone(),
                    expected: "non-negative integer",
                })?;
                Value::from(parsed)
            }
        };
        tracing::debug!(var, "applying environment override");
        deep_merge(tree, nested_value(path, value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    fn options_with(pairs: &[(&str, &str)]) -> ConfigOptions {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConfigOptions::isolated(Path::new("/nonexistent")).with_env(env)
    }

    #[test]
    fn test_overrides_applied_with_types() {
        let mut tree: Value = serde_yaml::from_str("logging: {level: INFO, backup_count: 2}").unwrap();
        let options = options_with(&[
            ("POSTCODEMON_LOG_LEVEL", "DEBUG"),
            ("POSTCODEMON_TIMEOUT", "90"),
            ("POSTCODEMON_MAX_JOBS", " 4 "),
            ("POSTCODEMON_TEMP_DIR", "/scratch"),
            ("POSTCODEMON_MONITORING", "off"),
        ]);
        apply_env_overrides(&mut tree, &options).unwrap();

        let expected: Value = serde_yaml::from_str(
            "logging: {level: DEBUG, backup_count: 2}\nglobal_timeout: 90\nmax_concurrent_jobs: 4\ntemp_directory: /scratch\nmonitoring_enabled: false",
        )
        .unwrap();
        assert_eq!(tree, expected);
    }

    #[test]
    fn test_invalid_integer_names_variable() {
        let mut tree = Value::Null;
        let options = options_with(&[("POSTCODEMON_MAX_JOBS", "many")]);
        let err = apply_env_overrides(&mut tree, &options).unwrap_err();
        match err {
            ConfigError::InvalidEnv { var, value, .. } => {
                assert_eq!(var, "POSTCODEMON_MAX_JOBS");
                assert_eq!(value, "many");
            }
            other => panic!("expected InvalidEnv, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_integer_names_variable() {
        let mut tree = Value::Null;
        let options = options_with(&[("POSTCODEMON_TIMEOUT", "-5")]);
        match apply_env_overrides(&mut tree, &options).unwrap_err() {
            ConfigError::InvalidEnv { var, value, .. } => {
                assert_eq!(var, "POSTCODEMON_TIMEOUT");
                assert_eq!(value, "-5");
            }
            other => panic!("expected InvalidEnv, got {:?}", other),
        }
        assert_eq!(tree, Value::Null);
    }

    #[test]
    fn test_flag_tokens() {
        for token in ["true", "TRUE", "1", "yes", "On"] {
            assert!(parse_flag(token), "{token} should be truthy");
        }
        for token in ["false", "0", "no", "off", "", "enabled"] {
            assert!(!parse_flag(token), "{token} should be falsy");
        }
    }

    #[test]
    fn test_no_env_no_change() {
        let mut tree: Value = serde_yaml::from_str("global_timeout: 5").unwrap();
        apply_env_overrides(&mut tree, &options_with(&[])).unwrap();
        assert_eq!(tree, serde_yaml::from_str::<Value>("global_timeout: 5").unwrap());
    }

    #[test]
    fn test_override_vars_listed() {
        let vars: Vec<_> = override_vars().collect();
        assert!(vars.contains(&"POSTCODEMON_LOG_FILE"));
        assert_eq!(vars.len(), 6);
    }
}
