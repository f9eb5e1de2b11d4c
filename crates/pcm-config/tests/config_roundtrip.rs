//! Save/reload and layered discovery tests against real files.
//!
//! Covers:
//! - Saving a WrapperConfig and reloading it reproduces the tool mapping
//! - YAML and JSON outputs
//! - Unsupported extension on an existing layer fails the load

use pcm_config::{
    ConfigError, ConfigManager, ConfigOptions, LoggingConfig, ToolConfig, ValidationRules,
    WrapperConfig, CONFIG_FILENAME,
};
use proptest::prelude::*;
use std::fs;
use tempfile::TempDir;

fn sample_config() -> WrapperConfig {
    let mut config = WrapperConfig {
        global_timeout: 120,
        max_concurrent_jobs: 3,
        temp_directory: Some("/var/tmp/pcm".to_string()),
        logging: LoggingConfig {
            level: "DEBUG".to_string(),
            json_format: true,
            ..LoggingConfig::default()
        },
        ..WrapperConfig::default()
    };
    config = config
        .with_tool(
            ToolConfig::new("echo_tool", "/bin/echo")
                .with_default_args(["hello"])
                .with_timeout_seconds(5)
                .with_retries(1, 0.5),
        )
        .with_tool(
            ToolConfig::new("flasher", "flashrom")
                .with_env("FLASH_MODE", "safe")
                .with_working_directory("/opt/flash")
                .with_validation_rules(
                    ValidationRules::default()
                        .require_args(["--image"])
                        .require_files([1]),
                ),
        );
    config
}

#[test]
fn test_save_and_reload_yaml() {
    let dir = TempDir::new().unwrap();
    let manager = ConfigManager::new(ConfigOptions::isolated(dir.path()));
    let original = sample_config();

    let path = manager.save_config(&original, None).unwrap();
    assert_eq!(path, dir.path().join(CONFIG_FILENAME));

    let reloaded = manager.reload().unwrap();
    assert_eq!(*reloaded, original);
}

#[test]
fn test_save_and_reload_json_explicit() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("nested").join("custom.json");
    let saver = ConfigManager::new(ConfigOptions::isolated(dir.path()));
    let original = sample_config();

    saver.save_config(&original, Some(&target)).unwrap();
    let raw = fs::read_to_string(&target).unwrap();
    assert!(raw.trim_start().starts_with('{'), "expected JSON, got: {raw}");

    let loader =
        ConfigManager::new(ConfigOptions::isolated(dir.path()).with_explicit_path(&target));
    let reloaded = loader.load_config().unwrap();
    assert_eq!(reloaded.tools, original.tools);
    assert_eq!(reloaded.logging, original.logging);
}

#[test]
fn test_unsupported_extension_fails() {
    let dir = TempDir::new().unwrap();
    let explicit = dir.path().join("postcodemon.toml");
    fs::write(&explicit, "global_timeout = 1").unwrap();

    let manager =
        ConfigManager::new(ConfigOptions::isolated(dir.path()).with_explicit_path(&explicit));
    match manager.load_config() {
        Err(ConfigError::UnsupportedFormat { path, extension }) => {
            assert_eq!(path, explicit);
            assert_eq!(extension, "toml");
        }
        other => panic!("expected UnsupportedFormat, got {:?}", other),
    }
}

#[test]
fn test_missing_explicit_path_is_ignored() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(CONFIG_FILENAME), "global_timeout: 77").unwrap();
    let manager = ConfigManager::new(
        ConfigOptions::isolated(dir.path()).with_explicit_path(dir.path().join("absent.yaml")),
    );
    assert_eq!(manager.load_config().unwrap().global_timeout, 77);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_tool_mapping_survives_roundtrip(
        tools in proptest::collection::btree_map(
            "[a-z][a-z0-9_]{0,10}",
            ("/[a-z]{1,8}/[a-z]{1,8}", 1u64..3600, 1u32..6),
            1..6,
        )
    ) {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(ConfigOptions::isolated(dir.path()));

        let mut config = WrapperConfig::default();
        for (name, (exe, timeout, retries)) in &tools {
            config = config.with_tool(
                ToolConfig::new(name.clone(), exe.clone())
                    .with_timeout_seconds(*timeout)
                    .with_retries(*retries, 1.0),
            );
        }

        manager.save_config(&config, None).unwrap();
        let reloaded = manager.reload().unwrap();

        prop_assert_eq!(reloaded.tools.len(), tools.len());
        for (name, (exe, timeout, retries)) in &tools {
            let tool = &reloaded.tools[name];
            prop_assert_eq!(&tool.name, name);
            prop_assert_eq!(&tool.executable_path, exe);
            prop_assert_eq!(tool.timeout_seconds, *timeout);
            prop_assert_eq!(tool.retry_attempts, *retries);
        }
    }
}
