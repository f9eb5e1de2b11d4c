//! Cached, layered configuration loading.

use crate::env::apply_env_overrides;
use crate::load::{read_config_file, ConfigFormat};
use crate::merge::deep_merge;
use crate::model::{ToolConfig, WrapperConfig};
use crate::resolve::{ConfigLayer, ConfigOptions};
use crate::ConfigError;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Debug)]
struct LoadedState {
    config: Arc<WrapperConfig>,
    sources: Vec<ConfigLayer>,
}

/// Loads and caches the merged [`WrapperConfig`].
///
/// The loaded config is shared as an `Arc` and never mutated; a reload
/// builds a fresh value and swaps it in wholesale.
#[derive(Debug)]
pub struct ConfigManager {
    options: ConfigOptions,
    state: Mutex<Option<LoadedState>>,
}

impl ConfigManager {
    /// Create a manager; nothing is read until [`load_config`](Self::load_config).
    pub fn new(options: ConfigOptions) -> Self {
        Self {
            options,
            state: Mutex::new(None),
        }
    }

    /// Discovery options in use.
    pub fn options(&self) -> &ConfigOptions {
        &self.options
    }

    /// Candidate files, highest precedence first.
    pub fn search_paths(&self) -> Vec<ConfigLayer> {
        self.options.search_layers()
    }

    /// Load (or return the cached) merged configuration.
    pub fn load_config(&self) -> Result<Arc<WrapperConfig>, ConfigError> {
        let mut state = self.lock_state();
        if let Some(loaded) = state.as_ref() {
            return Ok(Arc::clone(&loaded.config));
        }

        let loaded = self.load_uncached()?;
        let config = Arc::clone(&loaded.config);
        *state = Some(loaded);
        Ok(config)
    }

    /// Drop the cached configuration.
    pub fn invalidate(&self) {
        *self.lock_state() = None;
    }

    /// Discard the cache and load again from disk.
    pub fn reload(&self) -> Result<Arc<WrapperConfig>, ConfigError> {
        self.invalidate();
        self.load_config()
    }

    /// Files that contributed to the current cached config, lowest precedence first.
    pub fn sources(&self) -> Vec<ConfigLayer> {
        self.lock_state()
            .as_ref()
            .map(|loaded| loaded.sources.clone())
            .unwrap_or_default()
    }

    /// Look up one tool in the loaded configuration.
    pub fn get_tool_config(&self, name: &str) -> Result<Option<ToolConfig>, ConfigError> {
        Ok(self.load_config()?.tools.get(name).cloned())
    }

    /// Look up one named profile overlay.
    pub fn get_profile_config(&self, name: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.load_config()?.profiles.get(name).cloned())
    }

    /// Write `config` to `path`, or to the project-level file by default.
    ///
    /// JSON is written for a `.json` path, YAML otherwise. Parent
    /// directories are created as needed. Returns the path written.
    pub fn save_config(
        &self,
        config: &WrapperConfig,
        path: Option<&Path>,
    ) -> Result<PathBuf, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => self.options.project_config_path().ok_or_else(|| {
                ConfigError::Invalid("cannot determine project config directory".to_string())
            })?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let rendered = match ConfigFormat::from_path(&path) {
            Ok(ConfigFormat::Json) => serde_json::to_string_pretty(config)
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
            _ => serde_yaml::to_string(config).map_err(|e| ConfigError::Serialize(e.to_string()))?,
        };

        fs::write(&path, rendered).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), tools = config.tools.len(), "configuration saved");
        Ok(path)
    }

    fn load_uncached(&self) -> Result<LoadedState, ConfigError> {
        let mut tree = Value::Mapping(Mapping::new());
        let mut sources = Vec::new();

        for layer in self.options.search_layers().into_iter().rev() {
            match read_config_file(&layer.path)? {
                Some(document) => {
                    debug!(source = %layer.source, path = %layer.path.display(), "merging config layer");
                    deep_merge(&mut tree, document);
                    sources.push(layer);
                }
                None => {
                    debug!(source = %layer.source, path = %layer.path.display(), "config layer absent");
                }
            }
        }

        apply_env_overrides(&mut tree, &self.options)?;

        let mut config: WrapperConfig =
            serde_yaml::from_value(tree).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.assign_tool_names();

        info!(
            layers = sources.len(),
            tools = config.tools.len(),
            "configuration loaded"
        );

        Ok(LoadedState {
            config: Arc::new(config),
            sources,
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Option<LoadedState>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::{ConfigSource, CONFIG_FILENAME};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_defaults_without_files() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(ConfigOptions::isolated(dir.path()));
        let config = manager.load_config().unwrap();
        assert_eq!(*config, WrapperConfig::default());
        assert!(manager.sources().is_empty());
    }

    #[test]
    fn test_layer_precedence() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(
            &root.join("system").join(CONFIG_FILENAME),
            "global_timeout: 100\nmax_concurrent_jobs: 2\nlogging: {level: ERROR, backup_count: 9}",
        );
        write(
            &root.join("user").join(CONFIG_FILENAME),
            "global_timeout: 200\nlogging: {level: WARN}",
        );
        write(&root.join(CONFIG_FILENAME), "global_timeout: 300");
        let explicit = root.join("explicit.json");
        write(&explicit, r#"{"logging": {"level": "DEBUG"}}"#);

        let manager =
            ConfigManager::new(ConfigOptions::isolated(root).with_explicit_path(&explicit));
        let config = manager.load_config().unwrap();

        assert_eq!(config.global_timeout, 300);
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.logging.level, "DEBUG");
        assert_eq!(config.logging.backup_count, 9);

        let sources: Vec<_> = manager.sources().iter().map(|l| l.source).collect();
        assert_eq!(
            sources,
            vec![
                ConfigSource::System,
                ConfigSource::User,
                ConfigSource::Project,
                ConfigSource::Explicit
            ]
        );
    }

    #[test]
    fn test_env_overrides_win_over_files() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join(CONFIG_FILENAME), "global_timeout: 300");
        let mut env = HashMap::new();
        env.insert("POSTCODEMON_TIMEOUT".to_string(), "45".to_string());

        let manager = ConfigManager::new(ConfigOptions::isolated(dir.path()).with_env(env));
        assert_eq!(manager.load_config().unwrap().global_timeout, 45);
    }

    #[test]
    fn test_cached_until_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        write(&path, "global_timeout: 1");

        let manager = ConfigManager::new(ConfigOptions::isolated(dir.path()));
        let first = manager.load_config().unwrap();
        write(&path, "global_timeout: 2");

        assert_eq!(manager.load_config().unwrap().global_timeout, 1);
        assert!(Arc::ptr_eq(&first, &manager.load_config().unwrap()));
        assert_eq!(manager.reload().unwrap().global_timeout, 2);
        assert_eq!(first.global_timeout, 1);
    }

    #[test]
    fn test_broken_layer_fails_whole_load() {
        let dir = TempDir::new().unwrap();
        let user = dir.path().join("user").join(CONFIG_FILENAME);
        write(&dir.path().join(CONFIG_FILENAME), "global_timeout: 3");
        write(&user, "tools: {a: [");

        let manager = ConfigManager::new(ConfigOptions::isolated(dir.path()));
        match manager.load_config() {
            Err(ConfigError::Parse { path, .. }) => assert_eq!(path, user),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_names_assigned() {
        let dir = TempDir::new().unwrap();
        write(
            &dir.path().join(CONFIG_FILENAME),
            "tools:\n  echo_tool:\n    executable_path: /bin/echo\n    timeout_seconds: 5",
        );
        let manager = ConfigManager::new(ConfigOptions::isolated(dir.path()));
        let tool = manager.get_tool_config("echo_tool").unwrap().unwrap();
        assert_eq!(tool.name, "echo_tool");
        assert_eq!(tool.timeout_seconds, 5);
        assert!(manager.get_tool_config("missing").unwrap().is_none());
    }

    #[test]
    fn test_invalid_types_rejected() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join(CONFIG_FILENAME), "global_timeout: soon");
        let manager = ConfigManager::new(ConfigOptions::isolated(dir.path()));
        assert!(matches!(manager.load_config(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_profiles_lookup() {
        let dir = TempDir::new().unwrap();
        write(
            &dir.path().join(CONFIG_FILENAME),
            "profiles:\n  fast:\n    global_timeout: 10",
        );
        let manager = ConfigManager::new(ConfigOptions::isolated(dir.path()));
        let profile = manager.get_profile_config("fast").unwrap().unwrap();
        assert_eq!(profile.get("global_timeout"), Some(&Value::from(10)));
        // Profiles are not applied automatically.
        assert_eq!(manager.load_config().unwrap().global_timeout, 600);
    }

    #[test]
    fn test_save_defaults_to_project_path() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(ConfigOptions::isolated(dir.path()));
        let config = WrapperConfig::default().with_tool(ToolConfig::new("a", "/bin/true"));

        let written = manager.save_config(&config, None).unwrap();
        assert_eq!(written, dir.path().join(CONFIG_FILENAME));
        assert_eq!(manager.reload().unwrap().tools["a"].executable_path, "/bin/true");
    }
}
