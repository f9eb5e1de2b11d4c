//! Configuration file discovery.
//!
//! Layers, lowest precedence first: system → user → project → explicit path.
//! Environment overrides are applied on top of the merged tree afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Standard config file name looked up in every directory layer.
pub const CONFIG_FILENAME: &str = "postcodemon.yaml";

/// Application name for per-user config directories.
const APP_NAME: &str = "postcodemon";

/// Which layer a configuration file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Found in the system config directory.
    System,

    /// Found in the user's config directory.
    User,

    /// Found in the project (working) directory.
    Project,

    /// Explicitly supplied by the caller.
    Explicit,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::System => write!(f, "system config"),
            ConfigSource::User => write!(f, "user config"),
            ConfigSource::Project => write!(f, "project config"),
            ConfigSource::Explicit => write!(f, "explicit path"),
        }
    }
}

/// A candidate config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayer {
    pub source: ConfigSource,
    pub path: PathBuf,
}

/// Options controlling where configuration is discovered.
///
/// Every location left as `None` falls back to the standard one, so
/// `ConfigOptions::default()` reproduces normal discovery. Tests pin all
/// locations and inject the environment to stay independent of the host.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    /// Highest-precedence file supplied by the caller.
    pub explicit_path: Option<PathBuf>,

    /// Directory searched for the project-level file (default: cwd).
    pub project_dir: Option<PathBuf>,

    /// User config directory (default: `<config_dir>/postcodemon`).
    pub user_config_dir: Option<PathBuf>,

    /// System config directory (default: `/etc/postcodemon`).
    pub system_config_dir: Option<PathBuf>,

    /// Environment used for overrides (default: the process environment).
    pub env: Option<HashMap<String, String>>,
}

impl ConfigOptions {
    /// Standard discovery with an explicit file on top.
    pub fn with_explicit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_path = Some(path.into());
        self
    }

    /// Override the project directory.
    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// Override the user config directory.
    pub fn with_user_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_config_dir = Some(dir.into());
        self
    }

    /// Override the system config directory.
    pub fn with_system_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.system_config_dir = Some(dir.into());
        self
    }

    /// Use `env` instead of the process environment for overrides.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Discovery confined to `root`, with an empty environment.
    ///
    /// Layout: `root/system`, `root/user`, and `root` itself as the project directory.
    pub fn isolated(root: &Path) -> Self {
        Self {
            explicit_path: None,
            project_dir: Some(root.to_path_buf()),
            user_config_dir: Some(root.join("user")),
            system_config_dir: Some(root.join("system")),
            env: Some(HashMap::new()),
        }
    }

    /// Look up an environment variable through the configured source.
    pub fn env_var(&self, key: &str) -> Option<String> {
        match &self.env {
            Some(env) => env.get(key).cloned(),
            None => std::env::var(key).ok(),
        }
    }

    /// Path of the project-level config file, if the project dir is known.
    pub fn project_config_path(&self) -> Option<PathBuf> {
        self.project_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .map(|dir| dir.join(CONFIG_FILENAME))
    }

    fn user_config_path(&self) -> Option<PathBuf> {
        self.user_config_dir
            .clone()
            .or_else(|| dirs::config_dir().map(|dir| dir.join(APP_NAME)))
            .map(|dir| dir.join(CONFIG_FILENAME))
    }

    fn system_config_path(&self) -> PathBuf {
        self.system_config_dir
            .clone()
            .unwrap_or_else(default_system_dir)
            .join(CONFIG_FILENAME)
    }

    /// Candidate files, highest precedence first.
    pub fn search_layers(&self) -> Vec<ConfigLayer> {
        let mut layers = Vec::with_capacity(4);
        if let Some(path) = &self.explicit_path {
            layers.push(ConfigLayer {
                source: ConfigSource::Explicit,
                path: path.clone(),
            });
        }
        if let Some(path) = self.project_config_path() {
            layers.push(ConfigLayer {
                source: ConfigSource::Project,
                path,
            });
        }
        if let Some(path) = self.user_config_path() {
            layers.push(ConfigLayer {
                source: ConfigSource::User,
                path,
            });
        }
        layers.push(ConfigLayer {
            source: ConfigSource::System,
            path: self.system_config_path(),
        });
        layers
    }
}

#[cfg(windows)]
fn default_system_dir() -> PathBuf {
    PathBuf::from("C:/ProgramData/PostCodeMon")
}

#[cfg(not(windows))]
fn default_system_dir() -> PathBuf {
    PathBuf::from("/etc").join(APP_NAME)
}
