//! Layered configuration for the `dirwatch` binary.
//!
//! Sources, lowest precedence first:
//! - Built-in defaults
//! - `.dirwatch/settings.toml`, found in the current directory or an ancestor
//! - Environment variables prefixed with `DIRWATCH_`
//!
//! # Environment Variables
//!
//! Double underscores separate nested levels:
//! - `DIRWATCH_WATCH__RECURSIVE=false` sets `watch.recursive`
//! - `DIRWATCH_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, WatchError};

const CONFIG_DIR: &str = ".dirwatch";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "DIRWATCH_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// Watch subdirectories as well as the root
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Glob patterns for paths to ignore
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for all targets
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target level overrides, e.g. `dirwatch::registry = "trace"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            ignore_patterns: vec![
                "*.swp".to_string(),
                "*~".to_string(),
                ".#*".to_string(),
            ],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

fn env_provider() -> Env {
    Env::prefixed(ENV_PREFIX).map(|key| key.as_str().to_lowercase().replace("__", ".").into())
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration using a specific file in place of the discovered one.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(env_provider())
            .extract()
            .map_err(WatchError::from)
    }

    /// Search from the current directory upwards for `.dirwatch/settings.toml`.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|dir| dir.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join(CONFIG_FILE))
    }

    /// Write the settings as TOML, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| WatchError::system("cannot create directory", parent, e))?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| WatchError::Config {
            reason: e.to_string(),
        })?;
        std::fs::write(path, toml_string).map_err(|e| WatchError::system("cannot write", path, e))
    }

    /// Create a default settings file in the current directory.
    pub fn init_config_file(force: bool) -> Result<PathBuf> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err(WatchError::Config {
                reason: format!(
                    "{} already exists, use --force to overwrite",
                    config_path.display()
                ),
            });
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert!(settings.watch.recursive);
        assert!(settings.watch.ignore_patterns.contains(&"*.swp".to_string()));
        assert_eq!(settings.logging.default, "warn");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[watch]
recursive = false
ignore_patterns = ["target"]

[logging]
default = "info"

[logging.modules]
"dirwatch::registry" = "trace"
"#;
        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert!(!settings.watch.recursive);
        assert_eq!(settings.watch.ignore_patterns, vec!["target"]);
        assert_eq!(settings.logging.default, "info");
        assert_eq!(settings.logging.modules["dirwatch::registry"], "trace");
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[logging]\ndefault = \"debug\"\n").unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.logging.default, "debug");
        assert!(settings.watch.recursive);
        assert!(!settings.watch.ignore_patterns.is_empty());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_from(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.watch, WatchConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[watch]\nrecursive = \"sometimes\"\n").unwrap();

        let err = Settings::load_from(&config_path).unwrap_err();
        assert!(matches!(err, WatchError::Config { .. }));
    }

    #[test]
    fn test_save_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.watch.recursive = false;
        settings.logging.default = "trace".to_string();
        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded, settings);
    }
}
