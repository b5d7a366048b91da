//! Configuration
//!
//! Defines the structure of `scriptmill.toml`. Every field has a default, so
//! an empty or missing file yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use scriptmill_engine::DEFAULT_ENGINE_PREFERENCES;

use crate::error::ConfigError;

/// Default configuration file name
pub const CONFIG_FILE: &str = "scriptmill.toml";

/// Root configuration (scriptmill.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScriptmillConfig {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub scripting: ScriptingConfig,
}

/// Host runtime settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    #[serde(default = "default_host_name")]
    pub name: String,
    #[serde(default = "default_world_dir")]
    pub world_dir: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: default_host_name(),
            world_dir: default_world_dir(),
        }
    }
}

fn default_host_name() -> String {
    "scriptmill".to_string()
}

fn default_world_dir() -> PathBuf {
    PathBuf::from("world")
}

/// Script manager settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptingConfig {
    /// Directory under the world dir holding script files
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: String,
    /// Script file extension, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Engine capability names, tried in order
    #[serde(default = "default_engines")]
    pub engines: Vec<String>,
    /// How long a script waits for a host command result
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// How long shutdown waits for stopped scripts to unwind
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            scripts_dir: default_scripts_dir(),
            extension: default_extension(),
            engines: default_engines(),
            command_timeout_ms: default_command_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl ScriptingConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Script directory for the given world
    pub fn scripts_path(&self, world_dir: &Path) -> PathBuf {
        world_dir.join(&self.scripts_dir)
    }
}

fn default_scripts_dir() -> String {
    "scripts".to_string()
}

fn default_extension() -> String {
    "js".to_string()
}

fn default_engines() -> Vec<String> {
    DEFAULT_ENGINE_PREFERENCES
        .iter()
        .map(|name| name.to_string())
        .collect()
}

fn default_command_timeout_ms() -> u64 {
    100
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl ScriptmillConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.display());

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ScriptmillConfig::from_toml("").unwrap();
        assert_eq!(config, ScriptmillConfig::default());
        assert_eq!(config.scripting.command_timeout(), Duration::from_millis(100));
        assert_eq!(config.scripting.engines, vec!["quickjs", "javascript", "js"]);
        assert_eq!(
            config.scripting.scripts_path(&config.host.world_dir),
            PathBuf::from("world/scripts")
        );
    }

    #[test]
    fn test_partial_config() {
        let config = ScriptmillConfig::from_toml(
            r#"
            [host]
            world_dir = "/srv/world"

            [scripting]
            engines = ["js"]
            command_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.host.name, "scriptmill");
        assert_eq!(config.host.world_dir, PathBuf::from("/srv/world"));
        assert_eq!(config.scripting.engines, vec!["js"]);
        assert_eq!(config.scripting.command_timeout_ms, 250);
        assert_eq!(config.scripting.extension, "js");
    }

    #[test]
    fn test_load_missing_and_invalid() {
        let dir = TempDir::new().unwrap();

        let missing = ScriptmillConfig::load(dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(missing, ScriptmillConfig::default());

        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[scripting\nbroken").unwrap();
        assert!(matches!(
            ScriptmillConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
