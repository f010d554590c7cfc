//! Configuration loading and management
//!
//! Handles parsing of `taskflow.toml` configuration files. Every field
//! has a default, so a missing or empty file yields a working setup with
//! `tasks.json` and `audit.json` in the current directory. CLI flags and
//! their environment variables override whatever the file says.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default configuration file name
pub const CONFIG_FILE: &str = "taskflow.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage file locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Actor configuration
    #[serde(default)]
    pub actor: ActorConfig,

    /// Event publishing configuration
    #[serde(default)]
    pub publish: PublishConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            actor: ActorConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Task collection file
    #[serde(default = "default_tasks_file")]
    pub tasks_file: PathBuf,

    /// Audit log file
    #[serde(default = "default_audit_file")]
    pub audit_file: PathBuf,
}

fn default_tasks_file() -> PathBuf {
    PathBuf::from("tasks.json")
}

fn default_audit_file() -> PathBuf {
    PathBuf::from("audit.json")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            tasks_file: default_tasks_file(),
            audit_file: default_audit_file(),
        }
    }
}

/// Actor-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Default actor name when none specified
    #[serde(default = "default_actor")]
    pub default: String,
}

fn default_actor() -> String {
    "anonymous".to_string()
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            default: default_actor(),
        }
    }
}

/// Event publishing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Topic name attached to published events
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Per-publisher attempt timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Primary JSONL event sink; publishing is off when unset
    #[serde(default)]
    pub events_file: Option<PathBuf>,

    /// Fallback JSONL sink used when the primary fails
    #[serde(default)]
    pub fallback_file: Option<PathBuf>,
}

fn default_topic() -> String {
    "task-events".to_string()
}

fn default_timeout_secs() -> u64 {
    2
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            timeout_secs: default_timeout_secs(),
            events_file: None,
            fallback_file: None,
        }
    }
}

impl Config {
    /// Load configuration from a `taskflow.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `taskflow.toml` from a directory, or return defaults when the
    /// file does not exist. A present-but-invalid file is an error; it is
    /// never silently ignored.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.actor.default.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "actor.default cannot be empty".to_string(),
            ));
        }
        if self.publish.topic.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "publish.topic cannot be empty".to_string(),
            ));
        }
        if self.publish.timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "publish.timeout_secs must be > 0".to_string(),
            ));
        }
        if self.publish.events_file.is_none() && self.publish.fallback_file.is_some() {
            return Err(Error::InvalidConfig(
                "publish.fallback_file requires publish.events_file".to_string(),
            ));
        }
        Ok(())
    }
}
