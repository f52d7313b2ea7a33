//! # tgfs-config
//!
//! Configuration management for tgfs.
//!
//! Loads configuration from:
//! 1. `~/.tgfs/config.toml` (global)
//! 2. `.tgfs/config.toml` (working-directory local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! Command-line flags are applied on top by the binary.

pub mod logging;
pub mod path;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub use path::StatePaths;

/// Default Bot API endpoint
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Default state directory (tilde is expanded on use)
pub const DEFAULT_STATE_DIR: &str = "~/.tgfs";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub state: StateConfig,
    pub vfs: VfsConfig,
    pub mount: MountConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let project = PathBuf::from(".tgfs/config.toml");
        let mut config = Self::load_from(global.as_deref(), Some(&project))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from explicit files without consulting the environment.
    ///
    /// Missing files are skipped. Keys present in `project` override the same
    /// keys in `global`; everything else keeps its global or default value.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        for path in [global, project].into_iter().flatten() {
            if path.exists() {
                debug!("Loading config from {:?}", path);
                let contents = std::fs::read_to_string(path)?;
                let table: toml::Table = toml::from_str(&contents)?;
                merge_tables(&mut merged, table);
            }
        }

        Ok(toml::Value::Table(merged).try_into()?)
    }

    /// Global config path: ~/.tgfs/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".tgfs/config.toml"))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("TGFS_BOT_TOKEN") {
            self.telegram.token = token;
        }
        if let Ok(base) = std::env::var("TGFS_API_BASE") {
            self.telegram.api_base = base;
        }
        if let Ok(dir) = std::env::var("TGFS_STATE_DIR") {
            self.state.dir = PathBuf::from(dir);
        }
        if let Ok(flag) = std::env::var("TGFS_SERIALIZE") {
            self.vfs.serialize_mutations = matches!(flag.as_str(), "1" | "true" | "yes");
        }
    }

    /// Resolved locations of the persisted state files
    pub fn state_paths(&self) -> StatePaths {
        StatePaths::new(path::expand_tilde(&self.state.dir))
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Bot API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token issued by @BotFather
    pub token: String,
    /// API base URL, without the `/bot<token>` suffix
    pub api_base: String,
    /// Long-poll timeout for the control listener
    pub poll_timeout_secs: u64,
    /// Per-request timeout for blob transfers
    pub request_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            poll_timeout_secs: 30,
            request_timeout_secs: 120,
        }
    }
}

impl TelegramConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Location of the local advisory state (chat binding, control pointer)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }
}

/// Storage engine behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Hold a process-wide lock across load..save of every mutating operation.
    /// Off by default: concurrent mutations are last-writer-wins on the manifest.
    pub serialize_mutations: bool,
    /// Directory for staging files during read/write (None = system temp)
    pub staging_dir: Option<PathBuf>,
    /// Attribute cache TTL handed to the kernel
    pub attr_ttl_secs: u64,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            serialize_mutations: false,
            staging_dir: None,
            attr_ttl_secs: 1,
        }
    }
}

/// FUSE mount options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub fs_name: String,
    pub auto_unmount: bool,
    pub allow_other: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fs_name: "tgfs".to_string(),
            auto_unmount: true,
            allow_other: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.telegram.api_base, DEFAULT_API_BASE);
        assert!(!config.vfs.serialize_mutations);
        assert_eq!(config.mount.fs_name, "tgfs");
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[telegram]"));
        assert!(toml_str.contains("[vfs]"));
        assert!(toml_str.contains("api.telegram.org"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.state.dir, parsed.state.dir);
        assert_eq!(config.telegram.poll_timeout_secs, parsed.telegram.poll_timeout_secs);
    }

    #[test]
    fn test_merge_keeps_untouched_keys() {
        let mut base: toml::Table = toml::from_str(
            r#"
[telegram]
token = "global"
poll_timeout_secs = 10
"#,
        )
        .unwrap();
        let overlay: toml::Table = toml::from_str(
            r#"
[telegram]
token = "project"
"#,
        )
        .unwrap();

        merge_tables(&mut base, overlay);
        let config: Config = toml::Value::Table(base).try_into().unwrap();
        assert_eq!(config.telegram.token, "project");
        assert_eq!(config.telegram.poll_timeout_secs, 10);
    }
}
