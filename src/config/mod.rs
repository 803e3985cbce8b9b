//! Configuration management for Convoy

pub mod duration;
pub mod schema;

pub use duration::{format_bytes, format_duration, parse_ttl};
pub use schema::Config;

use crate::error::{ConvoyError, ConvoyResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("convoy")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("convoy")
    }

    /// Default content-addressable store root
    pub fn default_store_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(Self::state_dir)
            .join("convoy")
            .join("store")
    }

    /// Default workspace root
    pub fn default_workspace_root() -> PathBuf {
        Self::state_dir().join("workspaces")
    }

    /// Get the audit log path
    pub fn audit_log_path() -> PathBuf {
        Self::state_dir().join("audit.log")
    }

    /// Store root from config, falling back to the default
    pub fn store_root(config: &Config) -> PathBuf {
        config
            .store
            .root
            .clone()
            .unwrap_or_else(Self::default_store_root)
    }

    /// Workspace root from config, falling back to the default
    pub fn workspace_root(config: &Config) -> PathBuf {
        config
            .workspace
            .root
            .clone()
            .unwrap_or_else(Self::default_workspace_root)
    }

    /// Audit log path from config, falling back to the default
    pub fn audit_path(config: &Config) -> PathBuf {
        config
            .general
            .audit_path
            .clone()
            .unwrap_or_else(Self::audit_log_path)
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> ConvoyResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> ConvoyResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ConvoyError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| ConvoyError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        // Surface bad durations at load time rather than mid-run
        for value in [
            &config.store.gc_older_than,
            &config.store.mutable_ref_ttl,
            &config.workspace.expire_after,
        ] {
            parse_ttl(value).map_err(|e| ConvoyError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> ConvoyResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            ConvoyError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> ConvoyResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ConvoyError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config.executor.concurrency, 4);
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.executor.concurrency = 8;
        config.workspace.retain = true;

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.executor.concurrency, 8);
        assert!(loaded.workspace.retain);
    }

    #[tokio::test]
    async fn load_rejects_bad_duration() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[workspace]\nexpire_after = \"forever\"\n").unwrap();

        let err = ConfigManager::with_path(path).load().await.unwrap_err();
        assert!(matches!(err, ConvoyError::ConfigInvalid { .. }));
    }

    #[test]
    fn roots_prefer_configured_paths() {
        let mut config = Config::default();
        config.store.root = Some(PathBuf::from("/tmp/store"));
        assert_eq!(ConfigManager::store_root(&config), PathBuf::from("/tmp/store"));
        assert!(ConfigManager::workspace_root(&config).ends_with("workspaces"));
    }
}
