//! Configuration schema for Convoy
//!
//! Configuration is stored at `~/.config/convoy/config.toml`

use crate::config::duration::parse_ttl;
use crate::error::ConvoyResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Content-addressable store settings
    pub store: StoreConfig,

    /// Workspace settings
    pub workspace: WorkspaceConfig,

    /// Wave executor settings
    pub executor: ExecutorConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging of destructive maintenance
    pub audit_log: bool,

    /// Audit log location (defaults to the state directory)
    pub audit_path: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: true,
            audit_path: None,
        }
    }
}

/// Content-addressable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Cache root (defaults to the user cache directory)
    pub root: Option<PathBuf>,

    /// GC removes unreferenced objects not accessed within this window
    pub gc_older_than: String,

    /// How long a branch-like (mutable) source binding is trusted
    pub mutable_ref_ttl: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: None,
            gc_older_than: "7d".to_string(),
            mutable_ref_ttl: "1h".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn gc_threshold(&self) -> ConvoyResult<Duration> {
        parse_ttl(&self.gc_older_than)
    }

    pub fn mutable_ttl(&self) -> ConvoyResult<Duration> {
        parse_ttl(&self.mutable_ref_ttl)
    }
}

/// Workspace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Workspace root (defaults to the state directory)
    pub root: Option<PathBuf>,

    /// Keep run workspaces after the run for debugging
    pub retain: bool,

    /// Run directories untouched for this long are removed by `workspace clean --expired`
    pub expire_after: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: None,
            retain: false,
            expire_after: "7d".to_string(),
        }
    }
}

/// Wave executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum components running at once within a wave (0 = unlimited)
    pub concurrency: usize,

    /// Skip components still waiting for a worker once the run is cancelled
    pub halt_dispatch_on_cancel: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            halt_dispatch_on_cancel: true,
        }
    }
}
