//! Run metadata persisted alongside each run's workspaces

use crate::error::{ConvoyError, ConvoyResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use uuid::Uuid;

/// Metadata file name inside a run root
pub const METADATA_FILE: &str = ".convoy-run.json";

/// Identifier of one deployment run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RunId {
    type Err = ConvoyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ConvoyError::RunNotFound(s.to_string()))
    }
}

/// Persisted record of a run root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: RunId,

    pub created_at: DateTime<Utc>,

    /// Bumped whenever a component workspace is handed out
    pub last_accessed: DateTime<Utc>,

    /// Set when cleanup was skipped on request
    #[serde(default)]
    pub retained: bool,

    /// Component workspaces created under this run
    #[serde(default)]
    pub components: Vec<String>,
}

impl RunMetadata {
    pub fn new(run_id: RunId) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            created_at: now,
            last_accessed: now,
            retained: false,
            components: Vec::new(),
        }
    }

    /// Metadata file path for a run root
    pub fn file_path(run_root: &Path) -> PathBuf {
        run_root.join(METADATA_FILE)
    }

    /// Load metadata from a run root; `None` if absent or unreadable
    pub async fn load(run_root: &Path) -> Option<Self> {
        let content = fs::read_to_string(Self::file_path(run_root)).await.ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Write metadata into a run root
    pub async fn save(&self, run_root: &Path) -> ConvoyResult<()> {
        let path = Self::file_path(run_root);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)
            .await
            .map_err(|e| ConvoyError::write(format!("writing run metadata {}", path.display()), e))
    }

    /// Record a component workspace and bump last access
    pub fn touch(&mut self, component: &str) {
        if !self.components.iter().any(|c| c == component) {
            self.components.push(component.to_string());
        }
        self.last_accessed = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn run_id_parse_roundtrip() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-run".parse::<RunId>().is_err());
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[tokio::test]
    async fn save_and_load() {
        let temp = TempDir::new().unwrap();
        let mut meta = RunMetadata::new(RunId::new());
        meta.touch("api");
        meta.touch("api");
        meta.touch("db");
        meta.save(temp.path()).await.unwrap();

        let loaded = RunMetadata::load(temp.path()).await.unwrap();
        assert_eq!(loaded.run_id, meta.run_id);
        assert_eq!(loaded.components, vec!["api", "db"]);
        assert!(!loaded.retained);
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let temp = TempDir::new().unwrap();
        assert!(RunMetadata::load(temp.path()).await.is_none());
    }
}
