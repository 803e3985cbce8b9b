//! Workspace lifecycle management

use crate::error::{ConvoyError, ConvoyResult};
use crate::graph::validate_name;
use crate::workspace::metadata::{RunId, RunMetadata};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An isolated directory handed to one component in one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workspace {
    pub id: Uuid,
    pub run_id: RunId,
    pub component: Option<String>,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub retained: bool,
}

/// What happened to a run root at cleanup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    Retained(PathBuf),
    /// No component workspace was ever created for the run
    NotCreated,
    Failed(PathBuf, String),
}

/// A run root found on disk
#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub run_id: RunId,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub retained: bool,
    pub components: Vec<String>,
}

#[derive(Debug)]
struct RunState {
    metadata: RunMetadata,
    workspaces: HashMap<String, Workspace>,
}

/// Creates and removes per-run, per-component directories under one root
#[derive(Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
    runs: Mutex<HashMap<RunId, RunState>>,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a new run. Nothing is created on disk until the first
    /// component workspace is requested.
    pub fn new_run(&self) -> RunId {
        RunId::new()
    }

    pub fn run_path(&self, run: RunId) -> PathBuf {
        self.root.join(run.to_string())
    }

    /// Directory for `component` within `run`, created on first request.
    ///
    /// Repeat calls return the same workspace without touching the disk.
    pub async fn component_workspace(&self, run: RunId, component: &str) -> ConvoyResult<Workspace> {
        validate_name(component)?;
        let run_root = self.run_path(run);

        let mut runs = self.runs.lock().await;
        if let Some(existing) = runs.get(&run).and_then(|s| s.workspaces.get(component)) {
            return Ok(existing.clone());
        }

        let path = run_root.join(component);
        fs::create_dir_all(&path)
            .await
            .map_err(|source| ConvoyError::WorkspaceCreate {
                path: path.clone(),
                source,
            })?;

        let state = runs.entry(run).or_insert_with(|| RunState {
            metadata: RunMetadata::new(run),
            workspaces: HashMap::new(),
        });
        state.metadata.touch(component);
        state.metadata.save(&run_root).await?;

        let workspace = Workspace {
            id: Uuid::new_v4(),
            run_id: run,
            component: Some(component.to_string()),
            path,
            created_at: Utc::now(),
            retained: false,
        };
        state
            .workspaces
            .insert(component.to_string(), workspace.clone());

        debug!(run = %run, component, "Created workspace {}", workspace.path.display());
        Ok(workspace)
    }

    /// Remove everything created for `run`, or keep it when `retain` is set.
    ///
    /// Removal failures are logged and reported, never raised.
    pub async fn cleanup(&self, run: RunId, retain: bool) -> CleanupOutcome {
        let run_root = self.run_path(run);
        let state = self.runs.lock().await.remove(&run);

        if !run_root.exists() {
            return CleanupOutcome::NotCreated;
        }

        if retain {
            let mut metadata = match state {
                Some(state) => state.metadata,
                None => RunMetadata::load(&run_root)
                    .await
                    .unwrap_or_else(|| RunMetadata::new(run)),
            };
            metadata.retained = true;
            if let Err(e) = metadata.save(&run_root).await {
                warn!(run = %run, error = %e, "Failed to mark run as retained");
            }
            info!(run = %run, "Retained workspaces at {}", run_root.display());
            return CleanupOutcome::Retained(run_root);
        }

        match fs::remove_dir_all(&run_root).await {
            Ok(()) => {
                debug!(run = %run, "Removed workspaces at {}", run_root.display());
                CleanupOutcome::Removed
            }
            Err(e) => {
                warn!(
                    run = %run,
                    error = %e,
                    "Failed to remove workspaces at {}",
                    run_root.display()
                );
                CleanupOutcome::Failed(run_root, e.to_string())
            }
        }
    }

    /// Every run root under the workspace root, oldest first
    pub async fn list_runs(&self) -> ConvoyResult<Vec<RunInfo>> {
        if !self.root.exists() {
            return Ok(vec![]);
        }

        let mut runs = vec![];
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| ConvoyError::io(format!("reading {}", self.root.display()), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ConvoyError::io("reading workspace entry", e))?
        {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Ok(run_id) = entry.file_name().to_string_lossy().parse::<RunId>() else {
                continue;
            };
            runs.push(Self::describe(run_id, path).await);
        }

        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }

    async fn describe(run_id: RunId, path: PathBuf) -> RunInfo {
        if let Some(meta) = RunMetadata::load(&path).await {
            return RunInfo {
                run_id,
                path,
                created_at: meta.created_at,
                last_accessed: meta.last_accessed,
                retained: meta.retained,
                components: meta.components,
            };
        }

        // No metadata: fall back to the directory's own timestamps
        let modified: DateTime<Utc> = fs::metadata(&path)
            .await
            .and_then(|m| m.modified())
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());
        RunInfo {
            run_id,
            path,
            created_at: modified,
            last_accessed: modified,
            retained: false,
            components: vec![],
        }
    }

    /// Remove run roots not accessed within `ttl`
    pub async fn clean_expired(&self, ttl: Duration, dry_run: bool) -> ConvoyResult<Vec<RunInfo>> {
        let Some(cutoff) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return Ok(vec![]);
        };
        let expired: Vec<RunInfo> = self
            .list_runs()
            .await?
            .into_iter()
            .filter(|r| r.last_accessed < cutoff)
            .collect();
        self.remove_runs(expired, dry_run).await
    }

    /// Remove every run root
    pub async fn clean_all(&self, dry_run: bool) -> ConvoyResult<Vec<RunInfo>> {
        let runs = self.list_runs().await?;
        self.remove_runs(runs, dry_run).await
    }

    async fn remove_runs(&self, runs: Vec<RunInfo>, dry_run: bool) -> ConvoyResult<Vec<RunInfo>> {
        if dry_run {
            return Ok(runs);
        }

        let mut removed = Vec::with_capacity(runs.len());
        for run in runs {
            // Failures are already logged by cleanup
            if self.cleanup(run.run_id, false).await == CleanupOutcome::Removed {
                info!(run = %run.run_id, "Cleaned workspaces");
                removed.push(run);
            }
        }
        Ok(removed)
    }
}
