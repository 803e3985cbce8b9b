//! Per-run, per-component working directories

pub mod manager;
pub mod metadata;

pub use manager::{CleanupOutcome, RunInfo, Workspace, WorkspaceManager};
pub use metadata::{RunId, RunMetadata};
