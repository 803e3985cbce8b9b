//! Workspace preparation ahead of a component's handler

use crate::error::{ConvoyError, ConvoyResult};
use crate::graph::Component;
use crate::store::{CachePolicy, SourceDescriptor, SourceProvider, Store};
use crate::workspace::{RunId, Workspace, WorkspaceManager};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

/// Gives each component its workspace with its source files in place
pub struct Preparer {
    store: Arc<Store>,
    workspaces: Arc<WorkspaceManager>,
    provider: Option<Arc<dyn SourceProvider>>,
}

impl Preparer {
    pub fn new(store: Arc<Store>, workspaces: Arc<WorkspaceManager>) -> Self {
        Self {
            store,
            workspaces,
            provider: None,
        }
    }

    /// Fetcher used on cache misses; without one a miss fails the component
    pub fn with_provider(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn workspaces(&self) -> &Arc<WorkspaceManager> {
        &self.workspaces
    }

    /// Create the component's workspace and materialize its source into it
    pub async fn prepare(&self, run: RunId, component: &Component) -> ConvoyResult<Workspace> {
        let workspace = self
            .workspaces
            .component_workspace(run, &component.name)
            .await?;

        if let Some(source) = &component.source {
            let digest = self.resolve(source).await?;
            let report = self.store.checkout(&digest, &workspace.path).await?;
            debug!(
                component = %component.name,
                digest = %digest,
                files = report.files,
                linked = report.linked,
                "Materialized source"
            );
        }

        Ok(workspace)
    }

    /// Digest for `source`, fetching and storing it on a miss
    async fn resolve(&self, source: &SourceDescriptor) -> ConvoyResult<String> {
        if let Some(digest) = self.store.lookup(source).await {
            return Ok(digest);
        }

        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| ConvoyError::ReferenceNotFound(source.reference()))?;

        let staging = self.store.staging_dir();
        let stored = async {
            provider.fetch(source, &staging).await?;
            match source.policy() {
                CachePolicy::Permanent => self.store.put_dir(source, &staging).await,
                // Refreshing a branch may legitimately change its content
                CachePolicy::Mutable => self.store.update_dir(source, &staging).await,
            }
        }
        .await;

        if staging.exists() {
            let _ = fs::remove_dir_all(&staging).await;
        }

        let digest = stored?;
        info!(digest = %digest, "Fetched {}", source);
        Ok(digest)
    }
}
