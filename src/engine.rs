//! Deployment run orchestration
//!
//! A run moves through `Pending -> GraphBuilding -> WaveExecuting ->
//! (WaveRunning -> WaveSucceeded | WaveFailed)* -> Cleanup -> Done`, or ends
//! in `Failed` when the component set itself is invalid.

use crate::audit::{events, AuditLog};
use crate::config::{Config, ConfigManager};
use crate::error::ConvoyResult;
use crate::executor::{
    ComponentHandler, ExecutionContext, Preparer, RunPhase, RunResult, WaveExecutor,
};
use crate::graph::{Component, DependencyGraph};
use crate::store::{SourceProvider, Store};
use crate::workspace::{CleanupOutcome, WorkspaceManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Knobs for a deployment run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Maximum components in flight per wave (0 = unlimited)
    pub concurrency: usize,
    /// Keep run workspaces after the run instead of removing them
    pub retain_workspaces: bool,
    /// Skip not-yet-started components of a wave once cancelled
    pub halt_dispatch_on_cancel: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retain_workspaces: false,
            halt_dispatch_on_cancel: true,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.executor.concurrency,
            retain_workspaces: config.workspace.retain,
            halt_dispatch_on_cancel: config.executor.halt_dispatch_on_cancel,
        }
    }
}

/// Deployment execution engine
pub struct Engine {
    store: Arc<Store>,
    workspaces: Arc<WorkspaceManager>,
    provider: Option<Arc<dyn SourceProvider>>,
    options: EngineOptions,
    audit: AuditLog,
}

impl Engine {
    pub fn new(store: Arc<Store>, workspaces: Arc<WorkspaceManager>, options: EngineOptions) -> Self {
        Self {
            store,
            workspaces,
            provider: None,
            options,
            audit: AuditLog::disabled(),
        }
    }

    /// Open the store and workspace roots named by `config`
    pub async fn from_config(config: &Config) -> ConvoyResult<Self> {
        let store = Store::open(ConfigManager::store_root(config))
            .await?
            .with_mutable_ttl(config.store.mutable_ttl()?);
        let workspaces = WorkspaceManager::new(ConfigManager::workspace_root(config));

        Ok(Self::new(
            Arc::new(store),
            Arc::new(workspaces),
            EngineOptions::from_config(config),
        )
        .with_audit(AuditLog::new(config)))
    }

    /// Fetcher for sources missing from the store
    pub fn with_provider(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn workspaces(&self) -> &Arc<WorkspaceManager> {
        &self.workspaces
    }

    /// Deploy a component set.
    ///
    /// An invalid set (unknown dependency, cycle, duplicate or unsafe name)
    /// is returned as an error before anything runs. Everything after that,
    /// including component failures, is reported in the [`RunResult`].
    pub async fn deploy(
        &self,
        components: Vec<Component>,
        handler: Arc<dyn ComponentHandler>,
        cancel: CancellationToken,
    ) -> ConvoyResult<RunResult> {
        let run_id = self.workspaces.new_run();
        let mut setup = RunResult::new(run_id);
        setup.transition(RunPhase::Pending);
        setup.transition(RunPhase::GraphBuilding);

        let planned = DependencyGraph::build(components)
            .and_then(|graph| graph.topological_waves().map(|waves| (graph, waves)));
        let (graph, waves) = match planned {
            Ok(planned) => planned,
            Err(e) => {
                setup.transition(RunPhase::Failed);
                error!(run = %run_id, error = %e, "Rejected component set");
                return Err(e);
            }
        };

        info!(
            run = %run_id,
            components = graph.len(),
            waves = waves.len(),
            concurrency = self.options.concurrency,
            "Starting deployment run"
        );

        let mut preparer = Preparer::new(self.store.clone(), self.workspaces.clone());
        if let Some(provider) = &self.provider {
            preparer = preparer.with_provider(provider.clone());
        }
        let executor = WaveExecutor::new(Arc::new(preparer))
            .halt_dispatch_on_cancel(self.options.halt_dispatch_on_cancel);
        let ctx = ExecutionContext::new(run_id, cancel);

        let mut result = executor
            .execute(&ctx, &graph, &waves, self.options.concurrency, handler)
            .await;
        setup.transitions.append(&mut result.transitions);
        result.transitions = setup.transitions;

        result.transition(RunPhase::Cleanup);
        match self
            .workspaces
            .cleanup(run_id, self.options.retain_workspaces)
            .await
        {
            CleanupOutcome::Retained(path) => result.retained_path = Some(path),
            CleanupOutcome::Removed => {
                let run_root = self.workspaces.run_path(run_id);
                if let Err(e) = self.store.release(&run_root).await {
                    warn!(run = %run_id, error = %e, "Failed to release store consumers");
                }
            }
            CleanupOutcome::NotCreated | CleanupOutcome::Failed(..) => {}
        }
        result.transition(RunPhase::Done);

        let outcome = result.outcome();
        if result.succeeded() {
            info!(run = %run_id, "{}", result.summary());
        } else {
            warn!(run = %run_id, "{}", result.summary());
        }
        self.audit
            .log(
                events::RUN_FINISHED,
                &serde_json::json!({
                    "run_id": run_id.to_string(),
                    "outcome": outcome.to_string(),
                    "waves": result.waves.len(),
                    "failed_wave": result.failed_wave().map(|w| w.number()),
                    "retained_path": result.retained_path,
                }),
            )
            .await;

        Ok(result)
    }
}
