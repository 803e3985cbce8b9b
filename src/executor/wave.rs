//! Wave-by-wave execution with a bounded worker pool

use crate::executor::prepare::Preparer;
use crate::executor::result::{
    ComponentResult, RunPhase, RunResult, SkipReason, WaveResult, WaveStatus,
};
use crate::executor::{ComponentHandler, ExecutionContext, WaveDecision};
use crate::graph::{Component, DependencyGraph, Wave};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Runs waves in order, each with up to `concurrency` components in flight
pub struct WaveExecutor {
    preparer: Arc<Preparer>,
    halt_dispatch_on_cancel: bool,
}

impl WaveExecutor {
    pub fn new(preparer: Arc<Preparer>) -> Self {
        Self {
            preparer,
            halt_dispatch_on_cancel: true,
        }
    }

    /// Whether components still waiting for a worker slot are skipped once
    /// the run is cancelled. Components already started always finish.
    pub fn halt_dispatch_on_cancel(mut self, enabled: bool) -> Self {
        self.halt_dispatch_on_cancel = enabled;
        self
    }

    /// Execute `waves` in order. A concurrency of 0 runs each wave fully in
    /// parallel.
    ///
    /// A failed wave lets its own members finish but nothing later starts.
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        graph: &DependencyGraph,
        waves: &[Wave],
        concurrency: usize,
        handler: Arc<dyn ComponentHandler>,
    ) -> RunResult {
        let mut result = RunResult::new(ctx.run_id);
        result.transition(RunPhase::WaveExecuting);
        let mut blocked: Option<SkipReason> = None;

        for wave in waves {
            if blocked.is_none() && ctx.is_cancelled() {
                info!(run = %ctx.run_id, "Run cancelled before wave {}", wave.index + 1);
                blocked = Some(SkipReason::Cancelled);
            }
            if let Some(reason) = blocked {
                result
                    .waves
                    .push(WaveResult::not_run(wave.index, &wave.components, reason));
                continue;
            }

            result.transition(RunPhase::WaveRunning(wave.index));
            info!(
                run = %ctx.run_id,
                components = wave.len(),
                "Starting wave {}/{}",
                wave.index + 1,
                waves.len()
            );

            let wave_result = self
                .run_wave(ctx, graph, wave, concurrency, &handler)
                .await;
            let decision = handler.on_wave_complete(&wave_result);

            match wave_result.status {
                WaveStatus::Succeeded => {
                    result.transition(RunPhase::WaveSucceeded(wave.index));
                    if decision == WaveDecision::Halt {
                        info!(run = %ctx.run_id, "Handler halted the run after wave {}", wave.index + 1);
                        blocked = Some(SkipReason::HaltedByCaller);
                    }
                }
                WaveStatus::Failed => {
                    result.transition(RunPhase::WaveFailed(wave.index));
                    let failed: Vec<&str> = wave_result.failed().map(|c| c.name.as_str()).collect();
                    warn!(
                        run = %ctx.run_id,
                        "Wave {} failed ({}); skipping remaining waves",
                        wave.index + 1,
                        failed.join(", ")
                    );
                    blocked = Some(SkipReason::DependencyFailed);
                }
                WaveStatus::Cancelled | WaveStatus::NotRun => {
                    result.transition(RunPhase::WaveFailed(wave.index));
                    blocked = Some(SkipReason::Cancelled);
                }
            }
            result.waves.push(wave_result);
        }

        result
    }

    async fn run_wave(
        &self,
        ctx: &ExecutionContext,
        graph: &DependencyGraph,
        wave: &Wave,
        concurrency: usize,
        handler: &Arc<dyn ComponentHandler>,
    ) -> WaveResult {
        let limit = match concurrency {
            0 => wave.len().max(1),
            n => n,
        };
        let slots = Arc::new(Semaphore::new(limit));
        let mut tasks = JoinSet::new();

        for component in wave.components.iter().filter_map(|name| graph.get(name)) {
            let component = component.clone();
            let slots = slots.clone();
            let ctx = ctx.clone();
            let handler = handler.clone();
            let preparer = self.preparer.clone();
            let halt_on_cancel = self.halt_dispatch_on_cancel;

            tasks.spawn(async move {
                let Ok(_permit) = slots.acquire_owned().await else {
                    return ComponentResult::skipped(component.name, SkipReason::Cancelled);
                };
                if halt_on_cancel && ctx.is_cancelled() {
                    debug!(component = %component.name, "Not starting: run cancelled");
                    return ComponentResult::skipped(component.name, SkipReason::Cancelled);
                }
                run_component(ctx, component, preparer, handler).await
            });
        }

        let mut results = Vec::with_capacity(wave.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(component) => results.push(component),
                Err(e) => warn!(error = %e, "Component task terminated"),
            }
        }

        for name in &wave.components {
            if !results.iter().any(|r| &r.name == name) {
                results.push(ComponentResult::failed(
                    name.clone(),
                    Duration::ZERO,
                    "component task terminated unexpectedly".into(),
                    None,
                ));
            }
        }

        WaveResult::from_components(wave.index, results)
    }
}

async fn run_component(
    ctx: ExecutionContext,
    component: Component,
    preparer: Arc<Preparer>,
    handler: Arc<dyn ComponentHandler>,
) -> ComponentResult {
    let started = Instant::now();
    let name = component.name.clone();

    let workspace = match preparer.prepare(ctx.run_id, &component).await {
        Ok(workspace) => workspace,
        Err(e) => {
            warn!(component = %name, error = %e, "Failed to prepare workspace");
            return ComponentResult::failed(name, started.elapsed(), e.into(), None);
        }
    };
    let path = workspace.path.clone();

    // Run on its own task so a panic is contained to this component
    let invocation =
        tokio::spawn(async move { handler.execute(&ctx, &component, &workspace).await });

    match invocation.await {
        Ok(Ok(())) => {
            let elapsed = started.elapsed();
            info!(
                component = %name,
                elapsed_ms = elapsed.as_millis() as u64,
                "Component succeeded"
            );
            ComponentResult::succeeded(name, elapsed, path)
        }
        Ok(Err(e)) => {
            warn!(component = %name, error = %e, "Component failed");
            ComponentResult::failed(name, started.elapsed(), e, Some(path))
        }
        Err(join) => {
            let reason = if join.is_panic() {
                format!("handler panicked: {}", panic_message(join.into_panic()))
            } else {
                "handler task was cancelled".to_string()
            };
            warn!(component = %name, "{}", reason);
            ComponentResult::failed(name, started.elapsed(), reason.into(), Some(path))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
