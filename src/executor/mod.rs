//! Bounded-parallel execution of dependency waves

pub mod prepare;
pub mod result;
pub mod wave;

pub use prepare::Preparer;
pub use result::{
    BoxError, ComponentResult, ComponentStatus, RunOutcome, RunPhase, RunResult, SkipReason,
    WaveResult, WaveStatus,
};
pub use wave::WaveExecutor;

use crate::graph::Component;
use crate::workspace::{RunId, Workspace};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Run-scoped context passed to every handler invocation
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: RunId,
    /// Advisory: handlers decide whether and how to honor it
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(run_id: RunId, cancel: CancellationToken) -> Self {
        Self { run_id, cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// What to do after a wave completed without failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaveDecision {
    #[default]
    Continue,
    /// Stop here; later components are skipped as halted
    Halt,
}

/// Caller-supplied work for each component.
///
/// The engine never interprets what happens inside `execute`; it only
/// records whether it returned an error.
#[async_trait]
pub trait ComponentHandler: Send + Sync {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        component: &Component,
        workspace: &Workspace,
    ) -> Result<(), BoxError>;

    /// Called after every executed wave
    fn on_wave_complete(&self, _wave: &WaveResult) -> WaveDecision {
        WaveDecision::Continue
    }
}
