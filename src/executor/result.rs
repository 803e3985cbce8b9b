//! Execution outcomes for components, waves and whole runs

use crate::workspace::RunId;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Opaque failure returned by a component handler
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared form of [`BoxError`] kept in results
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Why a component never ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A component in an earlier wave failed
    DependencyFailed,
    /// The run was cancelled before the component started
    Cancelled,
    /// The handler asked to stop after an earlier wave
    HaltedByCaller,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DependencyFailed => write!(f, "dependency failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::HaltedByCaller => write!(f, "halted by caller"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum ComponentStatus {
    Succeeded,
    Failed,
    Skipped(SkipReason),
}

/// Outcome of one component
#[derive(Debug, Clone, Serialize)]
pub struct ComponentResult {
    pub name: String,
    pub status: ComponentStatus,
    pub duration: Duration,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<SharedError>,
    pub workspace: Option<PathBuf>,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<SharedError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl ComponentResult {
    pub fn succeeded(name: impl Into<String>, duration: Duration, workspace: PathBuf) -> Self {
        Self {
            name: name.into(),
            status: ComponentStatus::Succeeded,
            duration,
            error: None,
            workspace: Some(workspace),
        }
    }

    pub fn failed(
        name: impl Into<String>,
        duration: Duration,
        error: BoxError,
        workspace: Option<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            status: ComponentStatus::Failed,
            duration,
            error: Some(Arc::from(error)),
            workspace,
        }
    }

    pub fn skipped(name: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            name: name.into(),
            status: ComponentStatus::Skipped(reason),
            duration: Duration::ZERO,
            error: None,
            workspace: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == ComponentStatus::Failed
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self.status {
            ComponentStatus::Skipped(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveStatus {
    Succeeded,
    Failed,
    /// Some members were skipped after cancellation, none failed
    Cancelled,
    NotRun,
}

/// Outcome of one wave
#[derive(Debug, Clone, Serialize)]
pub struct WaveResult {
    /// Zero-based position in the run
    pub index: usize,
    pub status: WaveStatus,
    /// Sorted by name
    pub components: Vec<ComponentResult>,
}

impl WaveResult {
    /// Derive the wave status from its members
    pub fn from_components(index: usize, mut components: Vec<ComponentResult>) -> Self {
        components.sort_by(|a, b| a.name.cmp(&b.name));
        let status = if components.iter().any(ComponentResult::is_failed) {
            WaveStatus::Failed
        } else if components.iter().all(|c| c.status == ComponentStatus::Succeeded) {
            WaveStatus::Succeeded
        } else if components.iter().all(|c| c.skip_reason().is_some()) {
            WaveStatus::NotRun
        } else {
            WaveStatus::Cancelled
        };
        Self {
            index,
            status,
            components,
        }
    }

    /// A wave none of whose members ran
    pub fn not_run(index: usize, names: &[String], reason: SkipReason) -> Self {
        Self {
            index,
            status: WaveStatus::NotRun,
            components: names
                .iter()
                .map(|n| ComponentResult::skipped(n.clone(), reason))
                .collect(),
        }
    }

    /// One-based wave number for display
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn failed(&self) -> impl Iterator<Item = &ComponentResult> {
        self.components.iter().filter(|c| c.is_failed())
    }
}

/// Phases of a deployment run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "wave")]
pub enum RunPhase {
    Pending,
    GraphBuilding,
    WaveExecuting,
    WaveRunning(usize),
    WaveSucceeded(usize),
    WaveFailed(usize),
    Cleanup,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::GraphBuilding => write!(f, "graph-building"),
            Self::WaveExecuting => write!(f, "wave-executing"),
            Self::WaveRunning(i) => write!(f, "wave-running({})", i + 1),
            Self::WaveSucceeded(i) => write!(f, "wave-succeeded({})", i + 1),
            Self::WaveFailed(i) => write!(f, "wave-failed({})", i + 1),
            Self::Cleanup => write!(f, "cleanup"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Overall verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed,
    Cancelled,
    Halted,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Halted => write!(f, "halted"),
        }
    }
}

/// Aggregate outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub waves: Vec<WaveResult>,
    /// Every state the run passed through, in order
    pub transitions: Vec<RunPhase>,
    /// Where the workspaces were kept, if retention was requested
    pub retained_path: Option<PathBuf>,
}

impl RunResult {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            waves: Vec::new(),
            transitions: Vec::new(),
            retained_path: None,
        }
    }

    /// Record a state transition
    pub fn transition(&mut self, phase: RunPhase) {
        tracing::debug!(run = %self.run_id, phase = %phase, "Run transition");
        self.transitions.push(phase);
    }

    /// Most recent phase
    pub fn phase(&self) -> RunPhase {
        self.transitions.last().copied().unwrap_or(RunPhase::Pending)
    }

    pub fn outcome(&self) -> RunOutcome {
        let mut cancelled = false;
        let mut halted = false;
        for component in self.components() {
            match component.status {
                ComponentStatus::Failed => return RunOutcome::Failed,
                ComponentStatus::Skipped(SkipReason::DependencyFailed) => {
                    return RunOutcome::Failed
                }
                ComponentStatus::Skipped(SkipReason::Cancelled) => cancelled = true,
                ComponentStatus::Skipped(SkipReason::HaltedByCaller) => halted = true,
                ComponentStatus::Succeeded => {}
            }
        }
        if cancelled {
            RunOutcome::Cancelled
        } else if halted {
            RunOutcome::Halted
        } else {
            RunOutcome::Succeeded
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome() == RunOutcome::Succeeded
    }

    pub fn components(&self) -> impl Iterator<Item = &ComponentResult> {
        self.waves.iter().flat_map(|w| w.components.iter())
    }

    pub fn component(&self, name: &str) -> Option<&ComponentResult> {
        self.components().find(|c| c.name == name)
    }

    pub fn status(&self, name: &str) -> Option<ComponentStatus> {
        self.component(name).map(|c| c.status)
    }

    /// First wave with a failed component
    pub fn failed_wave(&self) -> Option<&WaveResult> {
        self.waves.iter().find(|w| w.status == WaveStatus::Failed)
    }

    /// Human-readable account naming the failing wave, its failed
    /// components, the waves that succeeded and what was skipped
    pub fn summary(&self) -> String {
        let total: usize = self.waves.iter().map(|w| w.components.len()).sum();
        let mut lines = vec![format!(
            "Run {} {} ({} wave(s), {} component(s))",
            self.run_id,
            self.outcome(),
            self.waves.len(),
            total
        )];

        if let Some(wave) = self.failed_wave() {
            lines.push(format!("  Failed in wave {}:", wave.number()));
            for component in wave.failed() {
                match &component.error {
                    Some(e) => lines.push(format!("    {}: {}", component.name, e)),
                    None => lines.push(format!("    {}", component.name)),
                }
            }
        }

        let succeeded: Vec<String> = self
            .waves
            .iter()
            .filter(|w| w.status == WaveStatus::Succeeded)
            .map(|w| w.number().to_string())
            .collect();
        if !succeeded.is_empty() && self.outcome() != RunOutcome::Succeeded {
            lines.push(format!("  Succeeded waves: {}", succeeded.join(", ")));
        }

        let skipped: Vec<String> = self
            .components()
            .filter_map(|c| c.skip_reason().map(|r| format!("{} ({})", c.name, r)))
            .collect();
        if !skipped.is_empty() {
            lines.push(format!("  Skipped: {}", skipped.join(", ")));
        }

        if let Some(path) = &self.retained_path {
            lines.push(format!("  Workspaces retained at {}", path.display()));
        }

        lines.join("\n")
    }
}
