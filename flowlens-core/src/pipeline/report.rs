//! Stage outcomes and the per-run report

use std::fmt;

use serde::Serialize;

use crate::window::QueryWindow;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Fetching,
    Enriching,
    Persisting,
    Notifying,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetching => "fetch",
            Stage::Enriching => "enrich",
            Stage::Persisting => "persist",
            Stage::Notifying => "notify",
        };
        f.write_str(name)
    }
}

/// State of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    /// Not started
    Idle,
    /// Executing a stage
    Running(Stage),
    /// Finished, possibly with degraded best-effort stages
    Done,
    /// A fatal error stopped the run in this stage
    Failed(Stage),
}

/// How a stage ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StageOutcome {
    Completed,
    Skipped,
    /// Best-effort stage failed; the run continued.
    Degraded(String),
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOutcome::Completed => write!(f, "completed"),
            StageOutcome::Skipped => write!(f, "skipped"),
            StageOutcome::Degraded(reason) => write!(f, "degraded ({reason})"),
        }
    }
}

/// Result of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// `None` when there was nothing to process.
    pub window: Option<QueryWindow>,
    pub records_fetched: usize,
    pub rows_written: usize,
    pub stages: Vec<(Stage, StageOutcome)>,
    pub summary: Option<String>,
    pub state: PipelineState,
    /// Whether the run state moved to the window end.
    pub state_advanced: bool,
}

impl RunReport {
    pub(crate) fn new(window: Option<QueryWindow>) -> Self {
        Self {
            window,
            records_fetched: 0,
            rows_written: 0,
            stages: Vec::new(),
            summary: None,
            state: PipelineState::Idle,
            state_advanced: false,
        }
    }

    pub(crate) fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        self.stages.push((stage, outcome));
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, outcome)| outcome)
    }

    pub fn is_degraded(&self) -> bool {
        self.stages
            .iter()
            .any(|(_, outcome)| matches!(outcome, StageOutcome::Degraded(_)))
    }

    pub fn notification_failed(&self) -> bool {
        matches!(self.outcome(Stage::Notifying), Some(StageOutcome::Degraded(_)))
    }
}
