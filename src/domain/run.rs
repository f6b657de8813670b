//! Run state and reconstruction from events.
//!
//! A Run represents a single execution of a pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::artifact::ArtifactRef;
use super::events::{RunEvent, RunEventKind};

/// A pipeline execution run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Name of the pipeline being executed
    pub pipeline: String,

    /// Run parameters as supplied by the caller
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,

    /// Overall status
    pub status: RunStatus,

    /// One entry per pipeline step, in execution order
    pub steps: Vec<StepExecution>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if applicable)
    pub finished_at: Option<DateTime<Utc>>,

    /// Error of the failing step, if the run failed
    pub error: Option<String>,
}

impl Run {
    /// Create a pending run whose steps are all pending
    pub fn new(
        id: Uuid,
        pipeline: String,
        parameters: BTreeMap<String, Value>,
        plan: &[String],
    ) -> Self {
        Self {
            id,
            pipeline,
            parameters,
            status: RunStatus::Pending,
            steps: plan.iter().map(StepExecution::pending).collect(),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    /// Reconstruct a run from its events, in log order
    pub fn from_events(events: &[RunEvent]) -> Option<Self> {
        let first = events.first()?;

        let mut run = Self {
            id: first.run_id,
            pipeline: first.pipeline.clone(),
            parameters: BTreeMap::new(),
            status: RunStatus::Running,
            steps: Vec::new(),
            started_at: first.timestamp,
            finished_at: None,
            error: None,
        };

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &RunEvent) {
        match &event.kind {
            RunEventKind::RunStarted { parameters, plan } => {
                self.status = RunStatus::Running;
                self.started_at = event.timestamp;
                self.parameters = parameters.clone();
                self.steps = plan.iter().map(StepExecution::pending).collect();
            }
            RunEventKind::StepFinished { execution } => {
                match self.steps.iter_mut().find(|s| s.step == execution.step) {
                    Some(slot) => *slot = execution.clone(),
                    None => self.steps.push(execution.clone()),
                }
            }
            RunEventKind::RunFinished { run } => {
                *self = run.clone();
            }
        }
    }

    /// Look up the execution record of a step
    pub fn step(&self, name: &str) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.step == name)
    }

    pub(crate) fn step_mut(&mut self, name: &str) -> Option<&mut StepExecution> {
        self.steps.iter_mut().find(|s| s.step == name)
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self.status, RunStatus::Pending | RunStatus::Running)
    }

    /// Check if the run has completed (successfully or not)
    pub fn is_finished(&self) -> bool {
        !self.is_running()
    }

    /// Whether every step was served from the cache
    pub fn fully_cached(&self) -> bool {
        self.steps
            .iter()
            .all(|s| s.status == ExecutionStatus::SkippedCached)
    }
}

/// State of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, no step started yet
    #[default]
    Pending,

    /// Currently executing
    Running,

    /// Every step executed or was served from the cache
    Succeeded,

    /// A step failed and the run was aborted
    Failed,
}

/// Record of one step within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    /// Step instance name
    pub step: String,

    /// Outcome
    pub status: ExecutionStatus,

    /// Cache fingerprint (absent while pending)
    pub fingerprint: Option<String>,

    /// Artifact for each declared output
    #[serde(default)]
    pub outputs: BTreeMap<String, ArtifactRef>,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Error message if failed
    pub error: Option<String>,
}

impl StepExecution {
    /// A step that has not been reached yet
    pub fn pending(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status: ExecutionStatus::Pending,
            fingerprint: None,
            outputs: BTreeMap::new(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Get the reference of one output
    pub fn output(&self, name: &str) -> Option<&ArtifactRef> {
        self.outputs.get(name)
    }

    /// Duration in milliseconds, for finished steps
    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        Some((finished - started).num_milliseconds().max(0) as u64)
    }
}

/// Status of a step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Not reached (or aborted by an earlier failure)
    #[default]
    Pending,

    /// Outputs reused from an earlier execution with the same fingerprint
    SkippedCached,

    /// Computation ran and its outputs were stored
    Executed,

    /// Computation returned an error
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::SkippedCached => "skipped-cached",
            Self::Executed => "executed",
            Self::Failed => "failed",
        }
    }
}
