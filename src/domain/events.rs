//! Events for the append-only run log.
//!
//! The run registry never rewrites history: a run is recorded as a
//! `RunStarted` event, one `StepFinished` event per step outcome and a final
//! `RunFinished` snapshot. Replaying the events of a run reconstructs it,
//! including runs that are still in progress.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::run::{Run, StepExecution};

/// A single line in a pipeline's run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event was appended
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Pipeline the run belongs to
    pub pipeline: String,

    /// What happened
    #[serde(flatten)]
    pub kind: RunEventKind,
}

impl RunEvent {
    /// Create a new event with the current timestamp
    pub fn new(run_id: Uuid, pipeline: impl Into<String>, kind: RunEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            pipeline: pipeline.into(),
            kind,
        }
    }

    /// Step this event refers to, if any
    pub fn step(&self) -> Option<&str> {
        match &self.kind {
            RunEventKind::StepFinished { execution } => Some(&execution.step),
            _ => None,
        }
    }
}

/// Types of run log events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum RunEventKind {
    /// A run was created; `plan` is the execution order
    RunStarted {
        parameters: BTreeMap<String, Value>,
        plan: Vec<String>,
    },

    /// A step reached a terminal status (executed, cached or failed)
    StepFinished { execution: StepExecution },

    /// The finalized run
    RunFinished { run: Run },
}

impl RunEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::StepFinished { .. } => "step_finished",
            Self::RunFinished { .. } => "run_finished",
        }
    }
}
