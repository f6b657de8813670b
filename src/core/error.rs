//! Error types of the orchestration core.
//!
//! Every error carries enough context (pipeline, run id, step) to locate the
//! failure in the run registry.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ArtifactKey, DatasetError};
use crate::drift::DriftError;

/// Raised by `PipelineBuilder::build`; fatal, never retried
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphValidationError {
    #[error("Pipeline '{pipeline}' has no steps")]
    EmptyPipeline { pipeline: String },

    #[error("Pipeline '{pipeline}': duplicate step '{step}'")]
    DuplicateStep { pipeline: String, step: String },

    #[error("Pipeline '{pipeline}': step '{step}' declares output '{output}' more than once")]
    DuplicateOutput {
        pipeline: String,
        step: String,
        output: String,
    },

    #[error("Pipeline '{pipeline}': input '{input}' of step '{step}' is not bound")]
    UnboundInput {
        pipeline: String,
        step: String,
        input: String,
    },

    #[error("Pipeline '{pipeline}': step '{step}' has no input named '{input}'")]
    UnknownInput {
        pipeline: String,
        step: String,
        input: String,
    },

    #[error(
        "Pipeline '{pipeline}': input '{input}' of step '{step}' references missing output '{upstream}.{output}'"
    )]
    UnresolvedInput {
        pipeline: String,
        step: String,
        input: String,
        upstream: String,
        output: String,
    },

    #[error("Pipeline '{pipeline}': dependency cycle between steps {}", .steps.join(", "))]
    Cycle { pipeline: String, steps: Vec<String> },
}

/// Failure reported by a step computation
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Invalid input '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    #[error("Step did not produce declared output '{0}'")]
    MissingOutput(String),

    #[error("Step produced undeclared output '{0}'")]
    UnexpectedOutput(String),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    /// Includes the drift detector's schema mismatch
    #[error(transparent)]
    Drift(#[from] DriftError),

    #[error("{0}")]
    Failed(String),
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn invalid(input: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidInput {
            input: input.into(),
            reason: reason.to_string(),
        }
    }
}

/// Top-level error of pipeline building, execution and lookup
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    GraphValidation(#[from] GraphValidationError),

    #[error("Pipeline '{pipeline}': step '{step}' needs run parameter '{parameter}' for input '{input}'")]
    MissingParameter {
        pipeline: String,
        step: String,
        input: String,
        parameter: String,
    },

    #[error("Unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("{}", describe_missing(.pipeline, .run_id, .step, .output))]
    ArtifactNotFound {
        pipeline: String,
        run_id: Option<Uuid>,
        step: Option<String>,
        output: Option<String>,
    },

    #[error("Pipeline '{pipeline}' run {run_id}: step '{step}' failed: {source}")]
    StepExecution {
        pipeline: String,
        run_id: Uuid,
        step: String,
        #[source]
        source: StepError,
    },

    #[error("Storage error at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// No such run in the pipeline's history
    pub fn run_not_found(pipeline: impl Into<String>, run_id: Option<Uuid>) -> Self {
        Self::ArtifactNotFound {
            pipeline: pipeline.into(),
            run_id,
            step: None,
            output: None,
        }
    }

    /// No such step (or step output) within a run
    pub fn step_not_found(
        pipeline: impl Into<String>,
        run_id: Uuid,
        step: impl Into<String>,
        output: Option<String>,
    ) -> Self {
        Self::ArtifactNotFound {
            pipeline: pipeline.into(),
            run_id: Some(run_id),
            step: Some(step.into()),
            output,
        }
    }

    /// No stored artifact under this key
    pub fn artifact_not_found(key: &ArtifactKey) -> Self {
        Self::ArtifactNotFound {
            pipeline: key.pipeline.clone(),
            run_id: None,
            step: Some(key.step.clone()),
            output: Some(key.output.clone()),
        }
    }

    /// Whether this error came out of a step computation
    pub fn is_step_failure(&self) -> bool {
        matches!(self, Self::StepExecution { .. })
    }
}

fn describe_missing(
    pipeline: &str,
    run_id: &Option<Uuid>,
    step: &Option<String>,
    output: &Option<String>,
) -> String {
    let mut message = format!("Not found in pipeline '{}'", pipeline);
    match (run_id, step) {
        (Some(id), _) => message.push_str(&format!(": run {}", id)),
        (None, None) => message.push_str(": no runs"),
        (None, Some(_)) => {}
    }
    if let Some(step) = step {
        message.push_str(&format!(", step '{}'", step));
    }
    if let Some(output) = output {
        message.push_str(&format!(", output '{}'", output));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_steps() {
        let err = GraphValidationError::Cycle {
            pipeline: "p".to_string(),
            steps: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "Pipeline 'p': dependency cycle between steps a, b");
    }

    #[test]
    fn test_not_found_message_has_context() {
        let run_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let err = PipelineError::step_not_found("inference", run_id, "drift_detector", None);
        assert_eq!(
            err.to_string(),
            "Not found in pipeline 'inference': run 550e8400-e29b-41d4-a716-446655440000, step 'drift_detector'"
        );

        let key = ArtifactKey::new("inference", "predictor", "predictions", "ff");
        let err = PipelineError::artifact_not_found(&key);
        assert_eq!(
            err.to_string(),
            "Not found in pipeline 'inference', step 'predictor', output 'predictions'"
        );

        let err = PipelineError::run_not_found("inference", None);
        assert_eq!(err.to_string(), "Not found in pipeline 'inference': no runs");
    }

    #[test]
    fn test_step_failure_flag() {
        let err = PipelineError::StepExecution {
            pipeline: "p".to_string(),
            run_id: Uuid::new_v4(),
            step: "s".to_string(),
            source: StepError::failed("boom"),
        };
        assert!(err.is_step_failure());
        assert!(err.to_string().ends_with("step 's' failed: boom"));
    }
}
