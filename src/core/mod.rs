//! Core orchestration logic.
//!
//! This module contains:
//! - Step: the unit of work and its input bindings
//! - Pipeline: validated step graphs
//! - ArtifactStore: content-addressed step outputs and the step cache
//! - RunRegistry: append-only run history
//! - Executor: runs a pipeline against both stores
//! - PipelineRegistry: owner of named pipelines

pub mod artifact_store;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod pipeline;
pub mod registry;
pub mod run_registry;
pub mod step;

// Re-export commonly used types
pub use artifact_store::{ArtifactStore, StepManifest};
pub use error::{GraphValidationError, PipelineError, StepError};
pub use executor::{Executor, Parameters};
pub use fingerprint::{content_hash, step_fingerprint, InputIdentity};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use registry::PipelineRegistry;
pub use run_registry::RunRegistry;
pub use step::{Binding, Step, StepInputs, StepOutputs, StepSpec};
