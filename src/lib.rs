//! driftline - ML lifecycle pipelines with cached steps and drift detection
//!
//! A small workflow engine for machine-learning lifecycles: named steps are
//! wired into a DAG by data dependency, executed in dependency order, and
//! cached by fingerprint so unchanged steps are skipped on re-run.
//!
//! # Architecture
//!
//! - Step outputs are stored as content-addressed, append-only artifacts
//! - Every run is recorded in an append-only per-pipeline log
//! - A step's output can be retrieved from any recorded run after the fact
//!
//! # Modules
//!
//! - `core`: Orchestration (Pipeline, Executor, ArtifactStore, RunRegistry)
//! - `domain`: Data structures (Run, StepExecution, Artifact, Dataset)
//! - `drift`: Statistical drift detection
//! - `steps`: Lifecycle step implementations
//! - `lifecycle`: The training and inference pipelines
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Train and deploy a model
//! driftline train --data train.json --target price
//!
//! # Predict on new data and check for drift
//! driftline infer --reference train.json --data new.json --target price
//!
//! # Print the latest drift report
//! driftline report
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod drift;
pub mod lifecycle;
pub mod steps;

// Re-export main types at crate root for convenience
pub use core::{Binding, Executor, Pipeline, PipelineError, PipelineRegistry, Step, StepSpec};
pub use domain::{Dataset, ExecutionStatus, Run, RunStatus};
pub use drift::{DriftDetector, DriftReport};
