//! Domain types for the driftline orchestrator.
//!
//! This module contains the core data structures:
//! - Artifact: keys and references of stored step outputs
//! - Events: append-only run log records
//! - Run: pipeline execution state
//! - Dataset: columnar data passed between lifecycle steps

pub mod artifact;
pub mod dataset;
pub mod events;
pub mod run;

// Re-export commonly used types
pub use artifact::{short_fingerprint, ArtifactKey, ArtifactRef};
pub use dataset::{Column, ColumnKind, ColumnValues, Dataset, DatasetError};
pub use events::{RunEvent, RunEventKind};
pub use run::{ExecutionStatus, Run, RunStatus, StepExecution};
