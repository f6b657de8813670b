//! Artifacts produced by pipeline steps.
//!
//! An artifact is the materialized value of one step output. Artifacts are
//! addressed by the fingerprint of the step execution that produced them, so
//! two runs that resolve identical inputs for a step share its artifacts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storage key of a single artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    /// Pipeline the producing step belongs to
    pub pipeline: String,

    /// Step instance name
    pub step: String,

    /// Output name within the step
    pub output: String,

    /// Fingerprint of the producing step execution
    pub fingerprint: String,
}

impl ArtifactKey {
    pub fn new(
        pipeline: impl Into<String>,
        step: impl Into<String>,
        output: impl Into<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            step: step.into(),
            output: output.into(),
            fingerprint: fingerprint.into(),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.pipeline,
            self.step,
            self.output,
            short_fingerprint(&self.fingerprint)
        )
    }
}

/// Reference to a stored artifact, recorded on step executions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Where the artifact lives
    pub key: ArtifactKey,

    /// SHA-256 of the canonical JSON encoding of the value
    pub content_hash: String,

    /// Size of the canonical encoding in bytes
    pub size_bytes: u64,

    /// Run that first produced this artifact
    pub run_id: Uuid,

    /// When the artifact was first written
    pub created_at: DateTime<Utc>,
}

/// First 12 hex chars of a fingerprint, for logs and listings
pub fn short_fingerprint(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}
