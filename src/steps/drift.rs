//! Drift check between the training data and new inference data.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::core::{Step, StepError, StepInputs, StepOutputs};
use crate::domain::Dataset;
use crate::drift::{DriftDetector, ThresholdPolicy};

/// Compares `current` against `reference` and reports per-feature drift.
///
/// `features` selects the compared columns; when empty, every column
/// present in both datasets except `target` is compared. `policy` falls back
/// to the default thresholds when null.
#[derive(Debug, Clone, Default)]
pub struct DriftDetectorStep;

#[async_trait]
impl Step for DriftDetectorStep {
    fn kind(&self) -> &str {
        "drift_detector"
    }

    fn inputs(&self) -> &[&str] {
        &["reference", "current", "features", "target", "policy"]
    }

    fn outputs(&self) -> &[&str] {
        &["report", "drifted"]
    }

    async fn compute(&self, inputs: &StepInputs) -> Result<StepOutputs, StepError> {
        let reference: Dataset = inputs.get("reference")?;
        let current: Dataset = inputs.get("current")?;
        let features: Vec<String> = inputs.get_opt("features")?.unwrap_or_default();
        let target: Option<String> = inputs.get_opt("target")?;
        let policy: ThresholdPolicy = inputs.get_opt("policy")?.unwrap_or_default();

        let features = if features.is_empty() {
            reference
                .column_names()
                .filter(|name| current.column(name).is_some() && Some(*name) != target.as_deref())
                .map(str::to_string)
                .collect()
        } else {
            features
        };
        if features.is_empty() {
            return Err(StepError::invalid("features", "no common columns to compare"));
        }

        let report = DriftDetector::new(policy).detect(&reference, &current, &features)?;
        if report.dataset_drifted {
            warn!(
                drifted = report.drifted_count,
                features = report.features.len(),
                "Data drift detected"
            );
        } else {
            info!(features = report.features.len(), "No data drift detected");
        }

        StepOutputs::new()
            .with("report", &report)?
            .with("drifted", &report.dataset_drifted)
    }
}
