//! Data ingestion and preparation steps.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::{Step, StepError, StepInputs, StepOutputs};
use crate::domain::Dataset;

/// Reads a columnar JSON dataset from `path`.
///
/// The file is external state, so this step always runs; its output content
/// decides whether downstream steps are served from the cache.
#[derive(Debug, Clone, Default)]
pub struct LoadData;

#[async_trait]
impl Step for LoadData {
    fn kind(&self) -> &str {
        "load_data"
    }

    fn cacheable(&self) -> bool {
        false
    }

    fn inputs(&self) -> &[&str] {
        &["path"]
    }

    fn outputs(&self) -> &[&str] {
        &["dataset"]
    }

    async fn compute(&self, inputs: &StepInputs) -> Result<StepOutputs, StepError> {
        let path: String = inputs.get("path")?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| StepError::invalid("path", format!("failed to read {}: {}", path, e)))?;
        let dataset: Dataset = serde_json::from_slice(&bytes)
            .map_err(|e| StepError::invalid("path", format!("failed to parse {}: {}", path, e)))?;
        dataset.validate()?;

        info!(
            %path,
            rows = dataset.num_rows(),
            columns = dataset.columns.len(),
            "Dataset loaded"
        );
        StepOutputs::new().with("dataset", &dataset)
    }
}

/// Drops rows with a non-finite numeric or blank categorical value
#[derive(Debug, Clone, Default)]
pub struct CleanData;

#[async_trait]
impl Step for CleanData {
    fn kind(&self) -> &str {
        "clean_data"
    }

    fn inputs(&self) -> &[&str] {
        &["data"]
    }

    fn outputs(&self) -> &[&str] {
        &["dataset"]
    }

    async fn compute(&self, inputs: &StepInputs) -> Result<StepOutputs, StepError> {
        let data: Dataset = inputs.get("data")?;
        data.validate()?;

        let cleaned = data.drop_invalid_rows();
        let dropped = data.num_rows() - cleaned.num_rows();
        if dropped > 0 {
            info!(dropped, remaining = cleaned.num_rows(), "Dropped incomplete rows");
        }
        StepOutputs::new().with("dataset", &cleaned)
    }
}

/// Deterministic train/test split: every k-th row goes to the test set,
/// with k derived from `test_fraction`
#[derive(Debug, Clone, Default)]
pub struct SplitData;

impl SplitData {
    /// Row indices of the (train, test) partition
    pub fn partition(rows: usize, test_fraction: f64) -> (Vec<usize>, Vec<usize>) {
        let k = ((1.0 / test_fraction).round() as usize).max(2);
        let (mut train, mut test): (Vec<usize>, Vec<usize>) =
            (0..rows).partition(|i| i % k != k - 1);

        // Small inputs still get one test row
        if test.is_empty() {
            if let Some(last) = train.pop() {
                test.push(last);
            }
        }
        (train, test)
    }
}

#[async_trait]
impl Step for SplitData {
    fn kind(&self) -> &str {
        "split_data"
    }

    fn inputs(&self) -> &[&str] {
        &["data", "test_fraction"]
    }

    fn outputs(&self) -> &[&str] {
        &["train", "test"]
    }

    async fn compute(&self, inputs: &StepInputs) -> Result<StepOutputs, StepError> {
        let data: Dataset = inputs.get("data")?;
        let test_fraction: f64 = inputs.get("test_fraction")?;
        if !(test_fraction > 0.0 && test_fraction < 1.0) {
            return Err(StepError::invalid(
                "test_fraction",
                format!("must be between 0 and 1, got {}", test_fraction),
            ));
        }
        if data.num_rows() < 2 {
            return Err(StepError::invalid("data", "need at least 2 rows to split"));
        }

        let (train, test) = Self::partition(data.num_rows(), test_fraction);
        debug!(train = train.len(), test = test.len(), "Dataset split");

        StepOutputs::new()
            .with("train", &data.select_rows(&train))?
            .with("test", &data.select_rows(&test))
    }
}
