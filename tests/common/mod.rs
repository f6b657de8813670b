//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use driftline::core::{
    ArtifactStore, Executor, RunRegistry, Step, StepError, StepInputs, StepOutputs,
};
use serde_json::Value;
use tempfile::TempDir;

/// Names of computed steps, in call order
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn create_test_executor() -> (Executor, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let executor = Executor::new(
        ArtifactStore::new(temp_dir.path().join("artifacts")),
        RunRegistry::new(temp_dir.path().join("runs")),
    );
    (executor, temp_dir)
}

/// Sums its numeric inputs; logs every computation
pub struct Sum {
    pub label: &'static str,
    pub inputs: Vec<&'static str>,
    pub log: CallLog,
}

impl Sum {
    pub fn new(label: &'static str, inputs: &[&'static str], log: &CallLog) -> Self {
        Self {
            label,
            inputs: inputs.to_vec(),
            log: Arc::clone(log),
        }
    }
}

#[async_trait]
impl Step for Sum {
    fn kind(&self) -> &str {
        "sum"
    }

    fn inputs(&self) -> &[&str] {
        &self.inputs
    }

    fn outputs(&self) -> &[&str] {
        &["total"]
    }

    async fn compute(&self, inputs: &StepInputs) -> Result<StepOutputs, StepError> {
        self.log.lock().unwrap().push(self.label.to_string());

        let mut total = 0.0;
        for name in &self.inputs {
            total += inputs.get::<f64>(name)?;
        }
        StepOutputs::new().with("total", &total)
    }
}

/// Always fails
pub struct Explode;

#[async_trait]
impl Step for Explode {
    fn kind(&self) -> &str {
        "explode"
    }

    fn inputs(&self) -> &[&str] {
        &["x"]
    }

    fn outputs(&self) -> &[&str] {
        &["total"]
    }

    async fn compute(&self, inputs: &StepInputs) -> Result<StepOutputs, StepError> {
        let x: Value = inputs.value("x")?.clone();
        Err(StepError::failed(format!("cannot handle {}", x)))
    }
}
