//! Pipeline registry.
//!
//! Owns the built pipelines together with the artifact store and run
//! registry they execute against. Callers hold a `PipelineRegistry` and pass
//! it by reference; there is no global pipeline state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{Run, StepExecution};

use super::artifact_store::ArtifactStore;
use super::error::PipelineError;
use super::executor::{Executor, Parameters};
use super::pipeline::Pipeline;
use super::run_registry::RunRegistry;

/// Named pipelines and the stores they run against
#[derive(Debug, Clone)]
pub struct PipelineRegistry {
    pipelines: HashMap<String, Arc<Pipeline>>,
    executor: Executor,
}

impl PipelineRegistry {
    pub fn new(artifacts: ArtifactStore, runs: RunRegistry) -> Self {
        Self {
            pipelines: HashMap::new(),
            executor: Executor::new(artifacts, runs),
        }
    }

    /// Stores under `home/artifacts` and `home/runs`
    pub fn at(home: &Path) -> Self {
        Self::new(
            ArtifactStore::new(home.join("artifacts")),
            RunRegistry::new(home.join("runs")),
        )
    }

    /// Stores in the configured home directory
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(ArtifactStore::open_default()?, RunRegistry::open_default()?))
    }

    /// Register a pipeline under its name, replacing any previous definition
    pub fn register(&mut self, pipeline: Pipeline) -> Arc<Pipeline> {
        let pipeline = Arc::new(pipeline);
        if self
            .pipelines
            .insert(pipeline.name().to_string(), Arc::clone(&pipeline))
            .is_some()
        {
            debug!(pipeline = %pipeline.name(), "Replaced pipeline definition");
        }
        pipeline
    }

    /// Get a registered pipeline
    pub fn get(&self, name: &str) -> Result<Arc<Pipeline>, PipelineError> {
        self.pipelines
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownPipeline(name.to_string()))
    }

    /// Registered pipeline names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.pipelines.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        self.executor.artifacts()
    }

    pub fn runs(&self) -> &RunRegistry {
        self.executor.registry()
    }

    /// Execute a registered pipeline
    pub async fn run(&self, name: &str, parameters: &Parameters) -> Result<Run, PipelineError> {
        let pipeline = self.get(name)?;
        let run = self.executor.run(&pipeline, parameters).await?;
        info!(pipeline = %name, run_id = %run.id, "Pipeline run recorded");
        Ok(run)
    }

    /// Re-run a registered pipeline with the parameters of an earlier run
    pub async fn rerun(&self, name: &str, run_id: Uuid) -> Result<Run, PipelineError> {
        let pipeline = self.get(name)?;
        self.executor.rerun(&pipeline, run_id).await
    }

    /// All runs of a pipeline, oldest first
    pub async fn get_runs(&self, name: &str) -> Result<Vec<Run>, PipelineError> {
        self.runs().get_runs(name).await
    }

    pub async fn latest_run(&self, name: &str) -> Result<Run, PipelineError> {
        self.runs().latest_run(name).await
    }

    pub async fn get_run(&self, name: &str, run_id: Uuid) -> Result<Run, PipelineError> {
        self.runs().get_run(name, run_id).await
    }

    /// The execution record of a step within a run
    pub fn get_step<'a>(
        &self,
        run: &'a Run,
        step: &str,
    ) -> Result<&'a StepExecution, PipelineError> {
        self.runs().get_step(run, step)
    }

    /// Load a step's output artifact from a recorded run
    pub async fn step_output<T: DeserializeOwned>(
        &self,
        run: &Run,
        step: &str,
        output: &str,
    ) -> Result<T, PipelineError> {
        let reference = self
            .get_step(run, step)?
            .output(output)
            .ok_or_else(|| {
                PipelineError::step_not_found(&run.pipeline, run.id, step, Some(output.to_string()))
            })?;
        self.artifacts().get_as(&reference.key).await
    }
}
