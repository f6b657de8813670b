//! Run executor.
//!
//! Walks a pipeline in topological order, serving each step from the artifact
//! store when an execution with the same fingerprint was committed before and
//! executing it otherwise. Runs are fail-fast: the first failing step aborts
//! the run, leaving the remaining steps pending.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    short_fingerprint, ArtifactKey, ArtifactRef, ExecutionStatus, Run, RunStatus,
};

use super::artifact_store::{ArtifactStore, StepManifest};
use super::error::{PipelineError, StepError};
use super::fingerprint::{output_fingerprint, step_fingerprint, InputIdentity};
use super::pipeline::Pipeline;
use super::run_registry::RunRegistry;
use super::step::{Binding, StepInputs, StepSpec};

/// Run parameters, referenced by `Binding::Param`
pub type Parameters = BTreeMap<String, Value>;

/// Outputs of a finished step, visible to downstream steps of the same run
#[derive(Debug, Clone)]
struct Produced {
    fingerprint: String,
    outputs: BTreeMap<String, ArtifactRef>,
}

/// Why a step did not finish
enum StepFailure {
    /// The computation (or its output contract) failed
    Step(StepError),

    /// Storage or serialization failed around the computation
    Core(PipelineError),
}

impl From<StepError> for StepFailure {
    fn from(e: StepError) -> Self {
        Self::Step(e)
    }
}

impl From<PipelineError> for StepFailure {
    fn from(e: PipelineError) -> Self {
        Self::Core(e)
    }
}

/// Executes pipelines against an artifact store and run registry
#[derive(Debug, Clone)]
pub struct Executor {
    artifacts: ArtifactStore,
    registry: RunRegistry,
}

impl Executor {
    pub fn new(artifacts: ArtifactStore, registry: RunRegistry) -> Self {
        Self {
            artifacts,
            registry,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Execute a pipeline with the given run parameters.
    ///
    /// The run is recorded in the registry whether it succeeds or fails; a
    /// step failure is returned as [`PipelineError::StepExecution`].
    #[instrument(skip(self, pipeline, parameters), fields(pipeline = %pipeline.name()))]
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        parameters: &Parameters,
    ) -> Result<Run, PipelineError> {
        check_parameters(pipeline, parameters)?;

        let run_id = Uuid::new_v4();
        let mut run = Run::new(
            run_id,
            pipeline.name().to_string(),
            parameters.clone(),
            &pipeline.plan(),
        );
        run.status = RunStatus::Running;
        info!(%run_id, steps = pipeline.len(), "Starting pipeline run");
        self.registry.begin(&run).await?;

        let mut produced: HashMap<String, Produced> = HashMap::new();

        for spec in pipeline.execution_order() {
            match self.execute_step(&mut run, spec, parameters, &produced).await {
                Ok(step_outputs) => {
                    produced.insert(spec.name().to_string(), step_outputs);
                }
                Err(failure) => {
                    return self.fail_run(&mut run, spec.name(), failure).await;
                }
            }
        }

        self.complete_run(&mut run).await
    }

    /// Start a new run with the parameters of an earlier one.
    ///
    /// Steps that completed in the earlier run are served from the cache, so
    /// this resumes a failed run from its first failing step.
    #[instrument(skip(self, pipeline), fields(pipeline = %pipeline.name(), %run_id))]
    pub async fn rerun(&self, pipeline: &Pipeline, run_id: Uuid) -> Result<Run, PipelineError> {
        let previous = self.registry.get_run(pipeline.name(), run_id).await?;
        info!("Re-running with previous parameters");
        self.run(pipeline, &previous.parameters).await
    }

    /// Resolve, fingerprint and execute (or reuse) one step
    async fn execute_step(
        &self,
        run: &mut Run,
        spec: &StepSpec,
        parameters: &Parameters,
        produced: &HashMap<String, Produced>,
    ) -> Result<Produced, StepFailure> {
        let started = Instant::now();
        let started_at = Utc::now();
        if let Some(execution) = run.step_mut(spec.name()) {
            execution.started_at = Some(started_at);
        }

        let (identities, mut inputs) = resolve_bindings(run, spec, parameters, produced)?;
        let fingerprint = step_fingerprint(spec.step(), &identities);
        if let Some(execution) = run.step_mut(spec.name()) {
            execution.fingerprint = Some(fingerprint.clone());
        }

        let cacheable = spec.step().cacheable();
        let cached = if cacheable {
            self.artifacts
                .lookup(&run.pipeline, spec.name(), &fingerprint)
                .await?
                .filter(|manifest| covers_outputs(manifest, spec))
        } else {
            None
        };

        let (status, fingerprint, outputs) = match cached {
            Some(manifest) => {
                debug!(
                    step = %spec.name(),
                    fingerprint = short_fingerprint(&fingerprint),
                    "Cache hit"
                );
                (ExecutionStatus::SkippedCached, fingerprint, manifest.outputs)
            }
            None => {
                self.load_upstream_values(run, spec, produced, &mut inputs).await?;
                let values = compute_outputs(spec, &inputs).await?;

                // Non-cacheable steps are keyed by what they produced
                let fingerprint = if cacheable {
                    fingerprint
                } else {
                    output_fingerprint(&fingerprint, &values)
                };
                if let Some(execution) = run.step_mut(spec.name()) {
                    execution.fingerprint = Some(fingerprint.clone());
                }

                let outputs = self.store_outputs(run, spec, &fingerprint, values).await?;
                (ExecutionStatus::Executed, fingerprint, outputs)
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            step = %spec.name(),
            status = status.as_str(),
            duration_ms,
            "Step finished"
        );

        if let Some(execution) = run.step_mut(spec.name()) {
            execution.status = status;
            execution.outputs = outputs.clone();
            execution.finished_at = Some(Utc::now());
        }
        if let Some(execution) = run.step(spec.name()) {
            self.registry.record_step(run, execution).await?;
        }

        Ok(Produced {
            fingerprint,
            outputs,
        })
    }

    /// Fetch artifact values for upstream-bound inputs
    async fn load_upstream_values(
        &self,
        run: &Run,
        spec: &StepSpec,
        produced: &HashMap<String, Produced>,
        inputs: &mut StepInputs,
    ) -> Result<(), PipelineError> {
        for (input, binding) in spec.bindings() {
            if let Binding::Upstream { step, output } = binding {
                let reference = produced
                    .get(step)
                    .and_then(|p| p.outputs.get(output))
                    .ok_or_else(|| {
                        PipelineError::step_not_found(
                            &run.pipeline,
                            run.id,
                            step,
                            Some(output.clone()),
                        )
                    })?;
                let value = self.artifacts.get(&reference.key).await?;
                inputs.artifacts.insert(input.clone(), value);
            }
        }
        Ok(())
    }

    /// Persist a step's outputs and commit the execution
    async fn store_outputs(
        &self,
        run: &Run,
        spec: &StepSpec,
        fingerprint: &str,
        values: BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, ArtifactRef>, PipelineError> {
        let mut references = BTreeMap::new();
        for (output, value) in values {
            let key =
                ArtifactKey::new(run.pipeline.clone(), spec.name(), output.clone(), fingerprint);
            let reference = self.artifacts.put(&key, &value, run.id).await?;
            references.insert(output, reference);
        }

        let manifest = self
            .artifacts
            .commit(&StepManifest {
                pipeline: run.pipeline.clone(),
                step: spec.name().to_string(),
                fingerprint: fingerprint.to_string(),
                run_id: run.id,
                created_at: Utc::now(),
                outputs: references,
            })
            .await?;

        Ok(manifest.outputs)
    }

    /// Handle a step failure: mark the step and the run failed, record the run
    async fn fail_run(
        &self,
        run: &mut Run,
        step: &str,
        failure: StepFailure,
    ) -> Result<Run, PipelineError> {
        let message = match &failure {
            StepFailure::Step(e) => e.to_string(),
            StepFailure::Core(e) => e.to_string(),
        };
        error!(run_id = %run.id, %step, error = %message, "Step failed, aborting run");

        let now = Utc::now();
        if let Some(execution) = run.step_mut(step) {
            execution.status = ExecutionStatus::Failed;
            execution.finished_at = Some(now);
            execution.error = Some(message.clone());
        }
        run.status = RunStatus::Failed;
        run.finished_at = Some(now);
        run.error = Some(format!("step '{}' failed: {}", step, message));

        if let Err(e) = self.registry.record(run).await {
            warn!(run_id = %run.id, error = %e, "Failed to record failed run");
        }

        Err(match failure {
            StepFailure::Step(source) => PipelineError::StepExecution {
                pipeline: run.pipeline.clone(),
                run_id: run.id,
                step: step.to_string(),
                source,
            },
            StepFailure::Core(e) => e,
        })
    }

    /// Finalize a successful run
    async fn complete_run(&self, run: &mut Run) -> Result<Run, PipelineError> {
        run.status = RunStatus::Succeeded;
        run.finished_at = Some(Utc::now());
        self.registry.record(run).await?;

        let cached = run
            .steps
            .iter()
            .filter(|s| s.status == ExecutionStatus::SkippedCached)
            .count();
        info!(run_id = %run.id, cached, "Run completed successfully");

        Ok(run.clone())
    }
}

/// Run the computation and check it produced exactly the declared outputs
async fn compute_outputs(
    spec: &StepSpec,
    inputs: &StepInputs,
) -> Result<BTreeMap<String, Value>, StepError> {
    debug!(step = %spec.name(), kind = spec.step().kind(), "Executing step");
    let outputs = spec.step().compute(inputs).await?;

    let declared = spec.step().outputs();
    if let Some(extra) = outputs.names().find(|name| !declared.contains(name)) {
        return Err(StepError::UnexpectedOutput(extra.to_string()));
    }

    let mut values = outputs.into_inner();
    let mut checked = BTreeMap::new();
    for output in declared {
        let value = values
            .remove(*output)
            .ok_or_else(|| StepError::MissingOutput(output.to_string()))?;
        checked.insert(output.to_string(), value);
    }
    Ok(checked)
}

/// Every `Param` binding without a default must be supplied
fn check_parameters(pipeline: &Pipeline, parameters: &Parameters) -> Result<(), PipelineError> {
    for spec in pipeline.execution_order() {
        for (input, binding) in spec.bindings() {
            if let Binding::Param {
                name,
                default: None,
            } = binding
            {
                if !parameters.contains_key(name) {
                    return Err(PipelineError::MissingParameter {
                        pipeline: pipeline.name().to_string(),
                        step: spec.name().to_string(),
                        input: input.clone(),
                        parameter: name.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Fingerprint identities for every input, plus literal/param values
fn resolve_bindings(
    run: &Run,
    spec: &StepSpec,
    parameters: &Parameters,
    produced: &HashMap<String, Produced>,
) -> Result<(BTreeMap<String, InputIdentity>, StepInputs), PipelineError> {
    let mut identities = BTreeMap::new();
    let mut inputs = StepInputs::default();

    for (input, binding) in spec.bindings() {
        let identity = match binding {
            Binding::Upstream { step, output } => {
                // Topological order guarantees the upstream step finished
                let upstream = produced.get(step).ok_or_else(|| {
                    PipelineError::step_not_found(&run.pipeline, run.id, step, Some(output.clone()))
                })?;
                InputIdentity::Artifact {
                    fingerprint: upstream.fingerprint.clone(),
                    output: output.clone(),
                }
            }
            Binding::Literal(value) => {
                inputs.params.insert(input.clone(), value.clone());
                InputIdentity::Value(value.clone())
            }
            Binding::Param { name, default } => {
                let value = parameters
                    .get(name)
                    .or(default.as_ref())
                    .cloned()
                    .ok_or_else(|| PipelineError::MissingParameter {
                        pipeline: run.pipeline.clone(),
                        step: spec.name().to_string(),
                        input: input.clone(),
                        parameter: name.clone(),
                    })?;
                inputs.params.insert(input.clone(), value.clone());
                InputIdentity::Value(value)
            }
        };
        identities.insert(input.clone(), identity);
    }

    Ok((identities, inputs))
}

/// A manifest from an older step version may lack outputs declared now
fn covers_outputs(manifest: &StepManifest, spec: &StepSpec) -> bool {
    spec.step()
        .outputs()
        .iter()
        .all(|output| manifest.outputs.contains_key(*output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::PipelineBuilder;
    use crate::core::step::{Step, StepOutputs};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Constant;

    #[async_trait]
    impl Step for Constant {
        fn kind(&self) -> &str {
            "constant"
        }

        fn inputs(&self) -> &[&str] {
            &["value"]
        }

        fn outputs(&self) -> &[&str] {
            &["value"]
        }

        async fn compute(&self, inputs: &StepInputs) -> Result<StepOutputs, StepError> {
            StepOutputs::new().with("value", inputs.value("value")?)
        }
    }

    /// Declares an output it never produces
    struct Forgetful;

    #[async_trait]
    impl Step for Forgetful {
        fn kind(&self) -> &str {
            "forgetful"
        }

        fn inputs(&self) -> &[&str] {
            &[]
        }

        fn outputs(&self) -> &[&str] {
            &["a", "b"]
        }

        async fn compute(&self, _inputs: &StepInputs) -> Result<StepOutputs, StepError> {
            StepOutputs::new().with("a", &1)
        }
    }

    /// Reads shared state, so it opts out of caching
    struct Volatile(Arc<AtomicI64>);

    #[async_trait]
    impl Step for Volatile {
        fn kind(&self) -> &str {
            "volatile"
        }

        fn cacheable(&self) -> bool {
            false
        }

        fn inputs(&self) -> &[&str] {
            &[]
        }

        fn outputs(&self) -> &[&str] {
            &["value"]
        }

        async fn compute(&self, _inputs: &StepInputs) -> Result<StepOutputs, StepError> {
            StepOutputs::new().with("value", &self.0.load(Ordering::SeqCst))
        }
    }

    fn create_test_executor() -> (Executor, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let executor = Executor::new(
            ArtifactStore::new(temp_dir.path().join("artifacts")),
            RunRegistry::new(temp_dir.path().join("runs")),
        );
        (executor, temp_dir)
    }

    #[tokio::test]
    async fn test_missing_parameter_rejected_before_run() {
        let (executor, _temp) = create_test_executor();
        let pipeline = PipelineBuilder::new("p")
            .step(StepSpec::new("c", Constant).input("value", Binding::param("x")))
            .build()
            .unwrap();

        let result = executor.run(&pipeline, &Parameters::new()).await;
        assert!(matches!(result, Err(PipelineError::MissingParameter { .. })));
        assert!(executor.registry().get_runs("p").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_param_default_used() {
        let (executor, _temp) = create_test_executor();
        let pipeline = PipelineBuilder::new("p")
            .step(StepSpec::new("c", Constant).input("value", Binding::param_or("x", 7)))
            .build()
            .unwrap();

        let run = executor.run(&pipeline, &Parameters::new()).await.unwrap();
        let reference = run.step("c").unwrap().output("value").unwrap();
        assert_eq!(executor.artifacts().get(&reference.key).await.unwrap(), json!(7));
    }

    #[tokio::test]
    async fn test_missing_output_fails_step() {
        let (executor, _temp) = create_test_executor();
        let pipeline = PipelineBuilder::new("p")
            .step(StepSpec::new("f", Forgetful))
            .build()
            .unwrap();

        let result = executor.run(&pipeline, &Parameters::new()).await;
        assert!(matches!(
            result,
            Err(PipelineError::StepExecution {
                source: StepError::MissingOutput(ref output),
                ..
            }) if output == "b"
        ));

        // Nothing was committed, so the next run executes again
        let run = executor.registry().latest_run("p").await.unwrap();
        let fingerprint = run.step("f").unwrap().fingerprint.clone().unwrap();
        assert!(!executor.artifacts().exists("p", "f", &fingerprint).await);
    }

    #[tokio::test]
    async fn test_rerun_reuses_parameters() {
        let (executor, _temp) = create_test_executor();
        let pipeline = PipelineBuilder::new("p")
            .step(StepSpec::new("c", Constant).input("value", Binding::param("x")))
            .build()
            .unwrap();

        let parameters: Parameters = [("x".to_string(), json!("hello"))].into_iter().collect();
        let first = executor.run(&pipeline, &parameters).await.unwrap();
        let second = executor.rerun(&pipeline, first.id).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(second.parameters, parameters);
        assert!(second.fully_cached());
    }

    #[tokio::test]
    async fn test_non_cacheable_step_keyed_by_content() {
        let (executor, _temp) = create_test_executor();
        let state = Arc::new(AtomicI64::new(1));
        let pipeline = PipelineBuilder::new("p")
            .step(StepSpec::new("source", Volatile(Arc::clone(&state))))
            .step(
                StepSpec::new("copy", Constant)
                    .input("value", Binding::upstream("source", "value")),
            )
            .build()
            .unwrap();

        let first = executor.run(&pipeline, &Parameters::new()).await.unwrap();
        let second = executor.run(&pipeline, &Parameters::new()).await.unwrap();
        assert_eq!(second.step("source").unwrap().status, ExecutionStatus::Executed);
        assert_eq!(second.step("copy").unwrap().status, ExecutionStatus::SkippedCached);
        assert_eq!(
            first.step("source").unwrap().fingerprint,
            second.step("source").unwrap().fingerprint
        );

        state.store(2, Ordering::SeqCst);
        let third = executor.run(&pipeline, &Parameters::new()).await.unwrap();
        assert_eq!(third.step("copy").unwrap().status, ExecutionStatus::Executed);
        let reference = third.step("copy").unwrap().output("value").unwrap();
        assert_eq!(executor.artifacts().get(&reference.key).await.unwrap(), json!(2));
    }
}
