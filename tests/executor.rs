//! Executor Integration Tests
//!
//! Dependency ordering, caching, cache invalidation and fail-fast behavior
//! of pipeline runs.

mod common;

use std::collections::BTreeMap;

use async_trait::async_trait;
use common::{call_log, calls, create_test_executor, CallLog, Explode, Sum};
use driftline::core::{
    Binding, GraphValidationError, Parameters, Pipeline, PipelineError, Step, StepError,
    StepInputs, StepOutputs, StepSpec,
};
use driftline::domain::{ExecutionStatus, RunStatus};
use serde_json::json;

/// root ─┬─ left ──┐
///       │         ├─ join
///       └─ right ─┘     side (independent)
fn diamond(log: &common::CallLog, root_value: f64) -> Pipeline {
    Pipeline::builder("diamond")
        .step(
            StepSpec::new("join", Sum::new("join", &["l", "r"], log))
                .input("l", Binding::upstream("left", "total"))
                .input("r", Binding::upstream("right", "total")),
        )
        .step(
            StepSpec::new("side", Sum::new("side", &["x"], log))
                .input("x", Binding::literal(5.0)),
        )
        .step(
            StepSpec::new("root", Sum::new("root", &["x"], log))
                .input("x", Binding::literal(root_value)),
        )
        .step(
            StepSpec::new("left", Sum::new("left", &["x"], log))
                .input("x", Binding::upstream("root", "total")),
        )
        .step(
            StepSpec::new("right", Sum::new("right", &["x", "k"], log))
                .input("x", Binding::upstream("root", "total"))
                .input("k", Binding::param("k")),
        )
        .build()
        .unwrap()
}

/// Publishes its input under an output called `manifest`
struct Summary {
    log: CallLog,
}

#[async_trait]
impl Step for Summary {
    fn kind(&self) -> &str {
        "summary"
    }

    fn inputs(&self) -> &[&str] {
        &["x"]
    }

    fn outputs(&self) -> &[&str] {
        &["manifest"]
    }

    async fn compute(&self, inputs: &StepInputs) -> Result<StepOutputs, StepError> {
        self.log.lock().unwrap().push("summary".to_string());
        let x: f64 = inputs.get("x")?;
        StepOutputs::new().with("manifest", &vec![x, x * 2.0])
    }
}

fn params(k: f64) -> Parameters {
    [("k".to_string(), json!(k))].into_iter().collect()
}

#[tokio::test]
async fn test_steps_run_once_in_dependency_order() {
    let (executor, _temp) = create_test_executor();
    let log = call_log();
    let pipeline = diamond(&log, 1.0);

    let run = executor.run(&pipeline, &params(10.0)).await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);

    let order = calls(&log);
    assert_eq!(order.len(), 5);
    let position = |name: &str| order.iter().position(|s| s == name).unwrap();
    for (upstream, downstream) in pipeline.edges() {
        assert!(position(&upstream) < position(&downstream));
    }

    // Step executions are recorded in execution order
    let recorded: Vec<&str> = run.steps.iter().map(|s| s.step.as_str()).collect();
    assert_eq!(recorded, order.iter().map(String::as_str).collect::<Vec<_>>());

    // root = 1, left = 1, right = 11, join = 12
    let join = run.step("join").unwrap().output("total").unwrap();
    assert_eq!(executor.artifacts().get(&join.key).await.unwrap(), json!(12.0));
}

#[test]
fn test_cycle_rejected_at_build() {
    let log = call_log();
    let result = Pipeline::builder("cyclic")
        .step(
            StepSpec::new("a", Sum::new("a", &["x"], &log))
                .input("x", Binding::upstream("c", "total")),
        )
        .step(
            StepSpec::new("b", Sum::new("b", &["x"], &log))
                .input("x", Binding::upstream("a", "total")),
        )
        .step(
            StepSpec::new("c", Sum::new("c", &["x"], &log))
                .input("x", Binding::upstream("b", "total")),
        )
        .build();

    assert!(matches!(result, Err(GraphValidationError::Cycle { steps, .. }) if steps.len() == 3));
}

#[tokio::test]
async fn test_second_run_fully_cached() {
    let (executor, _temp) = create_test_executor();
    let log = call_log();
    let pipeline = diamond(&log, 1.0);

    let first = executor.run(&pipeline, &params(10.0)).await.unwrap();
    let second = executor.run(&pipeline, &params(10.0)).await.unwrap();

    assert_eq!(calls(&log).len(), 5, "no step computed twice");
    assert!(second.fully_cached());
    assert!(second
        .steps
        .iter()
        .all(|s| s.status == ExecutionStatus::SkippedCached));

    // Same artifacts, including content hashes and producing run
    for step in &first.steps {
        let cached = second.step(&step.step).unwrap();
        assert_eq!(cached.fingerprint, step.fingerprint);
        assert_eq!(cached.outputs, step.outputs);
    }
}

#[tokio::test]
async fn test_changed_literal_invalidates_downstream_only() {
    let (executor, _temp) = create_test_executor();
    let log = call_log();

    let first = executor.run(&diamond(&log, 1.0), &params(10.0)).await.unwrap();
    log.lock().unwrap().clear();
    let second = executor.run(&diamond(&log, 2.0), &params(10.0)).await.unwrap();

    let status = |name: &str| second.step(name).unwrap().status;
    for name in ["root", "left", "right", "join"] {
        assert_eq!(status(name), ExecutionStatus::Executed, "{} should re-run", name);
        assert_ne!(
            second.step(name).unwrap().fingerprint,
            first.step(name).unwrap().fingerprint
        );
    }
    assert_eq!(status("side"), ExecutionStatus::SkippedCached);

    let mut recomputed = calls(&log);
    recomputed.sort();
    assert_eq!(recomputed, vec!["join", "left", "right", "root"]);
}

#[tokio::test]
async fn test_changed_parameter_invalidates_branch() {
    let (executor, _temp) = create_test_executor();
    let log = call_log();
    let pipeline = diamond(&log, 1.0);

    executor.run(&pipeline, &params(10.0)).await.unwrap();
    let run = executor.run(&pipeline, &params(20.0)).await.unwrap();

    let statuses: BTreeMap<&str, ExecutionStatus> =
        run.steps.iter().map(|s| (s.step.as_str(), s.status)).collect();
    assert_eq!(statuses["root"], ExecutionStatus::SkippedCached);
    assert_eq!(statuses["left"], ExecutionStatus::SkippedCached);
    assert_eq!(statuses["side"], ExecutionStatus::SkippedCached);
    assert_eq!(statuses["right"], ExecutionStatus::Executed);
    assert_eq!(statuses["join"], ExecutionStatus::Executed);
}

#[tokio::test]
async fn test_failing_step_aborts_run() {
    let (executor, _temp) = create_test_executor();
    let log = call_log();
    let pipeline = Pipeline::builder("failing")
        .step(
            StepSpec::new("root", Sum::new("root", &["x"], &log))
                .input("x", Binding::literal(1.0)),
        )
        .step(StepSpec::new("explode", Explode).input("x", Binding::upstream("root", "total")))
        .step(
            StepSpec::new("after", Sum::new("after", &["x"], &log))
                .input("x", Binding::upstream("explode", "total")),
        )
        .build()
        .unwrap();

    let result = executor.run(&pipeline, &Parameters::new()).await;
    let (run_id, source) = match result {
        Err(PipelineError::StepExecution {
            pipeline,
            run_id,
            step,
            source,
        }) => {
            assert_eq!(pipeline, "failing");
            assert_eq!(step, "explode");
            (run_id, source)
        }
        other => panic!("expected a step failure, got {:?}", other),
    };
    assert!(matches!(source, StepError::Failed(ref message) if message.contains("cannot handle")));

    // The failed run is recorded
    let run = executor.registry().get_run("failing", run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap().contains("explode"));
    assert!(run.finished_at.is_some());

    assert_eq!(run.step("root").unwrap().status, ExecutionStatus::Executed);
    let failed = run.step("explode").unwrap();
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("cannot handle"));
    assert!(failed.outputs.is_empty());
    assert_eq!(run.step("after").unwrap().status, ExecutionStatus::Pending);
    assert_eq!(calls(&log), vec!["root"]);

    // Completed steps stay cached for the next attempt
    let retry = executor.run(&pipeline, &Parameters::new()).await;
    assert!(retry.is_err());
    let retried = executor.registry().latest_run("failing").await.unwrap();
    assert_eq!(retried.step("root").unwrap().status, ExecutionStatus::SkippedCached);
}

#[tokio::test]
async fn test_output_named_manifest_stays_cached() {
    let (executor, _temp) = create_test_executor();
    let log = call_log();
    let pipeline = Pipeline::builder("summaries")
        .step(
            StepSpec::new("summary", Summary { log: log.clone() })
                .input("x", Binding::literal(2.0)),
        )
        .build()
        .unwrap();

    let first = executor.run(&pipeline, &Parameters::new()).await.unwrap();
    assert_eq!(first.status, RunStatus::Succeeded);
    assert_eq!(first.step("summary").unwrap().status, ExecutionStatus::Executed);

    let second = executor.run(&pipeline, &Parameters::new()).await.unwrap();
    assert_eq!(second.status, RunStatus::Succeeded);
    assert_eq!(second.step("summary").unwrap().status, ExecutionStatus::SkippedCached);
    assert_eq!(calls(&log), vec!["summary"]);

    let reference = second.step("summary").unwrap().output("manifest").unwrap();
    assert_eq!(reference.run_id, first.id);
    assert_eq!(executor.artifacts().get(&reference.key).await.unwrap(), json!([2.0, 4.0]));
}

#[tokio::test]
async fn test_concurrent_runs_share_cache() {
    let (executor, _temp) = create_test_executor();
    let log = call_log();
    let pipeline = diamond(&log, 1.0);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let executor = executor.clone();
            let pipeline = pipeline.clone();
            tokio::spawn(async move { executor.run(&pipeline, &params(10.0)).await.unwrap() })
        })
        .collect();

    let mut runs = Vec::new();
    for handle in handles {
        runs.push(handle.await.unwrap());
    }

    // Whoever committed first, every run sees the same artifacts
    let join = runs[0].step("join").unwrap().output("total").unwrap().clone();
    for run in &runs {
        assert_eq!(run.status, RunStatus::Succeeded);
        let other = run.step("join").unwrap().output("total").unwrap();
        assert_eq!(other.key, join.key);
        assert_eq!(other.content_hash, join.content_hash);
    }
    assert_eq!(executor.registry().get_runs("diamond").await.unwrap().len(), 4);
}

#[test]
fn test_run_from_sync_context() {
    let (executor, _temp) = create_test_executor();
    let log = call_log();
    let pipeline = diamond(&log, 3.0);

    let run = tokio_test::block_on(executor.run(&pipeline, &params(0.0))).unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.steps.len(), 5);
}
