//! The training and inference pipelines.
//!
//! Training: load → clean → split → train → evaluate → trigger → deploy.
//! Inference: load the new data, load the deployed service, predict, and
//! check the new data for drift against the training data.
//!
//! Run parameters:
//!
//! | parameter       | pipeline  | default     |
//! |-----------------|-----------|-------------|
//! | `data`          | both      | required    |
//! | `reference`     | inference | required    |
//! | `target`        | both      | `"target"`  |
//! | `test_fraction` | training  | `0.2`       |
//! | `min_r2`        | training  | `0.5`       |
//! | `service`       | both      | `"default"` |
//! | `features`      | inference | `[]`        |
//! | `policy`        | inference | `null`      |

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use crate::config::{DEFAULT_MIN_R2, DEFAULT_SERVICE};
use crate::core::{Binding, GraphValidationError, Pipeline, PipelineRegistry, StepSpec};
use crate::steps::{
    CleanData, DeployModel, DeploymentTrigger, DriftDetectorStep, EvaluateModel, LoadData,
    ModelServer, PredictionServiceLoader, Predictor, SplitData, TrainModel,
};

pub const TRAINING_PIPELINE: &str = "training_pipeline";
pub const INFERENCE_PIPELINE: &str = "inference_pipeline";

pub const DEFAULT_TARGET: &str = "target";
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

pub fn training_pipeline(server: Arc<dyn ModelServer>) -> Result<Pipeline, GraphValidationError> {
    Pipeline::builder(TRAINING_PIPELINE)
        .step(StepSpec::new("load_data", LoadData).input("path", Binding::param("data")))
        .step(
            StepSpec::new("clean_data", CleanData)
                .input("data", Binding::upstream("load_data", "dataset")),
        )
        .step(
            StepSpec::new("split_data", SplitData)
                .input("data", Binding::upstream("clean_data", "dataset"))
                .input(
                    "test_fraction",
                    Binding::param_or("test_fraction", DEFAULT_TEST_FRACTION),
                ),
        )
        .step(
            StepSpec::new("train_model", TrainModel)
                .input("train", Binding::upstream("split_data", "train"))
                .input("target", Binding::param_or("target", DEFAULT_TARGET)),
        )
        .step(
            StepSpec::new("evaluate_model", EvaluateModel)
                .input("model", Binding::upstream("train_model", "model"))
                .input("test", Binding::upstream("split_data", "test")),
        )
        .step(
            StepSpec::new("deployment_trigger", DeploymentTrigger)
                .input("metrics", Binding::upstream("evaluate_model", "metrics"))
                .input("min_r2", Binding::param_or("min_r2", DEFAULT_MIN_R2)),
        )
        .step(
            StepSpec::new("deploy_model", DeployModel::new(server))
                .input("model", Binding::upstream("train_model", "model"))
                .input("decision", Binding::upstream("deployment_trigger", "decision"))
                .input("service", Binding::param_or("service", DEFAULT_SERVICE)),
        )
        .build()
}

pub fn inference_pipeline(server: Arc<dyn ModelServer>) -> Result<Pipeline, GraphValidationError> {
    Pipeline::builder(INFERENCE_PIPELINE)
        .step(StepSpec::new("load_inference_data", LoadData).input("path", Binding::param("data")))
        .step(
            StepSpec::new("prediction_service_loader", PredictionServiceLoader::new(server))
                .input("service", Binding::param_or("service", DEFAULT_SERVICE)),
        )
        .step(
            StepSpec::new("predictor", Predictor)
                .input("service", Binding::upstream("prediction_service_loader", "service"))
                .input("data", Binding::upstream("load_inference_data", "dataset")),
        )
        .step(
            StepSpec::new("load_training_data", LoadData)
                .input("path", Binding::param("reference")),
        )
        .step(
            StepSpec::new("drift_detector", DriftDetectorStep)
                .input("reference", Binding::upstream("load_training_data", "dataset"))
                .input("current", Binding::upstream("load_inference_data", "dataset"))
                .input("features", Binding::param_or("features", json!([])))
                .input("target", Binding::param_or("target", DEFAULT_TARGET))
                .input("policy", Binding::param_or("policy", Value::Null)),
        )
        .build()
}

/// Build both lifecycle pipelines and register them
pub fn register_lifecycle(
    registry: &mut PipelineRegistry,
    server: Arc<dyn ModelServer>,
) -> Result<()> {
    registry.register(training_pipeline(Arc::clone(&server))?);
    registry.register(inference_pipeline(server)?);
    Ok(())
}
