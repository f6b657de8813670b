//! Lifecycle steps.
//!
//! Reference implementations of the steps wired by [`crate::lifecycle`]:
//! data loading and preparation, linear model training and evaluation,
//! conditional deployment, batch prediction and drift detection.

pub mod data;
pub mod deploy;
pub mod drift;
pub mod model;
pub mod predict;

pub use data::{CleanData, LoadData, SplitData};
pub use deploy::{
    DeployModel, DeployedService, Deployment, DeploymentTrigger, LocalModelServer, ModelServer,
    ServiceHandle,
};
pub use drift::DriftDetectorStep;
pub use model::{EvaluateModel, LinearModel, Metrics, TrainModel};
pub use predict::{PredictionServiceLoader, Predictor};
