//! Batch inference against a deployed prediction service.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::core::{Step, StepError, StepInputs, StepOutputs};
use crate::domain::{short_fingerprint, Dataset};

use super::deploy::{DeployedService, ModelServer};

/// Loads the service deployed under the `service` name
pub struct PredictionServiceLoader {
    server: Arc<dyn ModelServer>,
}

impl PredictionServiceLoader {
    pub fn new(server: Arc<dyn ModelServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Step for PredictionServiceLoader {
    fn kind(&self) -> &str {
        "prediction_service_loader"
    }

    fn cacheable(&self) -> bool {
        false
    }

    fn inputs(&self) -> &[&str] {
        &["service"]
    }

    fn outputs(&self) -> &[&str] {
        &["service"]
    }

    async fn compute(&self, inputs: &StepInputs) -> Result<StepOutputs, StepError> {
        let name: String = inputs.get("service")?;
        let service = self.server.find(&name).await?.ok_or_else(|| {
            StepError::failed(format!("no prediction service named '{}' is deployed", name))
        })?;

        info!(
            service = %name,
            model = short_fingerprint(&service.handle.model_hash),
            "Prediction service loaded"
        );
        StepOutputs::new().with("service", &service)
    }
}

/// Predicts the target for every row of `data`
#[derive(Debug, Clone, Default)]
pub struct Predictor;

#[async_trait]
impl Step for Predictor {
    fn kind(&self) -> &str {
        "predictor"
    }

    fn inputs(&self) -> &[&str] {
        &["service", "data"]
    }

    fn outputs(&self) -> &[&str] {
        &["predictions"]
    }

    async fn compute(&self, inputs: &StepInputs) -> Result<StepOutputs, StepError> {
        let service: DeployedService = inputs.get("service")?;
        let data: Dataset = inputs.get("data")?;

        let predictions = service.model.predict(&data)?;
        info!(rows = predictions.len(), "Predictions computed");
        StepOutputs::new().with("predictions", &predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Column;
    use crate::steps::deploy::LocalModelServer;
    use crate::steps::model::LinearModel;
    use serde_json::json;
    use tempfile::TempDir;

    fn service_inputs(name: &str) -> StepInputs {
        StepInputs {
            artifacts: Default::default(),
            params: [("service".to_string(), json!(name))].into_iter().collect(),
        }
    }

    #[tokio::test]
    async fn test_loader_fails_without_deployment() {
        let temp = TempDir::new().unwrap();
        let loader = PredictionServiceLoader::new(Arc::new(LocalModelServer::new(temp.path())));

        let result = loader.compute(&service_inputs("default")).await;
        assert!(matches!(result, Err(StepError::Failed(message)) if message.contains("default")));
    }

    #[tokio::test]
    async fn test_load_and_predict() {
        let temp = TempDir::new().unwrap();
        let server = Arc::new(LocalModelServer::new(temp.path()));
        let model = LinearModel {
            target: "y".to_string(),
            features: vec!["x".to_string()],
            intercept: 1.0,
            coefficients: vec![2.0],
        };
        server.deploy("default", &model).await.unwrap();

        let loaded = PredictionServiceLoader::new(server)
            .compute(&service_inputs("default"))
            .await
            .unwrap();

        let data = Dataset::new(vec![
            Column::numeric("x", vec![0.0, 1.5]),
            Column::categorical("city", vec!["a", "b"]),
        ])
        .unwrap();
        let inputs = StepInputs {
            artifacts: [
                ("service".to_string(), loaded.get("service").unwrap().clone()),
                ("data".to_string(), serde_json::to_value(&data).unwrap()),
            ]
            .into_iter()
            .collect(),
            params: Default::default(),
        };

        let outputs = Predictor.compute(&inputs).await.unwrap();
        assert_eq!(outputs.get("predictions"), Some(&json!([1.0, 4.0])));
    }
}
