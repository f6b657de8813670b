//! Conditional deployment of trained models.
//!
//! `DeploymentTrigger` turns evaluation metrics into a boolean decision and
//! `DeployModel` acts on it, so "deploy only if evaluation passed" is an
//! ordinary branch in the graph.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{content_hash, Step, StepError, StepInputs, StepOutputs};
use crate::domain::short_fingerprint;

use super::model::{LinearModel, Metrics};

const SERVICE_FILE: &str = "service.json";

/// Identity of a deployed prediction service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHandle {
    pub name: String,

    /// Content hash of the deployed model
    pub model_hash: String,

    /// Where the service state lives
    pub location: PathBuf,
}

/// A deployed service together with the model it serves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedService {
    pub handle: ServiceHandle,
    pub model: LinearModel,
}

/// Outcome of the deploy step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Deployment {
    Deployed { service: ServiceHandle },
    NotDeployed { reason: String },
}

impl Deployment {
    pub fn is_deployed(&self) -> bool {
        matches!(self, Self::Deployed { .. })
    }
}

/// Hosts prediction services
#[async_trait]
pub trait ModelServer: Send + Sync {
    /// Deploy `model` under `name`, replacing any previous deployment
    async fn deploy(&self, name: &str, model: &LinearModel) -> Result<ServiceHandle, StepError>;

    /// The service deployed under `name`, if any
    async fn find(&self, name: &str) -> Result<Option<DeployedService>, StepError>;
}

/// Model server backed by a local directory (one subdirectory per service)
#[derive(Debug, Clone)]
pub struct LocalModelServer {
    root: PathBuf,
}

impl LocalModelServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Server in the configured location ($DRIFTLINE_HOME/services)
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::services_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn service_dir(&self, name: &str) -> Result<PathBuf, StepError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
        if !valid {
            return Err(StepError::invalid(
                "service",
                format!("invalid service name '{}'", name),
            ));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl ModelServer for LocalModelServer {
    async fn deploy(&self, name: &str, model: &LinearModel) -> Result<ServiceHandle, StepError> {
        let dir = self.service_dir(name)?;
        let model_value =
            serde_json::to_value(model).map_err(|e| StepError::invalid("model", e))?;
        let service = DeployedService {
            handle: ServiceHandle {
                name: name.to_string(),
                model_hash: content_hash(&model_value),
                location: dir.clone(),
            },
            model: model.clone(),
        };
        let bytes =
            serde_json::to_vec_pretty(&service).map_err(|e| StepError::failed(e.to_string()))?;

        tokio::task::spawn_blocking(move || replace_file(&dir, SERVICE_FILE, &bytes))
            .await
            .map_err(|e| StepError::failed(format!("deployment task failed: {}", e)))?
            .map_err(|e| StepError::failed(format!("failed to deploy service '{}': {}", name, e)))?;

        Ok(service.handle)
    }

    async fn find(&self, name: &str) -> Result<Option<DeployedService>, StepError> {
        let path = self.service_dir(name)?.join(SERVICE_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                StepError::failed(format!("corrupt service file {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StepError::failed(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Atomically replace `dir/file_name`
fn replace_file(dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new().prefix(".tmp-").tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(file_name)).map_err(|e| e.error)?;
    Ok(())
}

/// Decides whether a model is good enough to deploy
#[derive(Debug, Clone, Default)]
pub struct DeploymentTrigger;

#[async_trait]
impl Step for DeploymentTrigger {
    fn kind(&self) -> &str {
        "deployment_trigger"
    }

    fn inputs(&self) -> &[&str] {
        &["metrics", "min_r2"]
    }

    fn outputs(&self) -> &[&str] {
        &["decision"]
    }

    async fn compute(&self, inputs: &StepInputs) -> Result<StepOutputs, StepError> {
        let metrics: Metrics = inputs.get("metrics")?;
        let min_r2: f64 = inputs.get("min_r2")?;

        let decision = metrics.r2 >= min_r2;
        info!(r2 = metrics.r2, min_r2, decision, "Deployment decision");
        StepOutputs::new().with("decision", &decision)
    }
}

/// Deploys the model when the decision is positive.
///
/// Service state lives outside the artifact store, so this step always runs.
pub struct DeployModel {
    server: Arc<dyn ModelServer>,
}

impl DeployModel {
    pub fn new(server: Arc<dyn ModelServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Step for DeployModel {
    fn kind(&self) -> &str {
        "deploy_model"
    }

    fn cacheable(&self) -> bool {
        false
    }

    fn inputs(&self) -> &[&str] {
        &["model", "decision", "service"]
    }

    fn outputs(&self) -> &[&str] {
        &["deployment"]
    }

    async fn compute(&self, inputs: &StepInputs) -> Result<StepOutputs, StepError> {
        let model: LinearModel = inputs.get("model")?;
        let decision: bool = inputs.get("decision")?;
        let service: String = inputs.get("service")?;

        let deployment = if decision {
            let handle = self.server.deploy(&service, &model).await?;
            info!(
                service = %handle.name,
                model = short_fingerprint(&handle.model_hash),
                "Model deployed"
            );
            Deployment::Deployed { service: handle }
        } else {
            warn!(%service, "Model did not pass evaluation, not deploying");
            Deployment::NotDeployed {
                reason: "model did not meet the deployment criteria".to_string(),
            }
        };
        StepOutputs::new().with("deployment", &deployment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn model() -> LinearModel {
        LinearModel {
            target: "y".to_string(),
            features: vec!["x".to_string()],
            intercept: 1.0,
            coefficients: vec![2.0],
        }
    }

    fn deploy_inputs(decision: bool) -> StepInputs {
        let artifacts: BTreeMap<String, serde_json::Value> = [
            ("model".to_string(), serde_json::to_value(model()).unwrap()),
            ("decision".to_string(), json!(decision)),
        ]
        .into_iter()
        .collect();
        let params = [("service".to_string(), json!("default"))].into_iter().collect();
        StepInputs { artifacts, params }
    }

    #[tokio::test]
    async fn test_local_server_round_trip() {
        let temp = TempDir::new().unwrap();
        let server = LocalModelServer::new(temp.path());

        assert!(server.find("default").await.unwrap().is_none());
        let handle = server.deploy("default", &model()).await.unwrap();
        let found = server.find("default").await.unwrap().unwrap();
        assert_eq!(found.handle, handle);
        assert_eq!(found.model, model());
    }

    #[tokio::test]
    async fn test_invalid_service_name() {
        let temp = TempDir::new().unwrap();
        let server = LocalModelServer::new(temp.path());
        assert!(matches!(
            server.deploy("../escape", &model()).await,
            Err(StepError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_deploy_only_on_positive_decision() {
        let temp = TempDir::new().unwrap();
        let server = Arc::new(LocalModelServer::new(temp.path()));
        let step = DeployModel::new(server.clone());

        let outputs = step.compute(&deploy_inputs(false)).await.unwrap();
        let deployment: Deployment =
            serde_json::from_value(outputs.get("deployment").unwrap().clone()).unwrap();
        assert!(!deployment.is_deployed());
        assert!(server.find("default").await.unwrap().is_none());

        let outputs = step.compute(&deploy_inputs(true)).await.unwrap();
        let deployment: Deployment =
            serde_json::from_value(outputs.get("deployment").unwrap().clone()).unwrap();
        assert!(deployment.is_deployed());
        assert!(server.find("default").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_trigger_threshold() {
        let metrics = Metrics {
            r2: 0.7,
            rmse: 1.0,
            rows: 10,
        };
        let inputs = |min_r2: f64| StepInputs {
            artifacts: [("metrics".to_string(), serde_json::to_value(metrics).unwrap())]
                .into_iter()
                .collect(),
            params: [("min_r2".to_string(), json!(min_r2))].into_iter().collect(),
        };

        let pass = DeploymentTrigger.compute(&inputs(0.7)).await.unwrap();
        assert_eq!(pass.get("decision"), Some(&json!(true)));
        let fail = DeploymentTrigger.compute(&inputs(0.9)).await.unwrap();
        assert_eq!(fail.get("decision"), Some(&json!(false)));
    }
}
