//! Configuration for driftline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DRIFTLINE_HOME)
//! 2. Config file (.driftline/config.yaml)
//! 3. Defaults (~/.driftline)
//!
//! Config file discovery:
//! - Searches current directory and parents for .driftline/config.yaml
//! - A relative `paths.home` is resolved against the .driftline/ directory

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::drift::{AggregationPolicy, ThresholdPolicy, DEFAULT_THRESHOLD};

const HOME_ENV: &str = "DRIFTLINE_HOME";

/// Default R² a model needs on the test split to be deployed
pub const DEFAULT_MIN_R2: f64 = 0.5;

/// Default name of the deployed prediction service
pub const DEFAULT_SERVICE: &str = "default";

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub drift: Option<DriftConfig>,
    #[serde(default)]
    pub deployment: Option<DeploymentConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .driftline/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriftConfig {
    pub threshold: Option<f64>,
    #[serde(default)]
    pub per_feature: BTreeMap<String, f64>,
    pub aggregation: Option<AggregationPolicy>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    pub min_r2: Option<f64>,
    pub service: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Absolute path to driftline home (artifacts, runs, services)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Default drift thresholds and aggregation
    pub drift: ThresholdPolicy,
    pub deployment: DeploymentSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentSettings {
    pub min_r2: f64,
    pub service: String,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            min_r2: DEFAULT_MIN_R2,
            service: DEFAULT_SERVICE.to_string(),
        }
    }
}

impl ResolvedConfig {
    pub fn artifacts_dir(&self) -> PathBuf {
        self.home.join("artifacts")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    pub fn services_dir(&self) -> PathBuf {
        self.home.join("services")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".driftline").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".driftline");

    resolve_config(std::env::var(HOME_ENV).ok(), find_config_file(), default_home)
}

fn resolve_config(
    env_home: Option<String>,
    config_file: Option<PathBuf>,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    let config = config_file.as_deref().map(load_config_file).transpose()?;

    let home = if let Some(env_home) = env_home {
        PathBuf::from(env_home)
    } else if let (Some(config_path), Some(home_path)) = (
        config_file.as_deref(),
        config.as_ref().and_then(|c| c.paths.home.as_deref()),
    ) {
        let driftline_dir = config_path.parent().unwrap_or(Path::new("."));
        resolve_path(driftline_dir, home_path)
    } else {
        default_home
    };

    let drift = config.as_ref().and_then(|c| c.drift.as_ref());
    let drift = ThresholdPolicy {
        default_threshold: drift.and_then(|d| d.threshold).unwrap_or(DEFAULT_THRESHOLD),
        per_feature: drift.map(|d| d.per_feature.clone()).unwrap_or_default(),
        aggregation: drift.and_then(|d| d.aggregation).unwrap_or_default(),
    };

    let deployment = config.as_ref().and_then(|c| c.deployment.as_ref());
    let deployment = DeploymentSettings {
        min_r2: deployment.and_then(|d| d.min_r2).unwrap_or(DEFAULT_MIN_R2),
        service: deployment
            .and_then(|d| d.service.clone())
            .unwrap_or_else(|| DEFAULT_SERVICE.to_string()),
    };

    Ok(ResolvedConfig {
        home,
        config_file,
        drift,
        deployment,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the driftline home directory
pub fn driftline_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the artifact store directory ($DRIFTLINE_HOME/artifacts)
pub fn artifacts_dir() -> Result<PathBuf> {
    Ok(config()?.artifacts_dir())
}

/// Get the run registry directory ($DRIFTLINE_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.runs_dir())
}

/// Get the deployed services directory ($DRIFTLINE_HOME/services)
pub fn services_dir() -> Result<PathBuf> {
    Ok(config()?.services_dir())
}
