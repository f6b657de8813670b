//! Append-only, content-addressed artifact store on the local filesystem.
//!
//! Layout:
//!
//! ```text
//! <root>/<pipeline>/<step>/<fingerprint>/outputs/<output>.json   one per output
//! <root>/<pipeline>/<step>/<fingerprint>/manifest.json           written last
//! ```
//!
//! Names outside `[A-Za-z0-9._-]` are sanitized and suffixed with a hash of
//! the raw name (see [`path_segment`]), so distinct pipelines, steps and
//! outputs never share a path.
//!
//! Files are published with a no-clobber rename from a temp file in the same
//! directory, so readers never observe partial writes and concurrent writers
//! of the same key collapse to the first one. A step execution only counts as
//! cached once its manifest exists.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{short_fingerprint, ArtifactKey, ArtifactRef};

use super::error::PipelineError;
use super::fingerprint::{content_hash, hash_str, to_canonical_json};

const MANIFEST_FILE: &str = "manifest.json";
const OUTPUTS_DIR: &str = "outputs";

/// Stored form of one artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredArtifact {
    reference: ArtifactRef,
    value: Value,
}

/// Marks a step execution's outputs as complete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepManifest {
    pub pipeline: String,
    pub step: String,
    pub fingerprint: String,

    /// Run that executed the step
    pub run_id: Uuid,

    pub created_at: DateTime<Utc>,

    /// Reference for each declared output
    pub outputs: BTreeMap<String, ArtifactRef>,
}

/// Filesystem artifact store
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Use the given directory as the store root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open the store in the configured location ($DRIFTLINE_HOME/artifacts)
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::artifacts_dir()?))
    }

    /// Get the store root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn execution_dir(&self, pipeline: &str, step: &str, fingerprint: &str) -> PathBuf {
        self.root
            .join(path_segment(pipeline))
            .join(path_segment(step))
            .join(path_segment(fingerprint))
    }

    fn artifact_path(&self, key: &ArtifactKey) -> PathBuf {
        self.execution_dir(&key.pipeline, &key.step, &key.fingerprint)
            .join(OUTPUTS_DIR)
            .join(format!("{}.json", path_segment(&key.output)))
    }

    /// Store a value; an existing artifact under the same key is returned as is
    pub async fn put(
        &self,
        key: &ArtifactKey,
        value: &Value,
        run_id: Uuid,
    ) -> Result<ArtifactRef, PipelineError> {
        let path = self.artifact_path(key);
        if let Some(existing) = read_json::<StoredArtifact>(&path).await? {
            debug!(artifact = %key, "Artifact already stored");
            return Ok(existing.reference);
        }

        let reference = ArtifactRef {
            key: key.clone(),
            content_hash: content_hash(value),
            size_bytes: to_canonical_json(value).len() as u64,
            run_id,
            created_at: Utc::now(),
        };
        let stored = StoredArtifact {
            reference,
            value: value.clone(),
        };

        if publish(&path, serde_json::to_vec(&stored)?).await? {
            debug!(artifact = %key, bytes = stored.reference.size_bytes, "Artifact stored");
            return Ok(stored.reference);
        }

        // Lost a race against an identical write
        read_json::<StoredArtifact>(&path)
            .await?
            .map(|existing| existing.reference)
            .ok_or_else(|| PipelineError::artifact_not_found(key))
    }

    /// Load the value stored under a key
    pub async fn get(&self, key: &ArtifactKey) -> Result<Value, PipelineError> {
        read_json::<StoredArtifact>(&self.artifact_path(key))
            .await?
            .map(|stored| stored.value)
            .ok_or_else(|| PipelineError::artifact_not_found(key))
    }

    /// Load and deserialize the value stored under a key
    pub async fn get_as<T: DeserializeOwned>(&self, key: &ArtifactKey) -> Result<T, PipelineError> {
        let value = self.get(key).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Load the reference stored under a key
    pub async fn get_ref(&self, key: &ArtifactKey) -> Result<ArtifactRef, PipelineError> {
        read_json::<StoredArtifact>(&self.artifact_path(key))
            .await?
            .map(|stored| stored.reference)
            .ok_or_else(|| PipelineError::artifact_not_found(key))
    }

    /// Whether a complete execution with this fingerprint is stored
    pub async fn exists(&self, pipeline: &str, step: &str, fingerprint: &str) -> bool {
        fs::try_exists(self.execution_dir(pipeline, step, fingerprint).join(MANIFEST_FILE))
            .await
            .unwrap_or(false)
    }

    /// Cache lookup: the committed manifest for an execution, if any
    pub async fn lookup(
        &self,
        pipeline: &str,
        step: &str,
        fingerprint: &str,
    ) -> Result<Option<StepManifest>, PipelineError> {
        let path = self.execution_dir(pipeline, step, fingerprint).join(MANIFEST_FILE);
        match read_json::<StepManifest>(&path).await {
            Ok(manifest) => Ok(manifest),
            Err(PipelineError::Serialization(e)) => {
                // Treat an unreadable manifest as a miss; the step re-executes
                warn!(path = %path.display(), error = %e, "Ignoring corrupt manifest");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Mark an execution complete; the first committed manifest wins
    pub async fn commit(&self, manifest: &StepManifest) -> Result<StepManifest, PipelineError> {
        let path = self
            .execution_dir(&manifest.pipeline, &manifest.step, &manifest.fingerprint)
            .join(MANIFEST_FILE);

        if publish(&path, serde_json::to_vec_pretty(manifest)?).await? {
            debug!(
                step = %manifest.step,
                fingerprint = short_fingerprint(&manifest.fingerprint),
                "Execution committed"
            );
            return Ok(manifest.clone());
        }

        read_json::<StepManifest>(&path)
            .await?
            .ok_or_else(|| PipelineError::storage(&path, ErrorKind::NotFound.into()))
    }

    /// Fingerprints of every committed execution of a step
    pub async fn list_executions(
        &self,
        pipeline: &str,
        step: &str,
    ) -> Result<Vec<String>, PipelineError> {
        let dir = self.root.join(path_segment(pipeline)).join(path_segment(step));
        let mut fingerprints = Vec::new();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(fingerprints),
            Err(e) => return Err(PipelineError::storage(&dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::storage(&dir, e))?
        {
            if entry.path().join(MANIFEST_FILE).exists() {
                if let Some(name) = entry.file_name().to_str() {
                    fingerprints.push(name.to_string());
                }
            }
        }

        fingerprints.sort();
        Ok(fingerprints)
    }
}

/// Read a JSON file, `None` if it does not exist
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PipelineError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PipelineError::storage(path, e)),
    }
}

/// Atomically create `path` with `bytes`; false if it already existed
async fn publish(path: &Path, bytes: Vec<u8>) -> Result<bool, PipelineError> {
    let target = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || publish_blocking(&target, &bytes))
        .await
        .map_err(|e| PipelineError::storage(path, std::io::Error::other(e)))?;
    result.map_err(|e| PipelineError::storage(path, e))
}

fn publish_blocking(path: &Path, bytes: &[u8]) -> std::io::Result<bool> {
    let dir = path.parent().ok_or_else(|| {
        std::io::Error::new(ErrorKind::InvalidInput, "artifact path has no parent")
    })?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new().prefix(".tmp-").tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}

/// Encode a name as a single path component.
///
/// Names made only of `[A-Za-z0-9._-]` are used as is. Any other name is
/// sanitized and suffixed with `~` and a hash of the raw name; `~` never
/// survives sanitizing, so the encoding is one-to-one.
pub(crate) fn path_segment(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned == name && !matches!(name, "" | "." | "..") {
        return cleaned;
    }
    format!("{}~{}", cleaned, short_fingerprint(&hash_str(name)))
}
