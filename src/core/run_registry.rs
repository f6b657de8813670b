//! Append-only run history with file-based persistence.
//!
//! Each pipeline has one newline-delimited JSON log
//! (`<root>/<pipeline>/runs.jsonl`). Appends hold an exclusive lock and
//! replays a shared one, so concurrent runs in other tasks or processes
//! never interleave partial lines. Runs are returned in log order, which is
//! creation order.

use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use fs2::FileExt;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Run, RunEvent, RunEventKind, StepExecution};

use super::artifact_store::path_segment;
use super::error::PipelineError;

const LOG_FILE: &str = "runs.jsonl";

/// File-based run registry
#[derive(Debug, Clone)]
pub struct RunRegistry {
    root: PathBuf,
}

impl RunRegistry {
    /// Use the given directory as the registry root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open the registry in the configured location ($DRIFTLINE_HOME/runs)
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::runs_dir()?))
    }

    /// Get the registry root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to a pipeline's run log
    pub fn log_path(&self, pipeline: &str) -> PathBuf {
        self.root.join(path_segment(pipeline)).join(LOG_FILE)
    }

    /// Append an event to its pipeline's log
    pub async fn append(&self, event: &RunEvent) -> Result<(), PipelineError> {
        let path = self.log_path(&event.pipeline);
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let target = path.clone();
        tokio::task::spawn_blocking(move || append_locked(&target, &line))
            .await
            .map_err(|e| PipelineError::storage(&path, std::io::Error::other(e)))?
            .map_err(|e| PipelineError::storage(&path, e))?;

        debug!(run_id = %event.run_id, event = event.kind.name(), "Run event appended");
        Ok(())
    }

    /// Log the creation of a run
    pub async fn begin(&self, run: &Run) -> Result<(), PipelineError> {
        let plan = run.steps.iter().map(|s| s.step.clone()).collect();
        self.append(&RunEvent::new(
            run.id,
            run.pipeline.clone(),
            RunEventKind::RunStarted {
                parameters: run.parameters.clone(),
                plan,
            },
        ))
        .await
    }

    /// Log a step outcome of an in-progress run
    pub async fn record_step(
        &self,
        run: &Run,
        execution: &StepExecution,
    ) -> Result<(), PipelineError> {
        self.append(&RunEvent::new(
            run.id,
            run.pipeline.clone(),
            RunEventKind::StepFinished {
                execution: execution.clone(),
            },
        ))
        .await
    }

    /// Persist a run; the latest recorded snapshot of a run is authoritative
    pub async fn record(&self, run: &Run) -> Result<(), PipelineError> {
        self.append(&RunEvent::new(
            run.id,
            run.pipeline.clone(),
            RunEventKind::RunFinished { run: run.clone() },
        ))
        .await
    }

    /// Replay all events of a pipeline in order
    pub async fn replay(&self, pipeline: &str) -> Result<Vec<RunEvent>, PipelineError> {
        let mut events = read_events(self.log_path(pipeline)).await?;
        events.retain(|event| event.pipeline == pipeline);
        Ok(events)
    }

    /// All runs of a pipeline, oldest first
    pub async fn get_runs(&self, pipeline: &str) -> Result<Vec<Run>, PipelineError> {
        let events = self.replay(pipeline).await?;

        let mut order: Vec<Uuid> = Vec::new();
        let mut grouped: HashMap<Uuid, Vec<RunEvent>> = HashMap::new();
        for event in events {
            let bucket = grouped.entry(event.run_id).or_insert_with(|| {
                order.push(event.run_id);
                Vec::new()
            });
            bucket.push(event);
        }

        Ok(order
            .into_iter()
            .filter_map(|id| grouped.get(&id).and_then(|events| Run::from_events(events)))
            .collect())
    }

    /// The most recently created run of a pipeline
    pub async fn latest_run(&self, pipeline: &str) -> Result<Run, PipelineError> {
        self.get_runs(pipeline)
            .await?
            .pop()
            .ok_or_else(|| PipelineError::run_not_found(pipeline, None))
    }

    /// A specific run of a pipeline
    pub async fn get_run(&self, pipeline: &str, run_id: Uuid) -> Result<Run, PipelineError> {
        self.get_runs(pipeline)
            .await?
            .into_iter()
            .find(|run| run.id == run_id)
            .ok_or_else(|| PipelineError::run_not_found(pipeline, Some(run_id)))
    }

    /// The execution record of a named step within a run
    pub fn get_step<'a>(
        &self,
        run: &'a Run,
        step: &str,
    ) -> Result<&'a StepExecution, PipelineError> {
        run.step(step)
            .ok_or_else(|| PipelineError::step_not_found(&run.pipeline, run.id, step, None))
    }

    /// Names of pipelines with a run log
    pub async fn list_pipelines(&self) -> Result<Vec<String>, PipelineError> {
        let mut pipelines = BTreeSet::new();

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PipelineError::storage(&self.root, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::storage(&self.root, e))?
        {
            let path = entry.path().join(LOG_FILE);
            if path.exists() {
                // Directory names are encoded; the events carry the real name
                for event in read_events(path).await? {
                    pipelines.insert(event.pipeline);
                }
            }
        }

        Ok(pipelines.into_iter().collect())
    }
}

async fn read_events(path: PathBuf) -> Result<Vec<RunEvent>, PipelineError> {
    let target = path.clone();
    let lines = tokio::task::spawn_blocking(move || read_locked(&target))
        .await
        .map_err(|e| PipelineError::storage(&path, std::io::Error::other(e)))?
        .map_err(|e| PipelineError::storage(&path, e))?;

    let mut events = Vec::with_capacity(lines.len());
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line)?);
    }
    Ok(events)
}

fn append_locked(path: &Path, line: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;
    let written = file.write_all(line).and_then(|_| file.flush());
    let unlocked = FileExt::unlock(&file);
    written.and(unlocked)
}

fn read_locked(path: &Path) -> std::io::Result<Vec<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    file.lock_shared()?;
    let lines = BufReader::new(&file).lines().collect::<std::io::Result<Vec<_>>>();
    let unlocked = FileExt::unlock(&file);
    let lines = lines?;
    unlocked?;
    Ok(lines)
}
