//! Execution wrapper shared by every task backend.
//!
//! The dispatcher is the only writer of a job record once the job has been
//! handed to a backend. It reloads the record, refuses to touch terminal jobs,
//! runs the resolved processor and persists exactly one terminal state.

use crate::backend::WorkItem;
use crate::error::{JobError, Result, TaskFailure};
use crate::job::{Job, JobStatus, ManifestEntry};
use crate::processor::Registry;
use crate::store::{JobStore, RECORD_FILE, UPLOADS_DIR};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What a single dispatch did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The job reached `done` with this manifest
    Done(Vec<ManifestEntry>),
    /// The job reached `error`
    Failed(TaskFailure),
    /// The job was already terminal; nothing was changed
    Skipped(JobStatus),
    /// The job was removed before it could run
    Missing,
}

#[derive(Clone)]
pub struct Dispatcher {
    store: JobStore,
    registry: Arc<Registry>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(store: JobStore, registry: Registry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            timeout: None,
        }
    }

    /// Bound the wall-clock time of a single unit of work.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run one work item to a terminal state.
    ///
    /// Processor failures end up in the job record; only persistence failures
    /// are returned as errors.
    pub async fn dispatch(&self, item: WorkItem) -> Result<DispatchOutcome> {
        let job_id = item.job.id.clone();
        let mut job = match self.store.load(&job_id).await {
            Ok(job) => job,
            Err(JobError::NotFound(_)) => {
                tracing::warn!(job_id = %job_id, "job vanished before execution, dropping work item");
                return Ok(DispatchOutcome::Missing);
            }
            Err(err) => return Err(err),
        };

        if job.is_terminal() {
            tracing::info!(job_id = %job.id, status = %job.status, "job already finished, skipping redelivery");
            return Ok(DispatchOutcome::Skipped(job.status));
        }
        if job.status == JobStatus::Running {
            tracing::warn!(job_id = %job.id, "job was left running, executing again");
        }

        job.start()?;
        self.store.save(&job).await?;
        tracing::info!(job_id = %job.id, operation = %job.operation, "job running");

        let result = match self.execute(&job, item.input_paths).await {
            Ok(outputs) => build_manifest(&job.workspace_path, &outputs).await,
            Err(failure) => Err(failure),
        };

        let outcome = match result {
            Ok(manifest) => {
                job.complete(manifest.clone())?;
                DispatchOutcome::Done(manifest)
            }
            Err(failure) => {
                job.fail(&failure)?;
                DispatchOutcome::Failed(failure)
            }
        };

        match self.store.save(&job).await {
            Ok(()) => {}
            Err(JobError::NotFound(_)) => {
                tracing::warn!(job_id = %job.id, "job removed while running, result discarded");
                return Ok(DispatchOutcome::Missing);
            }
            Err(err) => return Err(err),
        }

        match &outcome {
            DispatchOutcome::Done(manifest) => {
                tracing::info!(job_id = %job.id, files = manifest.len(), "job done")
            }
            DispatchOutcome::Failed(failure) => {
                tracing::warn!(job_id = %job.id, kind = %failure.kind, "job failed: {}", failure.message)
            }
            _ => {}
        }
        Ok(outcome)
    }

    async fn execute(&self, job: &Job, inputs: Vec<PathBuf>) -> std::result::Result<Vec<PathBuf>, TaskFailure> {
        let handler = self.registry.resolve(&job.operation)?;

        // Run on its own task so a panicking processor surfaces as a join error
        // instead of taking the worker down.
        let task_job = job.clone();
        let task = tokio::spawn(async move { handler.handle(&task_job, &inputs).await });
        let abort = task.abort_handle();

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Err(TaskFailure::execution(format!(
                        "timed out after {}s",
                        limit.as_secs()
                    )));
                }
            },
            None => task.await,
        };

        match joined {
            Ok(result) => result,
            Err(err) if err.is_panic() => Err(TaskFailure::execution("unit of work panicked")),
            Err(err) => Err(TaskFailure::execution(format!("unit of work aborted: {}", err))),
        }
    }
}

/// Describe the produced files, preserving their order.
async fn build_manifest(
    workspace: &Path,
    outputs: &[PathBuf],
) -> std::result::Result<Vec<ManifestEntry>, TaskFailure> {
    if outputs.is_empty() {
        return Err(TaskFailure::execution("no output files were produced"));
    }

    let mut manifest = Vec::with_capacity(outputs.len());
    for path in outputs {
        if path.parent() != Some(workspace) {
            return Err(TaskFailure::execution(format!(
                "output {} is outside the job workspace",
                path.display()
            )));
        }
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| TaskFailure::execution(format!("invalid output name {}", path.display())))?;
        if filename == RECORD_FILE || filename == UPLOADS_DIR {
            return Err(TaskFailure::execution(format!("output name {} is reserved", filename)));
        }

        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            TaskFailure::execution(format!("output {} is missing: {}", filename, e))
        })?;
        if !metadata.is_file() {
            return Err(TaskFailure::execution(format!("output {} is not a file", filename)));
        }

        manifest.push(ManifestEntry {
            filename: filename.to_string(),
            size_bytes: metadata.len(),
        });
    }
    Ok(manifest)
}
