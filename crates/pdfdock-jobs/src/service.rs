//! Boundary operations used by the HTTP layer, the CLI and tests.
//!
//! Identifiers arrive here as untrusted strings and are parsed before they
//! touch the filesystem.

use crate::backend::{TaskBackend, WorkItem};
use crate::error::{FailureKind, JobError, Result, TaskFailure};
use crate::job::{JobId, JobOptions, JobStatus, JobView};
use crate::processor::Operation;
use crate::signer::{DownloadSigner, Redemption};
use crate::store::{JobStore, RECORD_FILE, UPLOADS_DIR};
use crate::upload::{self, Upload};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// A token for one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadLink {
    pub filename: String,
    pub size_bytes: u64,
    pub token: String,
}

/// An authorized file, ready to be streamed.
#[derive(Debug)]
pub struct Download {
    pub filename: String,
    pub size_bytes: u64,
    pub file: tokio::fs::File,
}

impl Download {
    /// Read the whole file into memory.
    pub async fn into_bytes(mut self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.size_bytes as usize);
        self.file.read_to_end(&mut bytes).await?;
        Ok(bytes)
    }
}

#[derive(Clone)]
pub struct JobService {
    store: JobStore,
    backend: Arc<dyn TaskBackend>,
    signer: DownloadSigner,
    max_upload_bytes: u64,
}

impl JobService {
    pub fn new(
        store: JobStore,
        backend: Arc<dyn TaskBackend>,
        signer: DownloadSigner,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            store,
            backend,
            signer,
            max_upload_bytes,
        }
    }

    /// Create a job, store its inputs and hand it to the task backend.
    ///
    /// Returns as soon as the backend accepted the work. If the backend
    /// refuses it, the job is moved to `error` (`DispatchFailed`) and the
    /// call fails, so no job is left `queued` without a worker.
    pub async fn submit(
        &self,
        operation: &str,
        options: JobOptions,
        uploads: Vec<Upload>,
    ) -> Result<JobId> {
        let operation = operation.trim();
        if operation.is_empty() {
            return Err(JobError::Validation("Missing operation".to_string()));
        }
        let arity = Operation::from_name(operation).arity();
        if !arity.accepts(uploads.len()) {
            return Err(JobError::Validation(format!(
                "{} expects {}, got {}",
                operation,
                arity,
                uploads.len()
            )));
        }
        let names = upload::plan_names(&uploads)?;

        let mut job = self.store.create(operation, options).await?;
        let input_paths = match upload::write_all(
            &job.workspace_path.join(UPLOADS_DIR),
            uploads,
            names,
            self.max_upload_bytes,
        )
        .await
        {
            Ok(paths) => paths,
            Err(err) => {
                if let Err(cleanup) = self.store.remove(&job.id).await {
                    tracing::warn!(job_id = %job.id, error = %cleanup, "failed to discard rejected job");
                }
                return Err(err);
            }
        };

        match self.backend.enqueue(WorkItem::new(job.clone(), input_paths)).await {
            Ok(handle) => {
                tracing::info!(
                    job_id = %handle.job_id,
                    operation,
                    strategy = handle.strategy.as_str(),
                    "job submitted"
                );
                Ok(job.id)
            }
            Err(err) => {
                let reason = err.to_string();
                tracing::error!(job_id = %job.id, "Failed to dispatch job: {}", reason);
                job.fail(&TaskFailure::new(FailureKind::DispatchFailed, reason.clone()))?;
                self.store.save(&job).await?;
                Err(JobError::DispatchFailed {
                    job_id: job.id,
                    reason,
                })
            }
        }
    }

    /// Current state of a job.
    pub async fn status(&self, job_id: &str) -> Result<JobView> {
        let id = JobId::parse(job_id)?;
        Ok(self.store.load(&id).await?.view())
    }

    /// Delete a job's workspace and record. Unknown jobs are `NotFound`.
    pub async fn remove(&self, job_id: &str) -> Result<()> {
        let id = JobId::parse(job_id)?;
        self.store.remove(&id).await?;
        tracing::info!(job_id = %id, "job removed");
        Ok(())
    }

    /// Issue a download token for one produced file of a finished job.
    pub async fn authorize_download(&self, job_id: &str, filename: &str) -> Result<String> {
        let id = JobId::parse(job_id)?;
        let job = self.store.load(&id).await?;
        if job.status != JobStatus::Done {
            return Err(JobError::NotReady {
                job_id: id,
                status: job.status,
            });
        }
        let listed = job
            .result_manifest
            .iter()
            .flatten()
            .any(|entry| entry.filename == filename);
        if !listed {
            return Err(JobError::NotFound(format!("{}/{}", id, filename)));
        }
        Ok(self.signer.issue(id.as_str(), filename))
    }

    /// Tokens for every file in a finished job's manifest, in manifest order.
    pub async fn links(&self, job_id: &str) -> Result<Vec<DownloadLink>> {
        let id = JobId::parse(job_id)?;
        let job = self.store.load(&id).await?;
        match (job.status, job.result_manifest) {
            (JobStatus::Done, Some(manifest)) => Ok(manifest
                .into_iter()
                .map(|entry| DownloadLink {
                    token: self.signer.issue(id.as_str(), &entry.filename),
                    filename: entry.filename,
                    size_bytes: entry.size_bytes,
                })
                .collect()),
            (status, _) => Err(JobError::NotReady { job_id: id, status }),
        }
    }

    /// Open a produced file after validating its token.
    ///
    /// Token problems are `Forbidden`; a valid token for a file that no longer
    /// exists (the job was removed) is `NotFound`.
    pub async fn fetch(&self, job_id: &str, filename: &str, token: &str) -> Result<Download> {
        if !is_plain_filename(filename) {
            return Err(JobError::Forbidden(format!("invalid file name: {}", filename)));
        }
        if let Redemption::Denied(reason) = self.signer.redeem(job_id, filename, token) {
            tracing::debug!(job_id, filename, ?reason, "download token rejected");
            return Err(JobError::Forbidden("invalid download token".to_string()));
        }

        let id = JobId::parse(job_id)?;
        let path = self.store.workspace(&id).join(filename);
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(JobError::NotFound(format!("{}/{}", id, filename)))
            }
            Err(err) => return Err(err.into()),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(JobError::NotFound(format!("{}/{}", id, filename)));
        }

        Ok(Download {
            filename: filename.to_string(),
            size_bytes: metadata.len(),
            file,
        })
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn TaskBackend> {
        &self.backend
    }
}

/// A single normal path component that is not the job record.
fn is_plain_filename(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    ) && name != RECORD_FILE
        && !name.contains('\\')
}
