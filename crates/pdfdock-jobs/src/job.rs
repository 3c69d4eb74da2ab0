use crate::error::{FailureKind, JobError, Result, TaskFailure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Operation-specific parameters. The core never interprets them.
pub type JobOptions = serde_json::Map<String, serde_json::Value>;

/// Progress reported once a worker has accepted the job.
pub const PROGRESS_ACCEPTED: u8 = 5;

/// Opaque job identifier, also the name of the job's workspace directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    const LEN: usize = 32;

    /// Allocate a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Accept an identifier presented by a caller.
    ///
    /// Only the exact shape produced by [`JobId::generate`] is accepted, so a
    /// parsed id is always safe to join onto the jobs root.
    pub fn parse(raw: &str) -> Result<Self> {
        let well_formed = raw.len() == Self::LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if well_formed {
            Ok(Self(raw.to_string()))
        } else {
            Err(JobError::NotFound(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl JobStatus {
    /// `done` and `error` are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One produced artifact, relative to the job's workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub size_bytes: u64,
}

/// The persisted record of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub operation: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default)]
    pub options: JobOptions,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub workspace_path: PathBuf,
    pub result_manifest: Option<Vec<ManifestEntry>>,
    pub error_kind: Option<FailureKind>,
    pub error_message: Option<String>,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        operation: impl Into<String>,
        options: JobOptions,
        workspace_path: PathBuf,
    ) -> Self {
        Self {
            id,
            operation: operation.into(),
            status: JobStatus::Queued,
            progress: 0,
            options,
            created_at: Utc::now(),
            finished_at: None,
            workspace_path,
            result_manifest: None,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `queued -> running`. Re-entering `running` is allowed so that a
    /// redelivered work item can resume a job whose worker died.
    pub fn start(&mut self) -> Result<()> {
        self.guard(JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.progress = self.progress.max(PROGRESS_ACCEPTED);
        Ok(())
    }

    /// `running -> done`.
    pub fn complete(&mut self, manifest: Vec<ManifestEntry>) -> Result<()> {
        self.guard(JobStatus::Done)?;
        if self.status != JobStatus::Running || manifest.is_empty() {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: JobStatus::Done,
            });
        }
        self.status = JobStatus::Done;
        self.progress = 100;
        self.finished_at = Some(Utc::now());
        self.result_manifest = Some(manifest);
        self.error_kind = None;
        self.error_message = None;
        Ok(())
    }

    /// `queued | running -> error`.
    pub fn fail(&mut self, failure: &TaskFailure) -> Result<()> {
        self.guard(JobStatus::Error)?;
        self.status = JobStatus::Error;
        self.finished_at = Some(Utc::now());
        self.result_manifest = None;
        self.error_kind = Some(failure.kind);
        self.error_message = Some(failure.to_string());
        Ok(())
    }

    fn guard(&self, to: JobStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    /// The part of the record exposed to pollers.
    pub fn view(&self) -> JobView {
        JobView {
            id: self.id.clone(),
            operation: self.operation.clone(),
            status: self.status,
            progress: self.progress,
            created_at: self.created_at,
            finished_at: self.finished_at,
            result_manifest: self.result_manifest.clone(),
            error_kind: self.error_kind,
            error_message: self.error_message.clone(),
        }
    }
}

/// Read-only projection returned by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub operation: String,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_manifest: Option<Vec<ManifestEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn job() -> Job {
        Job::new(
            JobId::generate(),
            "merge",
            JobOptions::new(),
            PathBuf::from("/tmp/pdfdock-test"),
        )
    }

    fn manifest() -> Vec<ManifestEntry> {
        vec![ManifestEntry {
            filename: "out.pdf".to_string(),
            size_bytes: 42,
        }]
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = job();
        assert_eq!(job.status, JobStatus::Queued);

        job.start().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, PROGRESS_ACCEPTED);

        job.complete(manifest()).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.progress, 100);
        assert!(job.finished_at.is_some());
        assert!(job.error_message.is_none());
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        let mut done = job();
        done.start().unwrap();
        done.complete(manifest()).unwrap();
        let finished_at = done.finished_at;

        assert!(matches!(
            done.start(),
            Err(JobError::InvalidTransition { from: JobStatus::Done, .. })
        ));
        assert!(done.fail(&TaskFailure::execution("late")).is_err());
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.finished_at, finished_at);

        let mut failed = job();
        failed.fail(&TaskFailure::unsupported("nope")).unwrap();
        assert!(failed.start().is_err());
        assert!(failed.complete(manifest()).is_err());
        assert_eq!(failed.status, JobStatus::Error);
    }

    #[test]
    fn test_complete_requires_running_and_outputs() {
        let mut queued = job();
        assert!(queued.complete(manifest()).is_err());

        let mut running = job();
        running.start().unwrap();
        assert!(running.complete(Vec::new()).is_err());
        assert_eq!(running.status, JobStatus::Running);
    }

    #[test]
    fn test_fail_records_kind_and_message() {
        let mut job = job();
        job.start().unwrap();
        job.fail(&TaskFailure::dependency("qpdf not found")).unwrap();
        assert_eq!(job.error_kind, Some(FailureKind::DependencyUnavailable));
        assert_eq!(
            job.error_message.as_deref(),
            Some("DependencyUnavailable: qpdf not found")
        );
        assert!(job.result_manifest.is_none());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }

    #[test]
    fn test_view_omits_absent_fields() {
        let view = job().view();
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("result_manifest").is_none());
        assert!(json.get("error_message").is_none());
        assert_eq!(json["status"], "queued");
    }

    proptest! {
        #[test]
        fn prop_generated_ids_parse(_seed in 0u8..16) {
            let id = JobId::generate();
            prop_assert_eq!(JobId::parse(id.as_str()).unwrap(), id);
        }

        #[test]
        fn prop_foreign_ids_rejected(raw in "[^0-9a-f]{1,40}|[0-9a-f]{0,31}|\\.\\./[0-9a-f]{29}") {
            prop_assert!(matches!(JobId::parse(&raw), Err(JobError::NotFound(_))));
        }
    }
}
