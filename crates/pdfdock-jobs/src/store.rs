//! Durable job records.
//!
//! Every job owns one directory under the configured root, named after its id.
//! The directory holds `job.json` plus the job's uploads and outputs. Saves are
//! atomic: the record is written to a temporary file inside the workspace and
//! renamed over `job.json`, so concurrent readers only ever observe a complete
//! snapshot.

use crate::error::{JobError, Result};
use crate::job::{Job, JobId, JobOptions};
use chrono::{Duration, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// File name of the serialized record inside a workspace.
pub const RECORD_FILE: &str = "job.json";

/// Subdirectory of a workspace holding the submitted inputs.
pub const UPLOADS_DIR: &str = "uploads";

const TRASH_PREFIX: &str = ".trash-";

/// Non-terminal jobs older than this many TTLs are treated as abandoned.
const ABANDONED_TTL_FACTOR: i32 = 24;

/// Filesystem-backed job store.
#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Workspace directory of a job.
    pub fn workspace(&self, id: &JobId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Allocate an id, create its workspace and persist the initial record.
    pub async fn create(&self, operation: &str, options: JobOptions) -> Result<Job> {
        let id = JobId::generate();
        let workspace = self.workspace(&id);
        // `create_dir` (not `_all`) fails if the directory already exists, so
        // two jobs can never share a workspace.
        fs::create_dir(&workspace).await?;

        let job = Job::new(id, operation, options, workspace);
        if let Err(err) = self.save(&job).await {
            let _ = fs::remove_dir_all(&job.workspace_path).await;
            return Err(err);
        }

        tracing::debug!(job_id = %job.id, operation, "job created");
        Ok(job)
    }

    /// Read the current snapshot of a job.
    pub async fn load(&self, id: &JobId) -> Result<Job> {
        let path = self.workspace(id).join(RECORD_FILE);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(JobError::NotFound(id.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Atomically replace the persisted snapshot.
    pub async fn save(&self, job: &Job) -> Result<()> {
        let workspace = self.workspace(&job.id);
        if !fs::try_exists(&workspace).await? {
            return Err(JobError::NotFound(job.id.to_string()));
        }

        let payload = serde_json::to_vec_pretty(job)?;
        let temp_path = workspace.join(format!(".{}.{}.tmp", RECORD_FILE, Uuid::new_v4().simple()));

        let write = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&payload).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, workspace.join(RECORD_FILE)).await
        };

        if let Err(err) = write.await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Delete a job's workspace and record together.
    ///
    /// The workspace is first renamed to a hidden name inside the root, so it
    /// disappears for readers in one step before the subtree is deleted.
    pub async fn remove(&self, id: &JobId) -> Result<()> {
        let workspace = self.workspace(id);
        let trash = self
            .root
            .join(format!("{}{}-{}", TRASH_PREFIX, id, Uuid::new_v4().simple()));

        match fs::rename(&workspace, &trash).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(JobError::NotFound(id.to_string()))
            }
            Err(err) => return Err(err.into()),
        }

        fs::remove_dir_all(&trash).await?;
        tracing::debug!(job_id = %id, "job removed");
        Ok(())
    }

    /// Ids of every job currently in the store.
    pub async fn list(&self) -> Result<Vec<JobId>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|s| JobId::parse(s).ok()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Remove expired jobs and leftovers of interrupted removals.
    ///
    /// Terminal jobs expire `ttl` after `finished_at`; jobs that never reached
    /// a terminal state expire much later, measured from `created_at`.
    pub async fn sweep_expired(&self, ttl: std::time::Duration) -> Result<usize> {
        // A ttl beyond what a timestamp can express means "keep forever".
        let ttl = Duration::from_std(ttl).unwrap_or(Duration::MAX);
        let now = Utc::now();
        let mut removed = 0;

        for id in self.list().await? {
            let job = match self.load(&id).await {
                Ok(job) => job,
                Err(JobError::NotFound(_)) => continue,
                Err(err) => {
                    tracing::warn!(job_id = %id, error = %err, "skipping unreadable job record");
                    continue;
                }
            };

            let deadline = match job.finished_at {
                Some(finished_at) if job.is_terminal() => finished_at.checked_add_signed(ttl),
                _ => ttl
                    .checked_mul(ABANDONED_TTL_FACTOR)
                    .and_then(|limit| job.created_at.checked_add_signed(limit)),
            };
            let expired = deadline.is_some_and(|deadline| deadline <= now);

            if expired {
                match self.remove(&id).await {
                    Ok(()) | Err(JobError::NotFound(_)) => removed += 1,
                    Err(err) => tracing::warn!(job_id = %id, error = %err, "failed to sweep job"),
                }
            }
        }

        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(TRASH_PREFIX) {
                let _ = fs::remove_dir_all(entry.path()).await;
            }
        }

        if removed > 0 {
            tracing::info!(removed, "swept expired jobs");
        }
        Ok(removed)
    }
}

/// Periodically run [`JobStore::sweep_expired`] until the returned handle is aborted.
pub fn spawn_sweeper(
    store: JobStore,
    ttl: std::time::Duration,
    every: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = store.sweep_expired(ttl).await {
                tracing::error!("Sweep error: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskFailure;
    use crate::job::{JobStatus, ManifestEntry};
    use serde_json::json;

    async fn store() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs")).await.unwrap();
        (dir, store)
    }

    fn options(value: serde_json::Value) -> JobOptions {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_create_persists_queued_record() {
        let (_dir, store) = store().await;
        let job = store
            .create("split", options(json!({"ranges": "1-2,4"})))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.workspace_path.is_dir());
        assert!(job.workspace_path.join(RECORD_FILE).is_file());

        let loaded = store.load(&job.id).await.unwrap();
        assert_eq!(loaded, job);
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips_every_field() {
        let (_dir, store) = store().await;
        let mut job = store
            .create("rotate", options(json!({"degrees": 180, "scope": "1,3"})))
            .await
            .unwrap();
        job.start().unwrap();
        job.complete(vec![
            ManifestEntry {
                filename: "a.pdf".into(),
                size_bytes: 10,
            },
            ManifestEntry {
                filename: "b.pdf".into(),
                size_bytes: 20,
            },
        ])
        .unwrap();

        store.save(&job).await.unwrap();
        assert_eq!(store.load(&job.id).await.unwrap(), job);
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_files() {
        let (_dir, store) = store().await;
        let mut job = store.create("merge", JobOptions::new()).await.unwrap();
        for _ in 0..5 {
            job.progress += 1;
            store.save(&job).await.unwrap();
        }

        let names: Vec<String> = std::fs::read_dir(&job.workspace_path)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![RECORD_FILE.to_string()]);
    }

    #[tokio::test]
    async fn test_load_unknown_is_not_found() {
        let (_dir, store) = store().await;
        let err = store.load(&JobId::generate()).await.unwrap_err();
        assert!(matches!(err, JobError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_deletes_workspace() {
        let (_dir, store) = store().await;
        let job = store.create("merge", JobOptions::new()).await.unwrap();
        std::fs::write(job.workspace_path.join("out.pdf"), b"%PDF").unwrap();

        store.remove(&job.id).await.unwrap();

        assert!(!job.workspace_path.exists());
        assert!(matches!(
            store.load(&job.id).await,
            Err(JobError::NotFound(_))
        ));
        assert!(matches!(
            store.remove(&job.id).await,
            Err(JobError::NotFound(_))
        ));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_after_remove_is_not_found() {
        let (_dir, store) = store().await;
        let job = store.create("merge", JobOptions::new()).await.unwrap();
        store.remove(&job.id).await.unwrap();

        assert!(matches!(store.save(&job).await, Err(JobError::NotFound(_))));
        assert!(!job.workspace_path.exists());
    }

    #[tokio::test]
    async fn test_list_ignores_foreign_entries() {
        let (_dir, store) = store().await;
        let a = store.create("merge", JobOptions::new()).await.unwrap();
        let b = store.create("split", JobOptions::new()).await.unwrap();
        std::fs::create_dir(store.root().join("not-a-job")).unwrap();
        std::fs::write(store.root().join("stray.txt"), b"x").unwrap();

        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(store.list().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_terminal_jobs() {
        let (_dir, store) = store().await;

        let mut old = store.create("merge", JobOptions::new()).await.unwrap();
        old.fail(&TaskFailure::execution("boom")).unwrap();
        old.finished_at = Some(Utc::now() - Duration::hours(2));
        store.save(&old).await.unwrap();

        let mut fresh = store.create("merge", JobOptions::new()).await.unwrap();
        fresh.fail(&TaskFailure::execution("boom")).unwrap();
        store.save(&fresh).await.unwrap();

        let queued = store.create("merge", JobOptions::new()).await.unwrap();

        let removed = store
            .sweep_expired(std::time::Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(matches!(store.load(&old.id).await, Err(JobError::NotFound(_))));
        assert!(store.load(&fresh.id).await.is_ok());
        assert!(store.load(&queued.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_sweep_removes_abandoned_jobs() {
        let (_dir, store) = store().await;
        let mut stuck = store.create("merge", JobOptions::new()).await.unwrap();
        stuck.created_at = Utc::now() - Duration::days(3);
        store.save(&stuck).await.unwrap();

        let removed = store
            .sweep_expired(std::time::Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_sweep_with_unbounded_ttl_keeps_jobs() {
        let (_dir, store) = store().await;
        let mut old = store.create("merge", JobOptions::new()).await.unwrap();
        old.fail(&TaskFailure::execution("boom")).unwrap();
        old.finished_at = Some(Utc::now() - Duration::days(3650));
        store.save(&old).await.unwrap();

        let removed = store
            .sweep_expired(std::time::Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert!(store.load(&old.id).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_never_see_partial_record() {
        let (_dir, store) = store().await;
        let job = store.create("rotate", JobOptions::new()).await.unwrap();
        let large = "x".repeat(256 * 1024);

        let writer = {
            let store = store.clone();
            let mut job = job.clone();
            tokio::spawn(async move {
                for i in 0..100 {
                    let value = if i % 2 == 0 { large.clone() } else { "small".to_string() };
                    job.options.insert("padding".to_string(), json!(value));
                    store.save(&job).await.unwrap();
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let id = job.id.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let loaded = store.load(&id).await.expect("record must always parse");
                    assert_eq!(loaded.id, id);
                    assert_eq!(loaded.operation, "rotate");
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
