use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::job::{Job, JobId};
use crate::settings::Settings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

pub mod local;
pub mod memory;
pub mod queue;

#[cfg(feature = "redis")]
pub mod redis;

/// A unit of asynchronous work: a job snapshot plus its input files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub operation: String,
    pub job: Job,
    pub input_paths: Vec<PathBuf>,
    /// Deliveries that ended in an infrastructure error
    #[serde(default)]
    pub attempts: u32,
}

impl WorkItem {
    pub fn new(job: Job, input_paths: Vec<PathBuf>) -> Self {
        Self {
            operation: job.operation.clone(),
            job,
            input_paths,
            attempts: 0,
        }
    }
}

/// Which strategy accepted a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Queue,
    Local,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Local => "local",
        }
    }
}

/// Fire-and-forget receipt for an accepted work item.
///
/// Completion is observed by re-reading the job record, never through the handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchHandle {
    pub job_id: JobId,
    pub strategy: Strategy,
}

/// "Run this asynchronously", independent of where it runs
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Hand a work item over for execution.
    /// Fails synchronously if the backend cannot accept it.
    async fn enqueue(&self, item: WorkItem) -> Result<DispatchHandle>;

    /// The strategy behind this backend
    fn strategy(&self) -> Strategy;

    /// Stop accepting work and release resources
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Pick the task backend once, at startup.
///
/// The queue strategy is used when it is enabled, a Redis URL is configured and
/// the server answers a `PING`. Anything else falls back to a local worker pool
/// running `dispatcher` in this process.
pub async fn init_backend(settings: &Settings, dispatcher: Dispatcher) -> Arc<dyn TaskBackend> {
    if settings.use_queue {
        if let Some(url) = settings.redis_url.as_deref().filter(|u| !u.is_empty()) {
            #[cfg(feature = "redis")]
            {
                match redis::RedisQueue::connect(url, &settings.queue_name).await {
                    Ok(queue) => {
                        tracing::info!(queue = %settings.queue_name, "using redis task queue");
                        return Arc::new(queue::QueueBackend::new(queue));
                    }
                    Err(e) => {
                        tracing::warn!("Redis queue unavailable ({}), falling back to local workers", e);
                    }
                }
            }
            #[cfg(not(feature = "redis"))]
            {
                tracing::warn!(
                    redis_url = url,
                    "built without the `redis` feature, falling back to local workers"
                );
            }
        }
    }

    tracing::info!(workers = settings.local_workers, "using local worker pool");
    Arc::new(local::LocalPool::new(
        dispatcher,
        settings.local_workers,
        settings.local_queue_capacity,
    ))
}
