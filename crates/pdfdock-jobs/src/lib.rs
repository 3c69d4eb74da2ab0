//! Job lifecycle and task dispatch for pdfdock
//!
//! A submission becomes a [`Job`] with its own workspace directory. The job is
//! handed to a [`TaskBackend`] (a Redis-backed queue or an in-process worker
//! pool), executed by the [`Dispatcher`] through a registered [`Processor`],
//! and its outputs are downloaded with tokens issued by [`DownloadSigner`].

pub mod backend;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod processor;
pub mod runtime;
pub mod service;
pub mod settings;
pub mod signer;
pub mod store;
pub mod upload;

pub use backend::local::LocalPool;
pub use backend::memory::InMemoryQueue;
pub use backend::queue::{QueueBackend, QueueWorker, WorkQueue};
#[cfg(feature = "redis")]
pub use backend::redis::RedisQueue;
pub use backend::{DispatchHandle, Strategy, TaskBackend, WorkItem};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{FailureKind, JobError, Result, TaskFailure};
pub use job::{Job, JobId, JobOptions, JobStatus, JobView, ManifestEntry};
pub use processor::{Arity, Operation, Processor, Registry};
pub use runtime::Runtime;
pub use service::{Download, DownloadLink, JobService};
pub use settings::{LogFormat, Settings};
pub use signer::{DownloadSigner, Redemption};
pub use store::JobStore;
pub use upload::Upload;
