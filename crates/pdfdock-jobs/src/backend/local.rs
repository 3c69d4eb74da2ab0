//! In-process worker pool.
//!
//! A bounded channel feeds a fixed number of worker tasks; each worker runs
//! one job at a time through the shared [`Dispatcher`].

use super::{DispatchHandle, Strategy, TaskBackend, WorkItem};
use crate::dispatch::Dispatcher;
use crate::error::{JobError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub struct LocalPool {
    sender: std::sync::Mutex<Option<mpsc::Sender<WorkItem>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl LocalPool {
    /// Spawn `workers` worker tasks sharing a queue of `capacity` pending items.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(dispatcher: Dispatcher, workers: usize, capacity: usize) -> Self {
        let size = workers.max(1);
        let (sender, receiver) = mpsc::channel::<WorkItem>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..size)
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    loop {
                        // The lock is only held while waiting for the next item.
                        let next = receiver.lock().await.recv().await;
                        let Some(item) = next else {
                            break;
                        };
                        let job_id = item.job.id.clone();
                        if let Err(e) = dispatcher.dispatch(item).await {
                            tracing::error!(worker, job_id = %job_id, "Worker error: {}", e);
                        }
                    }
                    tracing::debug!(worker, "local worker stopped");
                })
            })
            .collect();

        Self {
            sender: std::sync::Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            size,
        }
    }

    /// Number of worker tasks.
    pub fn size(&self) -> usize {
        self.size
    }
}

#[async_trait]
impl TaskBackend for LocalPool {
    async fn enqueue(&self, item: WorkItem) -> Result<DispatchHandle> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| JobError::BackendError("Lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| JobError::BackendError("worker pool is shut down".to_string()))?;

        let job_id = item.job.id.clone();
        sender.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                JobError::BackendError("worker pool queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                JobError::BackendError("worker pool is shut down".to_string())
            }
        })?;

        Ok(DispatchHandle {
            job_id,
            strategy: Strategy::Local,
        })
    }

    fn strategy(&self) -> Strategy {
        Strategy::Local
    }

    /// Stop accepting work, let queued items drain and wait for the workers.
    async fn shutdown(&self) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| JobError::BackendError("Lock poisoned".to_string()))?
            .take();
        drop(sender);

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for result in futures_util::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!("Local worker panicked: {}", e);
            }
        }
        Ok(())
    }
}
