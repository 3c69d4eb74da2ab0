use super::{DispatchHandle, Strategy, TaskBackend, WorkItem};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Transport for serialized work items shared between processes.
///
/// Delivery is at-least-once: a consumer reserves an item, which stays owned
/// by that consumer until it is acknowledged. Items owned by a consumer whose
/// lease ran out are put back by [`WorkQueue::requeue_abandoned`].
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append a serialized work item
    async fn push(&self, payload: String) -> Result<()>;

    /// Take the oldest work item on behalf of `consumer` and renew its lease.
    /// Returns None if the queue is empty
    async fn reserve(&self, consumer: &str, lease: Duration) -> Result<Option<String>>;

    /// Forget a reserved item once it has been dispatched
    async fn ack(&self, consumer: &str, payload: &str) -> Result<()>;

    /// Keep `consumer` alive for another `lease`
    async fn heartbeat(&self, consumer: &str, lease: Duration) -> Result<()>;

    /// Return the reserved items of consumers whose lease expired to the queue.
    /// Returns how many items were put back
    async fn requeue_abandoned(&self) -> Result<usize>;
}

/// Queue strategy: serialize the work item and hand it to a [`WorkQueue`]
/// consumed by one or more [`QueueWorker`]s.
#[derive(Debug, Clone)]
pub struct QueueBackend<Q> {
    queue: Q,
}

impl<Q: WorkQueue> QueueBackend<Q> {
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }
}

#[async_trait]
impl<Q: WorkQueue + 'static> TaskBackend for QueueBackend<Q> {
    async fn enqueue(&self, item: WorkItem) -> Result<DispatchHandle> {
        let payload = serde_json::to_string(&item)?;
        self.queue.push(payload).await?;
        Ok(DispatchHandle {
            job_id: item.job.id,
            strategy: Strategy::Queue,
        })
    }

    fn strategy(&self) -> Strategy {
        Strategy::Queue
    }
}

/// Lease a worker holds on its reserved items unless configured otherwise.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Deliveries of one item that may fail on the store before it is dropped.
pub const MAX_DELIVERIES: u32 = 3;

/// Consumer side of the queue strategy
pub struct QueueWorker<Q> {
    queue: Q,
    dispatcher: Dispatcher,
    consumer: String,
    lease: Duration,
    idle_delay: Duration,
    error_delay: Duration,
}

impl<Q: WorkQueue> QueueWorker<Q> {
    pub fn new(queue: Q, dispatcher: Dispatcher) -> Self {
        Self {
            queue,
            dispatcher,
            consumer: Uuid::new_v4().simple().to_string(),
            lease: DEFAULT_LEASE,
            idle_delay: Duration::from_millis(100),
            error_delay: Duration::from_secs(1),
        }
    }

    /// How long reserved items stay owned without a heartbeat.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease.max(Duration::from_millis(1));
        self
    }

    /// Identity of this worker on the queue
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Put back the items of workers that stopped renewing their lease.
    pub async fn recover(&self) -> Result<usize> {
        let moved = self.queue.requeue_abandoned().await?;
        if moved > 0 {
            tracing::warn!(items = moved, "requeued work items of a stopped worker");
        }
        Ok(moved)
    }

    /// Process a single work item.
    ///
    /// Returns `Ok(false)` when the queue was empty. When the dispatcher fails
    /// on the store, the item is queued again (up to [`MAX_DELIVERIES`]) and
    /// the error is returned.
    pub async fn process_one(&self) -> Result<bool> {
        let Some(payload) = self.queue.reserve(&self.consumer, self.lease).await? else {
            return Ok(false);
        };

        let item: WorkItem = match serde_json::from_str(&payload) {
            Ok(item) => item,
            Err(e) => {
                tracing::error!("Dropping undecodable work item: {}", e);
                self.queue.ack(&self.consumer, &payload).await?;
                return Ok(true);
            }
        };

        let job_id = item.job.id.clone();
        match self.dispatcher.dispatch(item.clone()).await {
            Ok(DispatchOutcome::Skipped(status)) => {
                tracing::debug!(job_id = %job_id, %status, "redelivered work item ignored")
            }
            Ok(outcome) => tracing::debug!(job_id = %job_id, ?outcome, "work item processed"),
            Err(e) => {
                self.retry(item).await?;
                self.queue.ack(&self.consumer, &payload).await?;
                return Err(e);
            }
        }
        self.queue.ack(&self.consumer, &payload).await?;
        Ok(true)
    }

    async fn retry(&self, mut item: WorkItem) -> Result<()> {
        item.attempts += 1;
        if item.attempts >= MAX_DELIVERIES {
            tracing::error!(
                job_id = %item.job.id,
                attempts = item.attempts,
                "giving up on work item"
            );
            return Ok(());
        }
        tracing::warn!(job_id = %item.job.id, attempts = item.attempts, "work item queued again");
        self.queue.push(serde_json::to_string(&item)?).await
    }
}

impl<Q: WorkQueue + Clone + 'static> QueueWorker<Q> {
    /// Consume the queue until `shutdown` flips to `true`.
    ///
    /// The lease is renewed in the background while a job runs, and abandoned
    /// items of other workers are recovered once per lease period.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let _heartbeat = AbortOnDrop(tokio::spawn(heartbeat(
            self.queue.clone(),
            self.consumer.clone(),
            self.lease,
        )));
        let mut next_recovery = Instant::now();

        loop {
            if *shutdown.borrow() {
                tracing::info!("Queue worker stopping");
                return Ok(());
            }

            if Instant::now() >= next_recovery {
                if let Err(e) = self.recover().await {
                    tracing::warn!("Recovering abandoned work failed: {}", e);
                }
                next_recovery = Instant::now() + self.lease;
            }

            let delay = match self.process_one().await {
                Ok(true) => continue,
                Ok(false) => self.idle_delay,
                Err(e) => {
                    tracing::error!("Worker error: {}", e);
                    self.error_delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        tracing::info!("Shutdown sender dropped, queue worker stopping");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn heartbeat<Q: WorkQueue>(queue: Q, consumer: String, lease: Duration) {
    let every = (lease / 3).max(Duration::from_millis(1));
    loop {
        if let Err(e) = queue.heartbeat(&consumer, lease).await {
            tracing::warn!(consumer = %consumer, "Lease renewal failed: {}", e);
        }
        tokio::time::sleep(every).await;
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
