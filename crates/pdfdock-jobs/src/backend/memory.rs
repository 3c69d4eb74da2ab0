use super::queue::WorkQueue;
use crate::error::{JobError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<String>,
    in_flight: HashMap<String, Vec<String>>,
    leases: HashMap<String, Instant>,
}

/// In-memory work queue (not persistent, for testing/dev)
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    state: Arc<Mutex<State>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items waiting to be reserved
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items reserved by a consumer and not yet acknowledged
    pub fn in_flight(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.in_flight.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| JobError::BackendError("Lock poisoned".to_string()))
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn push(&self, payload: String) -> Result<()> {
        self.lock()?.ready.push_back(payload);
        Ok(())
    }

    async fn reserve(&self, consumer: &str, lease: Duration) -> Result<Option<String>> {
        let mut state = self.lock()?;
        state.leases.insert(consumer.to_string(), Instant::now() + lease);
        let Some(payload) = state.ready.pop_front() else {
            return Ok(None);
        };
        state
            .in_flight
            .entry(consumer.to_string())
            .or_default()
            .push(payload.clone());
        Ok(Some(payload))
    }

    async fn ack(&self, consumer: &str, payload: &str) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(items) = state.in_flight.get_mut(consumer) {
            if let Some(pos) = items.iter().position(|item| item == payload) {
                items.remove(pos);
            }
        }
        Ok(())
    }

    async fn heartbeat(&self, consumer: &str, lease: Duration) -> Result<()> {
        self.lock()?
            .leases
            .insert(consumer.to_string(), Instant::now() + lease);
        Ok(())
    }

    async fn requeue_abandoned(&self) -> Result<usize> {
        let mut state = self.lock()?;
        let now = Instant::now();
        let expired: Vec<String> = state
            .leases
            .iter()
            .filter(|(_, until)| **until <= now)
            .map(|(consumer, _)| consumer.clone())
            .collect();

        let mut moved = 0;
        for consumer in expired {
            state.leases.remove(&consumer);
            // Abandoned items go to the front so they are redelivered first.
            for payload in state.in_flight.remove(&consumer).unwrap_or_default().into_iter().rev() {
                state.ready.push_front(payload);
                moved += 1;
            }
        }
        Ok(moved)
    }
}
