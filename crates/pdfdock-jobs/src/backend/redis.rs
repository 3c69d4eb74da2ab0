use super::queue::{QueueBackend, WorkQueue};
use crate::error::{JobError, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use std::fmt;
use std::time::Duration;

/// Redis list used as a shared work queue between processes.
///
/// Producers `LPUSH` onto `<queue>`. A consumer reserves the oldest item by
/// moving it onto its own `<queue>:inflight:<consumer>` list and removes it
/// from there once the job has been dispatched. While it works, the consumer
/// keeps `<queue>:lease:<consumer>` alive; when that key expires, any worker
/// may push the consumer's in-flight items back onto the queue.
#[derive(Clone)]
pub struct RedisQueue {
    conn: MultiplexedConnection,
    queue_key: String,
    reserve_script: Script,
    requeue_script: Script,
}

impl RedisQueue {
    /// Connect to the server and check that it answers.
    pub async fn connect(url: &str, queue_key: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| JobError::ConfigError(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))?;

        // KEYS: queue, in-flight list, lease key, consumer set
        // ARGV: consumer, lease in milliseconds
        let reserve_script = Script::new(
            r#"
            redis.call('SET', KEYS[3], '1', 'PX', ARGV[2])
            redis.call('SADD', KEYS[4], ARGV[1])
            return redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
        "#,
        );

        // KEYS: queue, consumer set
        // ARGV: key prefix
        let requeue_script = Script::new(
            r#"
            local moved = 0
            for _, consumer in ipairs(redis.call('SMEMBERS', KEYS[2])) do
                if redis.call('EXISTS', ARGV[1] .. ':lease:' .. consumer) == 0 then
                    local inflight = ARGV[1] .. ':inflight:' .. consumer
                    while true do
                        local item = redis.call('RPOP', inflight)
                        if not item then break end
                        redis.call('RPUSH', KEYS[1], item)
                        moved = moved + 1
                    end
                    redis.call('SREM', KEYS[2], consumer)
                end
            end
            return moved
        "#,
        );

        let queue = Self {
            conn,
            queue_key: queue_key.to_string(),
            reserve_script,
            requeue_script,
        };
        queue.ping().await?;
        Ok(queue)
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))?;
        Ok(())
    }

    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    fn in_flight_key(&self, consumer: &str) -> String {
        format!("{}:inflight:{}", self.queue_key, consumer)
    }

    fn lease_key(&self, consumer: &str) -> String {
        format!("{}:lease:{}", self.queue_key, consumer)
    }

    fn consumers_key(&self) -> String {
        format!("{}:consumers", self.queue_key)
    }
}

impl fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueue")
            .field("queue_key", &self.queue_key)
            .finish_non_exhaustive()
    }
}

fn lease_millis(lease: Duration) -> u64 {
    u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn push(&self, payload: String) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(&self.queue_key, payload)
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))?;
        Ok(())
    }

    async fn reserve(&self, consumer: &str, lease: Duration) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = self
            .reserve_script
            .key(&self.queue_key)
            .key(self.in_flight_key(consumer))
            .key(self.lease_key(consumer))
            .key(self.consumers_key())
            .arg(consumer)
            .arg(lease_millis(lease))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))?;
        Ok(payload)
    }

    async fn ack(&self, consumer: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lrem::<_, _, ()>(self.in_flight_key(consumer), 1, payload)
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))?;
        Ok(())
    }

    async fn heartbeat(&self, consumer: &str, lease: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.lease_key(consumer))
            .arg(1)
            .arg("PX")
            .arg(lease_millis(lease))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))?;
        Ok(())
    }

    async fn requeue_abandoned(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let moved: usize = self
            .requeue_script
            .key(&self.queue_key)
            .key(self.consumers_key())
            .arg(&self.queue_key)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| JobError::BackendError(e.to_string()))?;
        Ok(moved)
    }
}

impl QueueBackend<RedisQueue> {
    pub async fn redis(url: &str, queue_key: &str) -> Result<Self> {
        Ok(Self::new(RedisQueue::connect(url, queue_key).await?))
    }
}
