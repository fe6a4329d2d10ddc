//! Task queue trait and the Redis Streams transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::task::{QueueName, QueueTask};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name prefix; the queue name is appended.
    pub stream_prefix: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Max redeliveries before a task is dropped as poison
    pub max_retries: u32,
    /// Visibility timeout before an unacked task may be reclaimed
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_prefix: "vdesc:tasks".to_string(),
            consumer_group: "vdesc:workers".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            stream_prefix: std::env::var("QUEUE_STREAM_PREFIX")
                .unwrap_or_else(|_| "vdesc:tasks".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "vdesc:workers".to_string()),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
        }
    }
}

/// Transport-agnostic task queue contract.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// One-time transport setup (consumer groups). Default: nothing.
    async fn init(&self) -> QueueResult<()> {
        Ok(())
    }

    /// Enqueue a task. Rejects duplicates of in-flight tasks by
    /// idempotency key.
    async fn enqueue(&self, task: QueueTask) -> QueueResult<String>;

    /// Pop up to `count` tasks, blocking up to `block_ms` when empty.
    /// Returned tasks stay pending until acked or reclaimed.
    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueTask)>>;

    /// Acknowledge a task as processed (success or terminal failure).
    async fn ack(&self, message_id: &str) -> QueueResult<()>;

    /// Reclaim tasks from crashed workers: pending entries idle for at
    /// least `min_idle_ms`.
    async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueTask)>>;

    /// Total tasks in the queue (queued + pending).
    async fn len(&self) -> QueueResult<u64>;

    /// Redelivery count for a task.
    async fn increment_retry(&self, message_id: &str) -> QueueResult<u32>;

    /// Drop the dedup key so the same job can be enqueued again.
    async fn clear_dedup(&self, task: &QueueTask) -> QueueResult<()>;

    /// Max redeliveries before a task is dropped as poison.
    fn max_retries(&self) -> u32;
}

/// Redis Streams implementation of [`TaskQueue`].
pub struct RedisTaskQueue {
    client: redis::Client,
    config: QueueConfig,
    stream_name: String,
}

impl RedisTaskQueue {
    /// Create a queue client for one named queue.
    pub fn new(config: QueueConfig, name: QueueName) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let stream_name = format!("{}:{}", config.stream_prefix, name.as_str());
        Ok(Self {
            client,
            config,
            stream_name,
        })
    }

    fn dedup_key(&self, idempotency_key: &str) -> String {
        format!("vdesc:dedup:{idempotency_key}")
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    /// Create the consumer group if it does not exist yet.
    async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group on {}", self.stream_name),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists on {}", self.stream_name);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn enqueue(&self, task: QueueTask) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(&task)?;
        let idempotency_key = task.idempotency_key();

        let dedup_key = self.dedup_key(&idempotency_key);
        let exists: bool = conn.exists(&dedup_key).await?;
        if exists {
            warn!("Duplicate task rejected: {}", idempotency_key);
            return Err(QueueError::enqueue_failed("Duplicate task"));
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.stream_name)
            .arg("*")
            .arg("task")
            .arg(&payload)
            .arg("key")
            .arg(&idempotency_key)
            .query_async(&mut conn)
            .await?;

        // Dedup key expires after an hour in case completion never clears it
        conn.set_ex::<_, _, ()>(&dedup_key, "1", 3600).await?;

        info!(
            "Enqueued task {} on {} with message ID {}",
            idempotency_key, self.stream_name, message_id
        );

        Ok(message_id)
    }

    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueTask)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut tasks = Vec::new();

        for stream_key in result.keys {
            for entry in stream_key.ids {
                let message_id = entry.id.clone();

                if let Some(redis::Value::BulkString(payload)) = entry.map.get("task") {
                    let payload_str = String::from_utf8_lossy(payload);
                    match serde_json::from_str::<QueueTask>(&payload_str) {
                        Ok(task) => {
                            debug!("Consumed task for {} from stream", task.key());
                            tasks.push((message_id, task));
                        }
                        Err(e) => {
                            warn!("Failed to parse task payload: {}", e);
                            // Ack the malformed message to prevent reprocessing
                            self.ack(&message_id).await.ok();
                        }
                    }
                }
            }
        }

        Ok(tasks)
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged task: {}", message_id);
        Ok(())
    }

    async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueTask)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let pending_details: Vec<Vec<redis::Value>> = redis::cmd("XPENDING")
            .arg(&self.stream_name)
            .arg(&self.config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut to_claim = Vec::new();
        for detail in pending_details {
            // Format: [id, consumer, idle_time_ms, delivery_count]
            if let (Some(redis::Value::BulkString(id_bytes)), Some(redis::Value::Int(idle_ms))) =
                (detail.first(), detail.get(2))
            {
                if *idle_ms as u64 >= min_idle_ms {
                    if let Ok(id) = String::from_utf8(id_bytes.clone()) {
                        to_claim.push(id);
                    }
                }
            }
        }

        if to_claim.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms);
        for id in &to_claim {
            cmd.arg(id);
        }

        let claimed: Vec<Vec<redis::Value>> = cmd.query_async(&mut conn).await?;

        let mut tasks = Vec::new();
        for message in claimed {
            let (Some(redis::Value::BulkString(id_bytes)), Some(redis::Value::Array(fields))) =
                (message.first(), message.get(1))
            else {
                continue;
            };
            let Ok(message_id) = String::from_utf8(id_bytes.clone()) else {
                continue;
            };

            // Fields come as [name, value, name, value, ...]
            let mut payload = None;
            for pair in fields.chunks(2) {
                if let [redis::Value::BulkString(name), redis::Value::BulkString(value)] = pair {
                    if name.as_slice() == b"task" {
                        payload = String::from_utf8(value.clone()).ok();
                        break;
                    }
                }
            }

            if let Some(payload) = payload {
                match serde_json::from_str::<QueueTask>(&payload) {
                    Ok(task) => {
                        info!("Claimed pending task for {}", task.key());
                        tasks.push((message_id, task));
                    }
                    Err(e) => {
                        warn!("Failed to parse claimed task payload: {}", e);
                        self.ack(&message_id).await.ok();
                    }
                }
            }
        }

        Ok(tasks)
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.stream_name).await?;
        Ok(len)
    }

    async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("vdesc:retry:{message_id}");
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, 86400).await?;
        Ok(count)
    }

    async fn clear_dedup(&self, task: &QueueTask) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let dedup_key = self.dedup_key(&task.idempotency_key());
        conn.del::<_, ()>(&dedup_key).await?;
        debug!("Cleared dedup key: {}", dedup_key);
        Ok(())
    }

    fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

/// The two named queue instances, routed by task type.
#[derive(Clone)]
pub struct JobQueues {
    pub general: Arc<dyn TaskQueue>,
    pub caption: Arc<dyn TaskQueue>,
}

impl JobQueues {
    pub fn new(general: Arc<dyn TaskQueue>, caption: Arc<dyn TaskQueue>) -> Self {
        Self { general, caption }
    }

    /// Build the production pair over Redis Streams.
    pub fn from_env() -> QueueResult<Self> {
        let config = QueueConfig::from_env();
        let general = RedisTaskQueue::new(config.clone(), QueueName::General)?;
        let caption = RedisTaskQueue::new(config, QueueName::Caption)?;
        Ok(Self::new(Arc::new(general), Arc::new(caption)))
    }

    /// Initialize both transports.
    pub async fn init(&self) -> QueueResult<()> {
        self.general.init().await?;
        self.caption.init().await?;
        Ok(())
    }

    /// The queue a task routes to.
    pub fn for_task(&self, task: &QueueTask) -> &Arc<dyn TaskQueue> {
        match task.route() {
            QueueName::General => &self.general,
            QueueName::Caption => &self.caption,
        }
    }

    pub fn by_name(&self, name: QueueName) -> &Arc<dyn TaskQueue> {
        match name {
            QueueName::General => &self.general,
            QueueName::Caption => &self.caption,
        }
    }

    /// Enqueue on the task's routed queue.
    pub async fn enqueue(&self, task: QueueTask) -> QueueResult<String> {
        self.for_task(&task).enqueue(task).await
    }
}
