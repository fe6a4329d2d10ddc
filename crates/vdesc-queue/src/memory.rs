//! In-memory [`TaskQueue`] used by tests and single-process deployments.
//!
//! Mirrors the Redis transport's semantics: idempotency-key dedup,
//! pending-until-ack delivery, and idle-based reclaim.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::error::{QueueError, QueueResult};
use crate::queue::TaskQueue;
use crate::task::QueueTask;

struct PendingEntry {
    task: QueueTask,
    claimed_at: Instant,
}

#[derive(Default)]
struct Inner {
    queued: VecDeque<(String, QueueTask)>,
    pending: HashMap<String, PendingEntry>,
    dedup: HashSet<String>,
    retries: HashMap<String, u32>,
    next_id: u64,
}

/// In-memory queue. Clones share the same underlying state.
#[derive(Clone)]
pub struct MemoryTaskQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    max_retries: u32,
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new(3)
    }
}

impl MemoryTaskQueue {
    pub fn new(max_retries: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            notify: Arc::new(Notify::new()),
            max_retries,
        }
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, task: QueueTask) -> QueueResult<String> {
        let mut inner = self.inner.lock().await;

        let idempotency_key = task.idempotency_key();
        if !inner.dedup.insert(idempotency_key) {
            return Err(QueueError::enqueue_failed("Duplicate task"));
        }

        inner.next_id += 1;
        let message_id = format!("mem-{}", inner.next_id);
        inner.queued.push_back((message_id.clone(), task));
        drop(inner);

        self.notify.notify_waiters();
        Ok(message_id)
    }

    async fn consume(
        &self,
        _consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueTask)>> {
        let deadline = Instant::now() + Duration::from_millis(block_ms);

        loop {
            {
                let mut inner = self.inner.lock().await;
                if !inner.queued.is_empty() {
                    let mut tasks = Vec::new();
                    while tasks.len() < count {
                        let Some((id, task)) = inner.queued.pop_front() else {
                            break;
                        };
                        inner.pending.insert(
                            id.clone(),
                            PendingEntry {
                                task: task.clone(),
                                claimed_at: Instant::now(),
                            },
                        );
                        tasks.push((id, task));
                    }
                    return Ok(tasks);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.pending.remove(message_id);
        inner.retries.remove(message_id);
        Ok(())
    }

    async fn claim_pending(
        &self,
        _consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueTask)>> {
        let mut inner = self.inner.lock().await;
        let min_idle = Duration::from_millis(min_idle_ms);
        let now = Instant::now();

        let mut claimed = Vec::new();
        for (id, entry) in inner.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            if now.duration_since(entry.claimed_at) >= min_idle {
                entry.claimed_at = now;
                claimed.push((id.clone(), entry.task.clone()));
            }
        }

        Ok(claimed)
    }

    async fn len(&self) -> QueueResult<u64> {
        let inner = self.inner.lock().await;
        Ok((inner.queued.len() + inner.pending.len()) as u64)
    }

    async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut inner = self.inner.lock().await;
        let count = inner.retries.entry(message_id.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn clear_dedup(&self, task: &QueueTask) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.dedup.remove(&task.idempotency_key());
        Ok(())
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::PipelineTask;
    use vdesc_models::JobKey;

    fn pipeline_task(video: &str) -> QueueTask {
        QueueTask::Pipeline(PipelineTask::new(JobKey::new(video, "ai1")))
    }

    #[tokio::test]
    async fn enqueue_consume_ack() {
        let queue = MemoryTaskQueue::default();
        queue.enqueue(pipeline_task("v1")).await.unwrap();

        let tasks = queue.consume("w1", 10, 5).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(queue.len().await.unwrap(), 1); // pending until acked

        queue.ack(&tasks[0].0).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_rejected_until_cleared() {
        let queue = MemoryTaskQueue::default();
        let task = pipeline_task("v1");

        queue.enqueue(task.clone()).await.unwrap();
        let err = queue.enqueue(task.clone()).await.unwrap_err();
        assert!(err.is_duplicate());

        queue.clear_dedup(&task).await.unwrap();
        queue.enqueue(task).await.unwrap();
    }

    #[tokio::test]
    async fn unacked_tasks_are_reclaimable_after_idle() {
        let queue = MemoryTaskQueue::default();
        queue.enqueue(pipeline_task("v1")).await.unwrap();

        let tasks = queue.consume("w1", 10, 1).await.unwrap();
        assert_eq!(tasks.len(), 1);

        // Not idle long enough yet
        assert!(queue.claim_pending("w2", 50, 10).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let reclaimed = queue.claim_pending("w2", 50, 10).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].0, tasks[0].0);
    }

    #[tokio::test]
    async fn consume_blocks_until_enqueue() {
        let queue = MemoryTaskQueue::default();
        let consumer = queue.clone();

        let handle = tokio::spawn(async move { consumer.consume("w1", 500, 1).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(pipeline_task("v1")).await.unwrap();

        let tasks = handle.await.unwrap().unwrap();
        assert_eq!(tasks.len(), 1);
    }
}
