//! Queue executor: drains the general and caption queues with a bounded
//! worker pool and hands each task to the stage runner.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vdesc_queue::{JobQueues, QueueName, QueueTask, TaskQueue};

use crate::cleanup;
use crate::context::PipelineServices;
use crate::error::{WorkerError, WorkerResult};
use crate::runner::StageRunner;

/// Drains the queues and runs jobs. The general queue is consumed by up
/// to `max_workers` concurrent runners; the caption queue by exactly one,
/// preserving single-flight on the caption GPU end to end.
pub struct JobExecutor {
    services: Arc<PipelineServices>,
    queues: JobQueues,
    runner: Arc<StageRunner>,
    worker_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(
        services: Arc<PipelineServices>,
        queues: JobQueues,
        runner: Arc<StageRunner>,
        shutdown: tokio::sync::watch::Sender<bool>,
    ) -> Self {
        let worker_semaphore = Arc::new(Semaphore::new(services.config.max_workers));
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            services,
            queues,
            runner,
            worker_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Run until shutdown: consumption loops for both queues, pending
    /// claim loops for crash recovery, the health checker, and the
    /// cleanup supervisor.
    pub async fn run(self: Arc<Self>) -> WorkerResult<()> {
        info!(
            consumer = %self.consumer_name,
            max_workers = self.services.config.max_workers,
            "Starting job executor"
        );

        let mut tasks = Vec::new();

        // Health checker
        {
            let services = Arc::clone(&self.services);
            let shutdown_rx = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                services
                    .pool
                    .health_check_loop(Duration::from_secs(30), shutdown_rx)
                    .await;
            }));
        }

        // Cleanup supervisor
        {
            let store = self.services.store.clone();
            let config = self.services.config.clone();
            let shutdown_rx = self.shutdown.subscribe();
            tasks.push(tokio::spawn(cleanup::supervisor_loop(
                store,
                config,
                shutdown_rx,
            )));
        }

        // Pending-claim loops (crash recovery) for both queues
        for name in [QueueName::General, QueueName::Caption] {
            let this = Arc::clone(&self);
            let shutdown_rx = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                this.claim_loop(name, shutdown_rx).await;
            }));
        }

        // Caption queue: one consumer, one task at a time
        {
            let this = Arc::clone(&self);
            let shutdown_rx = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                this.consume_loop(QueueName::Caption, 1, shutdown_rx).await;
            }));
        }

        // General queue: bounded by the worker semaphore
        let shutdown_rx = self.shutdown.subscribe();
        Arc::clone(&self)
            .consume_loop(QueueName::General, self.services.config.max_workers, shutdown_rx)
            .await;

        info!("Waiting for in-flight jobs to complete...");
        let _ = tokio::time::timeout(Duration::from_secs(60), self.wait_for_jobs()).await;

        for task in tasks {
            task.abort();
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn consume_loop(
        self: Arc<Self>,
        queue_name: QueueName,
        max_parallel: usize,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let queue = Arc::clone(self.queues.by_name(queue_name));
        let local_semaphore = Arc::new(Semaphore::new(max_parallel));

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let available = local_semaphore.available_permits();
            if available == 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }

            let consumed = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                result = queue.consume(&self.consumer_name, 1000, available.min(5)) => result,
            };

            let tasks = match consumed {
                Ok(tasks) => tasks,
                Err(e) => {
                    error!(queue = queue_name.as_str(), "Error consuming tasks: {e}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for (message_id, task) in tasks {
                let this = Arc::clone(&self);
                let queue = Arc::clone(&queue);
                let Ok(local) = Arc::clone(&local_semaphore).acquire_owned().await else {
                    return;
                };
                let Ok(global) = Arc::clone(&this.worker_semaphore).acquire_owned().await else {
                    return;
                };

                tokio::spawn(async move {
                    let _local = local;
                    let _global = global;
                    metrics::gauge!("pipeline_active_runners").increment(1.0);
                    this.execute_task(queue, message_id, task).await;
                    metrics::gauge!("pipeline_active_runners").decrement(1.0);
                });
            }
        }
    }

    /// Execute one task and settle it with the queue.
    async fn execute_task(&self, queue: Arc<dyn TaskQueue>, message_id: String, task: QueueTask) {
        let key = task.key().clone();
        debug!(key = %key, "Executing task");

        let result = match &task {
            QueueTask::Pipeline(_) => self.runner.run_job(&key).await,
            QueueTask::ImageCaptioning(_) => self.runner.run_captioning_only(&key).await,
            QueueTask::UploadOnly(_) => self.runner.run_upload_only(&key).await,
        };

        match result {
            Ok(()) => {
                info!(key = %key, "Task completed");
                if let Err(e) = queue.ack(&message_id).await {
                    error!(key = %key, "Failed to ack task: {e}");
                }
                if let Err(e) = queue.clear_dedup(&task).await {
                    warn!(key = %key, "Failed to clear dedup key: {e}");
                }
            }
            Err(WorkerError::Cancelled(_)) => {
                // Leave unacked: the visibility timeout will redeliver it
                // and the runner resumes from persisted progress.
                warn!(key = %key, "Task cancelled mid-run, leaving for redelivery");
            }
            Err(e @ WorkerError::JobFailed { .. }) | Err(e @ WorkerError::JobNotFound(_)) => {
                // Terminal for this task: the runner already recorded the
                // failure; redelivering would re-fail forever.
                error!(key = %key, "Task failed terminally: {e}");
                if let Err(ack_err) = queue.ack(&message_id).await {
                    error!(key = %key, "Failed to ack failed task: {ack_err}");
                }
                if let Err(e) = queue.clear_dedup(&task).await {
                    warn!(key = %key, "Failed to clear dedup key: {e}");
                }
            }
            Err(e) => {
                // Infrastructure error: let redelivery retry, up to the
                // queue's poison bound.
                let retries = queue.increment_retry(&message_id).await.unwrap_or(u32::MAX);
                if retries >= queue.max_retries() {
                    error!(key = %key, "Task exceeded {} redeliveries, dropping: {e}", queue.max_retries());
                    queue.ack(&message_id).await.ok();
                    queue.clear_dedup(&task).await.ok();
                } else {
                    warn!(key = %key, retries, "Task errored, awaiting redelivery: {e}");
                }
            }
        }
    }

    async fn claim_loop(
        self: Arc<Self>,
        queue_name: QueueName,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let queue = Arc::clone(self.queues.by_name(queue_name));
        let mut interval = tokio::time::interval(self.services.config.claim_interval);
        let min_idle_ms = self.services.config.claim_min_idle.as_millis() as u64;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match queue.claim_pending(&self.consumer_name, min_idle_ms, 5).await {
                        Ok(tasks) if !tasks.is_empty() => {
                            info!(queue = queue_name.as_str(), "Claimed {} pending tasks", tasks.len());
                            for (message_id, task) in tasks {
                                let this = Arc::clone(&self);
                                let queue = Arc::clone(&queue);
                                let Ok(permit) = Arc::clone(&self.worker_semaphore).acquire_owned().await else {
                                    return;
                                };
                                tokio::spawn(async move {
                                    let _permit = permit;
                                    this.execute_task(queue, message_id, task).await;
                                });
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(queue = queue_name.as_str(), "Failed to claim pending tasks: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn wait_for_jobs(&self) {
        loop {
            if self.worker_semaphore.available_permits() == self.services.config.max_workers {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
