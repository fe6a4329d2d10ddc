//! Stage runner: drives one job end-to-end through the registry.
//!
//! Resume correctness rests on one rule: a stage is skipped iff its status
//! is `done`, and `done` is only ever written in the same transaction as
//! the module output. A crashed and restarted runner therefore picks up at
//! the first non-done stage with every upstream output available.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use vdesc_models::{JobKey, JobRecord, JobStatus, Stage, StageOutput, StageStatus};
use vdesc_services::ServiceKind;

use crate::cleanup;
use crate::context::{PipelineServices, StageInput};
use crate::error::{StageError, StageResult, WorkerError, WorkerResult};
use crate::registry::{dependencies, REGISTRY};
use crate::stages;

/// Executes one stage invocation. Production dispatches to the adapters;
/// tests inject scripted executors to exercise orchestration alone.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(
        &self,
        stage: Stage,
        ctx: &PipelineServices,
        input: &StageInput,
    ) -> StageResult<StageOutput>;
}

/// The production executor: dispatches to the stage adapters.
pub struct AdapterExecutor;

#[async_trait]
impl StageExecutor for AdapterExecutor {
    async fn execute(
        &self,
        stage: Stage,
        ctx: &PipelineServices,
        input: &StageInput,
    ) -> StageResult<StageOutput> {
        stages::run_stage(stage, ctx, input).await
    }
}

/// How a stage attempt chain ended.
enum StageFailure {
    /// Cancellation requested; the stage stays `in_progress` and will be
    /// retried on resume.
    Cancelled,
    /// Deterministic failure or exhausted retries.
    Fatal { stage: Stage, reason: String },
    /// Impossible state; artifacts are preserved for forensics.
    Invariant { stage: Stage, reason: String },
}

/// Drives jobs through the stage registry.
pub struct StageRunner {
    services: Arc<PipelineServices>,
    executor: Arc<dyn StageExecutor>,
}

impl StageRunner {
    pub fn new(services: Arc<PipelineServices>, executor: Arc<dyn StageExecutor>) -> Self {
        Self { services, executor }
    }

    /// Run one job to completion (or failure). Safe to call again after a
    /// crash: completed stages are skipped.
    pub async fn run_job(&self, key: &JobKey) -> WorkerResult<()> {
        let store = &self.services.store;

        let Some(job) = store.get_job(key).await? else {
            return Err(WorkerError::JobNotFound(key.clone()));
        };
        if job.status.is_terminal() {
            info!(key = %key, status = %job.status, "Job already terminal, skipping");
            return Ok(());
        }

        store.set_job_status(key, JobStatus::InProgress).await?;

        // A resubmitted job may carry failed stages from its previous
        // incarnation; reset them so they run again.
        for spec in &REGISTRY {
            if store.get_stage_status(key, spec.stage).await? == StageStatus::Failed {
                store
                    .set_stage_status(key, spec.stage, StageStatus::NotStarted)
                    .await?;
            }
        }

        info!(key = %key, "Starting stage runner");

        loop {
            if self.services.cancelled() {
                warn!(key = %key, "Cancellation requested, leaving job in progress");
                return Err(WorkerError::Cancelled(key.clone()));
            }

            let mut done = HashSet::new();
            let mut pending = Vec::new();
            for spec in &REGISTRY {
                match store.get_stage_status(key, spec.stage).await? {
                    StageStatus::Done => {
                        done.insert(spec.stage);
                    }
                    _ => pending.push(spec.stage),
                }
            }

            if pending.is_empty() {
                break;
            }

            // Wave scheduling: everything whose dependencies are satisfied,
            // bounded by the per-job parallelism budget.
            let mut ready: Vec<Stage> = pending
                .iter()
                .copied()
                .filter(|stage| dependencies(*stage).iter().all(|dep| done.contains(dep)))
                .collect();
            ready.truncate(self.services.config.max_stage_parallel.max(1));

            if ready.is_empty() {
                let stage = pending[0];
                return self
                    .fail_job(
                        key,
                        StageFailure::Invariant {
                            stage,
                            reason: "no runnable stage but pipeline incomplete".to_string(),
                        },
                    )
                    .await;
            }

            let results = futures::future::join_all(
                ready
                    .iter()
                    .map(|stage| self.execute_stage(&job, *stage)),
            )
            .await;

            for result in results {
                if let Err(failure) = result {
                    return match failure {
                        StageFailure::Cancelled => Err(WorkerError::Cancelled(key.clone())),
                        other => self.fail_job(key, other).await,
                    };
                }
            }
        }

        store.set_job_status(key, JobStatus::Done).await?;
        metrics::counter!("pipeline_jobs_completed").increment(1);
        info!(key = %key, "Job complete");
        Ok(())
    }

    /// Run only the captioning stage for a job whose prerequisites are
    /// complete (the caption-queue hand-off path).
    pub async fn run_captioning_only(&self, key: &JobKey) -> WorkerResult<()> {
        let store = &self.services.store;
        let Some(job) = store.get_job(key).await? else {
            return Err(WorkerError::JobNotFound(key.clone()));
        };

        if store.get_stage_status(key, Stage::ImageCaptioning).await? == StageStatus::Done {
            info!(key = %key, "Captioning already done, skipping hand-off task");
            return Ok(());
        }

        match self.execute_stage(&job, Stage::ImageCaptioning).await {
            Ok(()) => Ok(()),
            Err(StageFailure::Cancelled) => Err(WorkerError::Cancelled(key.clone())),
            Err(failure) => self.fail_job(key, failure).await,
        }
    }

    /// Re-run only the upload stage from persisted outputs: the fast path
    /// for a subscriber arriving after the job finished.
    pub async fn run_upload_only(&self, key: &JobKey) -> WorkerResult<()> {
        let store = &self.services.store;
        let Some(job) = store.get_job(key).await? else {
            return Err(WorkerError::JobNotFound(key.clone()));
        };
        if job.status != JobStatus::Done {
            info!(key = %key, status = %job.status, "Upload fast path only applies to done jobs");
            return Ok(());
        }

        let input = self.load_input(&job, Stage::UploadToYdx).await.map_err(|e| {
            WorkerError::job_failed(key.clone(), Stage::UploadToYdx, e.to_string())
        })?;

        let output = self
            .attempt_with_retry(Stage::UploadToYdx, &input)
            .await
            .map_err(|e| WorkerError::job_failed(key.clone(), Stage::UploadToYdx, e.to_string()))?;

        store.put_module_output(key, &output).await?;
        info!(key = %key, "Upload fast path complete");
        Ok(())
    }

    /// Build the stage input by loading every declared dependency's
    /// module output. A missing or malformed output is an invariant
    /// violation: `done` upstream statuses guaranteed them.
    async fn load_input(&self, job: &JobRecord, stage: Stage) -> StageResult<StageInput> {
        let mut input = StageInput::new(job.clone(), &self.services.config.artifacts_root);

        for dep in dependencies(stage) {
            let output = self
                .services
                .store
                .get_module_output(&job.key, *dep)
                .await?
                .ok_or_else(|| {
                    StageError::invariant(format!("{stage} requires missing output of {dep}"))
                })?;
            input.upstream.insert(*dep, output);
        }

        Ok(input)
    }

    /// Execute one stage with the retry policy, committing its output on
    /// success.
    async fn execute_stage(&self, job: &JobRecord, stage: Stage) -> Result<(), StageFailure> {
        let key = &job.key;
        let store = &self.services.store;

        // Resume primitive: done stages are skipped outright.
        match store.get_stage_status(key, stage).await {
            Ok(StageStatus::Done) => {
                info!(key = %key, stage = %stage, "Stage already done, skipping");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                return Err(StageFailure::Fatal {
                    stage,
                    reason: e.to_string(),
                })
            }
        }

        let input = match self.load_input(job, stage).await {
            Ok(input) => input,
            Err(e) => {
                let reason = e.to_string();
                let _ = store.set_stage_status(key, stage, StageStatus::Failed).await;
                return Err(if e.is_invariant() {
                    StageFailure::Invariant { stage, reason }
                } else {
                    StageFailure::Fatal { stage, reason }
                });
            }
        };

        if let Err(e) = store.set_stage_status(key, stage, StageStatus::InProgress).await {
            return Err(StageFailure::Fatal {
                stage,
                reason: e.to_string(),
            });
        }

        info!(key = %key, stage = %stage, "Stage starting");

        match self.attempt_with_retry(stage, &input).await {
            Ok(output) => {
                if let Err(e) = store.put_module_output(key, &output).await {
                    return Err(StageFailure::Fatal {
                        stage,
                        reason: format!("committing output: {e}"),
                    });
                }
                info!(key = %key, stage = %stage, "Stage done");
                Ok(())
            }
            Err(e) => {
                if self.services.cancelled() {
                    // Leave in_progress so resume retries it
                    return Err(StageFailure::Cancelled);
                }
                let reason = e.to_string();
                let _ = store.set_stage_status(key, stage, StageStatus::Failed).await;
                error!(key = %key, stage = %stage, "Stage failed: {reason}");
                Err(if e.is_invariant() {
                    StageFailure::Invariant { stage, reason }
                } else {
                    StageFailure::Fatal { stage, reason }
                })
            }
        }
    }

    /// One stage's attempt chain: the initial attempt plus up to
    /// `max_retries` retries on transient failures, waiting
    /// `retry_delay x attempt` and re-probing service health in between.
    async fn attempt_with_retry(
        &self,
        stage: Stage,
        input: &StageInput,
    ) -> StageResult<StageOutput> {
        let config = &self.services.config;
        let mut last_error: Option<StageError> = None;

        for attempt in 0..=config.max_retries {
            if attempt > 0 {
                let delay = config.retry_delay * attempt;
                warn!(
                    stage = %stage,
                    attempt,
                    "Retrying stage in {:?} after transient failure",
                    delay
                );
                tokio::time::sleep(delay).await;

                for kind in ServiceKind::ALL {
                    self.services.pool.probe(kind).await;
                }
            }

            if self.services.cancelled() {
                return Err(StageError::transient("cancelled"));
            }

            match self.executor.execute(stage, &self.services, input).await {
                Ok(output) => {
                    if output.stage() != stage {
                        return Err(StageError::invariant(format!(
                            "adapter for {stage} returned output for {}",
                            output.stage()
                        )));
                    }
                    return Ok(output);
                }
                Err(e) if e.is_transient() => {
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| StageError::transient("retries exhausted")))
    }

    /// Mark the job failed and clean up. Invariant violations preserve
    /// the scratch directory for forensics.
    async fn fail_job(&self, key: &JobKey, failure: StageFailure) -> WorkerResult<()> {
        let (stage, reason, preserve_artifacts) = match failure {
            StageFailure::Fatal { stage, reason } => (stage, reason, false),
            StageFailure::Invariant { stage, reason } => (stage, reason, true),
            StageFailure::Cancelled => unreachable!("cancellation does not fail the job"),
        };

        if let Err(e) = self.services.store.set_job_status(key, JobStatus::Failed).await {
            warn!(key = %key, "Could not mark job failed: {e}");
        }
        metrics::counter!("pipeline_jobs_failed").increment(1);

        if preserve_artifacts {
            error!(key = %key, stage = %stage, "Invariant violation, preserving artifacts: {reason}");
        } else if self.services.config.cleanup_on_failure {
            if let Some(job) = self.services.store.get_job(key).await.ok().flatten() {
                cleanup::remove_job_artifacts(&self.services.config, &job).await;
            }
        }

        Err(WorkerError::job_failed(key.clone(), stage, reason))
    }
}
