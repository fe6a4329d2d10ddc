//! Cleanup supervisor: purges aged state rows and scratch directories.

use tracing::{info, warn};

use vdesc_models::{artifact_dir, JobRecord};
use vdesc_store::StateStore;

use crate::config::WorkerConfig;

/// Delete a failed job's scratch directory. Best-effort; a failure to
/// delete is logged, not propagated.
pub async fn remove_job_artifacts(config: &WorkerConfig, job: &JobRecord) {
    let dir = artifact_dir(&config.artifacts_root, &job.key, job.trim);
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => info!(key = %job.key, dir = %dir.display(), "Removed scratch directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(key = %job.key, dir = %dir.display(), "Could not remove scratch directory: {e}"),
    }
}

/// Periodic supervisor: purges state rows of unfinished jobs older than
/// the configured age. Runs until shutdown flips.
pub async fn supervisor_loop(
    store: StateStore,
    config: WorkerConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.cleanup_interval);
    // The immediate first tick would purge at startup; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Cleanup supervisor stopping");
                    break;
                }
            }
            _ = ticker.tick() => {
                match store.purge_older_than(config.cleanup_max_age).await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "Purged stale job state"),
                    Err(e) => warn!("State purge failed: {e}"),
                }
            }
        }
    }
}
