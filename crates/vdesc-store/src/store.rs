//! SQLite-backed state store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info, warn};

use vdesc_models::{
    JobKey, JobRecord, JobStatus, Stage, StageOutput, StageStatus, Subscriber, TrimWindow,
};

use crate::error::{StoreError, StoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS youtube_data (
    youtube_id  TEXT NOT NULL,
    ai_user_id  TEXT NOT NULL,
    status      TEXT NOT NULL,
    metadata    TEXT NOT NULL DEFAULT '{}',
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    PRIMARY KEY (youtube_id, ai_user_id)
);

CREATE TABLE IF NOT EXISTS ai_user_data (
    user_id      TEXT NOT NULL,
    youtube_id   TEXT NOT NULL,
    ai_user_id   TEXT NOT NULL,
    ydx_server   TEXT NOT NULL,
    ydx_app_host TEXT NOT NULL,
    created_at   INTEGER NOT NULL,
    PRIMARY KEY (user_id, youtube_id, ai_user_id)
);

CREATE TABLE IF NOT EXISTS stage_status (
    youtube_id  TEXT NOT NULL,
    ai_user_id  TEXT NOT NULL,
    stage_name  TEXT NOT NULL,
    status      TEXT NOT NULL,
    updated_at  INTEGER NOT NULL,
    PRIMARY KEY (youtube_id, ai_user_id, stage_name)
);

CREATE TABLE IF NOT EXISTS module_outputs (
    youtube_id   TEXT NOT NULL,
    ai_user_id   TEXT NOT NULL,
    module_name  TEXT NOT NULL,
    output_data  TEXT NOT NULL,
    updated_at   INTEGER NOT NULL,
    PRIMARY KEY (youtube_id, ai_user_id, module_name)
);
"#;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    pub db_path: PathBuf,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/pipeline.db"),
            max_connections: 8,
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables. `CURRENT_ENV=production`
    /// selects the prod database root; anything else is the dev path.
    pub fn from_env() -> Self {
        let db_path = match std::env::var("STATE_DB_PATH") {
            Ok(path) => PathBuf::from(path),
            Err(_) => {
                let env = std::env::var("CURRENT_ENV").unwrap_or_default();
                if env == "production" {
                    PathBuf::from("/var/lib/vdesc/pipeline.db")
                } else {
                    PathBuf::from("data/pipeline.db")
                }
            }
        };

        Self {
            db_path,
            max_connections: std::env::var("STATE_DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8),
        }
    }
}

/// Handle to the durable state store. Cheap to clone; all clones share the
/// same bounded pool. Operations hold a connection only for their own
/// duration, so long-running stage work never pins one.
#[derive(Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    /// Open (creating if missing) the database at the configured path and
    /// apply the schema.
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::config(format!("create db dir: {e}")))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.apply_schema().await?;

        info!(path = %config.db_path.display(), "State store ready");
        Ok(store)
    }

    /// Open a store at an explicit path (used by tests).
    pub async fn connect_at(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::connect(StoreConfig {
            db_path: path.as_ref().to_path_buf(),
            ..StoreConfig::default()
        })
        .await
    }

    async fn apply_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Insert or refresh the job row for `record.key`. Exactly one row per
    /// key; `created_at` is preserved on conflict, `updated_at` refreshed.
    pub async fn upsert_job(&self, record: &JobRecord) -> StoreResult<()> {
        let metadata = serde_json::to_string(&record.trim)?;
        sqlx::query(
            r#"
            INSERT INTO youtube_data (youtube_id, ai_user_id, status, metadata, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (youtube_id, ai_user_id) DO UPDATE SET
                status = excluded.status,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.key.video_id.as_str())
        .bind(record.key.ai_user_id.as_str())
        .bind(record.status.as_str())
        .bind(metadata)
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        debug!(key = %record.key, status = %record.status, "Upserted job");
        Ok(())
    }

    /// Load the job row, or `None` when the key has never been submitted.
    pub async fn get_job(&self, key: &JobKey) -> StoreResult<Option<JobRecord>> {
        let row = sqlx::query(
            "SELECT status, metadata, created_at, updated_at
             FROM youtube_data WHERE youtube_id = ?1 AND ai_user_id = ?2",
        )
        .bind(key.video_id.as_str())
        .bind(key.ai_user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status_str: String = row.get("status");
        let status = JobStatus::parse(&status_str).ok_or_else(|| StoreError::CorruptRow {
            key: key.clone(),
            reason: format!("unknown job status {status_str:?}"),
        })?;
        let metadata: String = row.get("metadata");
        let trim: Option<TrimWindow> = serde_json::from_str(&metadata).unwrap_or(None);

        Ok(Some(JobRecord {
            key: key.clone(),
            status,
            trim,
            created_at: epoch_to_utc(row.get("created_at")),
            updated_at: epoch_to_utc(row.get("updated_at")),
        }))
    }

    /// Current job status, or `None` for an unknown key.
    pub async fn get_job_status(&self, key: &JobKey) -> StoreResult<Option<JobStatus>> {
        Ok(self.get_job(key).await?.map(|job| job.status))
    }

    /// Atomically transition the job status. Terminal states (`done`,
    /// `failed`) are only reachable from `in_progress`; a disallowed
    /// transition is rejected without modifying the row.
    pub async fn set_job_status(&self, key: &JobKey, status: JobStatus) -> StoreResult<()> {
        // The guard is part of the UPDATE itself so concurrent writers
        // cannot race a terminal transition past the state machine.
        let sql = match status {
            JobStatus::InProgress => {
                "UPDATE youtube_data SET status = ?1, updated_at = ?2
                 WHERE youtube_id = ?3 AND ai_user_id = ?4
                   AND status IN ('pending', 'in_progress')"
            }
            JobStatus::Done | JobStatus::Failed => {
                "UPDATE youtube_data SET status = ?1, updated_at = ?2
                 WHERE youtube_id = ?3 AND ai_user_id = ?4
                   AND status = 'in_progress'"
            }
            JobStatus::Pending => {
                "UPDATE youtube_data SET status = ?1, updated_at = ?2
                 WHERE youtube_id = ?3 AND ai_user_id = ?4"
            }
        };

        let result = sqlx::query(sql)
            .bind(status.as_str())
            .bind(Utc::now().timestamp_millis())
            .bind(key.video_id.as_str())
            .bind(key.ai_user_id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            let current = self
                .get_job_status(key)
                .await?
                .ok_or_else(|| StoreError::JobNotFound(key.clone()))?;
            return Err(StoreError::InvalidTransition {
                key: key.clone(),
                from: current,
                to: status,
            });
        }

        debug!(key = %key, status = %status, "Job status updated");
        Ok(())
    }

    /// Reset a terminal job back to `pending` and drop its stage progress,
    /// so a fresh submission restarts processing from scratch.
    pub async fn reset_job(&self, key: &JobKey, trim: Option<TrimWindow>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().timestamp_millis();
        let metadata = serde_json::to_string(&trim)?;

        sqlx::query(
            "UPDATE youtube_data SET status = 'pending', metadata = ?1, updated_at = ?2
             WHERE youtube_id = ?3 AND ai_user_id = ?4",
        )
        .bind(metadata)
        .bind(now)
        .bind(key.video_id.as_str())
        .bind(key.ai_user_id.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM stage_status WHERE youtube_id = ?1 AND ai_user_id = ?2")
            .bind(key.video_id.as_str())
            .bind(key.ai_user_id.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM module_outputs WHERE youtube_id = ?1 AND ai_user_id = ?2")
            .bind(key.video_id.as_str())
            .bind(key.ai_user_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(key = %key, "Job reset to pending");
        Ok(())
    }

    // ========================================================================
    // Stage status
    // ========================================================================

    /// Set the status of one stage.
    pub async fn set_stage_status(
        &self,
        key: &JobKey,
        stage: Stage,
        status: StageStatus,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stage_status (youtube_id, ai_user_id, stage_name, status, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (youtube_id, ai_user_id, stage_name) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key.video_id.as_str())
        .bind(key.ai_user_id.as_str())
        .bind(stage.as_str())
        .bind(status.as_str())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        debug!(key = %key, stage = %stage, status = %status, "Stage status updated");
        Ok(())
    }

    /// Status of one stage; absent rows read as `NotStarted`.
    pub async fn get_stage_status(&self, key: &JobKey, stage: Stage) -> StoreResult<StageStatus> {
        let row = sqlx::query(
            "SELECT status FROM stage_status
             WHERE youtube_id = ?1 AND ai_user_id = ?2 AND stage_name = ?3",
        )
        .bind(key.video_id.as_str())
        .bind(key.ai_user_id.as_str())
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .and_then(|r| StageStatus::parse(&r.get::<String, _>("status")))
            .unwrap_or(StageStatus::NotStarted))
    }

    // ========================================================================
    // Module outputs
    // ========================================================================

    /// Persist a stage's output and mark the stage `done` in the same
    /// transaction. A reader can never observe one without the other.
    pub async fn put_module_output(&self, key: &JobKey, output: &StageOutput) -> StoreResult<()> {
        let stage = output.stage();
        let payload = serde_json::to_string(&output.to_value()?)?;
        let now = Utc::now().timestamp_millis();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO module_outputs (youtube_id, ai_user_id, module_name, output_data, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (youtube_id, ai_user_id, module_name) DO UPDATE SET
                output_data = excluded.output_data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key.video_id.as_str())
        .bind(key.ai_user_id.as_str())
        .bind(stage.as_str())
        .bind(payload)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO stage_status (youtube_id, ai_user_id, stage_name, status, updated_at)
            VALUES (?1, ?2, ?3, 'done', ?4)
            ON CONFLICT (youtube_id, ai_user_id, stage_name) DO UPDATE SET
                status = 'done',
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key.video_id.as_str())
        .bind(key.ai_user_id.as_str())
        .bind(stage.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(key = %key, stage = %stage, "Module output committed, stage done");
        Ok(())
    }

    /// Load and re-type a stage's output, or `None` when missing. A row
    /// that no longer matches the stage schema is a `MalformedOutput`.
    pub async fn get_module_output(
        &self,
        key: &JobKey,
        stage: Stage,
    ) -> StoreResult<Option<StageOutput>> {
        let row = sqlx::query(
            "SELECT output_data FROM module_outputs
             WHERE youtube_id = ?1 AND ai_user_id = ?2 AND module_name = ?3",
        )
        .bind(key.video_id.as_str())
        .bind(key.ai_user_id.as_str())
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row.get("output_data");
        let value: serde_json::Value = serde_json::from_str(&payload)?;
        let output =
            StageOutput::from_stage_value(stage, value).map_err(|e| StoreError::MalformedOutput {
                key: key.clone(),
                stage,
                reason: e.to_string(),
            })?;
        Ok(Some(output))
    }

    // ========================================================================
    // Subscribers
    // ========================================================================

    /// Register a subscriber; idempotent by (user_id, key).
    pub async fn add_subscriber(&self, key: &JobKey, subscriber: &Subscriber) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ai_user_data (user_id, youtube_id, ai_user_id, ydx_server, ydx_app_host, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (user_id, youtube_id, ai_user_id) DO NOTHING
            "#,
        )
        .bind(&subscriber.user_id)
        .bind(key.video_id.as_str())
        .bind(key.ai_user_id.as_str())
        .bind(&subscriber.ydx_server)
        .bind(&subscriber.ydx_app_host)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All subscribers for a job, in insertion order.
    pub async fn list_subscribers(&self, key: &JobKey) -> StoreResult<Vec<Subscriber>> {
        let rows = sqlx::query(
            "SELECT user_id, ydx_server, ydx_app_host FROM ai_user_data
             WHERE youtube_id = ?1 AND ai_user_id = ?2
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(key.video_id.as_str())
        .bind(key.ai_user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Subscriber {
                user_id: row.get("user_id"),
                ydx_server: row.get("ydx_server"),
                ydx_app_host: row.get("ydx_app_host"),
            })
            .collect())
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Delete every row (jobs, stage status, module outputs, subscribers)
    /// belonging to non-`done` jobs last touched before `max_age` ago.
    /// Returns the number of jobs purged.
    pub async fn purge_older_than(&self, max_age: Duration) -> StoreResult<u64> {
        let cutoff = Utc::now().timestamp_millis() - max_age.as_millis() as i64;

        let stale = sqlx::query(
            "SELECT youtube_id, ai_user_id FROM youtube_data
             WHERE updated_at < ?1 AND status != 'done'",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut purged = 0u64;
        for row in stale {
            let video_id: String = row.get("youtube_id");
            let ai_user_id: String = row.get("ai_user_id");

            let mut tx = self.pool.begin().await?;
            for table in ["module_outputs", "stage_status", "ai_user_data", "youtube_data"] {
                let sql = format!("DELETE FROM {table} WHERE youtube_id = ?1 AND ai_user_id = ?2");
                sqlx::query(&sql)
                    .bind(&video_id)
                    .bind(&ai_user_id)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;

            warn!(video_id, ai_user_id, "Purged stale job state");
            purged += 1;
        }

        Ok(purged)
    }
}

fn epoch_to_utc(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}
