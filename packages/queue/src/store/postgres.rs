//! PostgreSQL queue store.
//!
//! The durable multi-worker backend. Every lease transition is a single
//! conditional UPDATE, and the claim additionally uses `FOR UPDATE SKIP
//! LOCKED` so concurrent workers never block each other on the same row.
//! The dependency gate rides on the `depends_on` column, which job creation
//! precomputes through the sequence codec: the SQL never re-derives band
//! arithmetic.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::QueueResult;
use crate::models::{Artifact, Job, JobProgress, JobStatus, Task, TaskStatus};
use crate::sequence::Stage;
use crate::store::{QueueStore, RecoveryFilter};

const TASK_COLUMNS: &str = "id, job_id, sequence, stage, status, worker_id, claimed_at, \
     last_heartbeat, attempts, input, error, depends_on, created_at, updated_at";

/// sqlx-backed [`QueueStore`] over a PostgreSQL pool.
#[derive(Clone)]
pub struct PostgresQueueStore {
    pool: PgPool,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    #[tracing::instrument(skip(self, job, tasks), fields(job_id = %job.id, task_count = tasks.len()))]
    async fn insert_job(&self, job: &Job, tasks: &[Task]) -> QueueResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, params, status, progress, status_message,
                              attempts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.id)
        .bind(job.job_type)
        .bind(&job.params)
        .bind(job.status)
        .bind(sqlx::types::Json(job.progress))
        .bind(&job.status_message)
        .bind(job.attempts)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;

        for task in tasks {
            sqlx::query(
                r#"
                INSERT INTO tasks (id, job_id, sequence, stage, status, worker_id,
                                   claimed_at, last_heartbeat, attempts, input, error,
                                   depends_on, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(task.id)
            .bind(task.job_id)
            .bind(task.sequence)
            .bind(task.stage)
            .bind(task.status)
            .bind(&task.worker_id)
            .bind(task.claimed_at)
            .bind(task.last_heartbeat)
            .bind(task.attempts)
            .bind(&task.input)
            .bind(&task.error)
            .bind(task.depends_on)
            .bind(task.created_at)
            .bind(task.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_job(&self, job_id: Uuid) -> QueueResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            SELECT id, job_type, params, status, progress, status_message,
                   attempts, created_at, updated_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    #[tracing::instrument(skip(self))]
    async fn list_jobs_by_status(&self, status: JobStatus) -> QueueResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT id, job_type, params, status, progress, status_message,
                   attempts, created_at, updated_at
            FROM jobs
            WHERE status = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    #[tracing::instrument(skip(self, progress, message))]
    async fn update_job_state(
        &self,
        job_id: Uuid,
        status: JobStatus,
        progress: &JobProgress,
        message: Option<&str>,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, progress = $3, status_message = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(status)
        .bind(sqlx::types::Json(*progress))
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn bump_job_attempts(&self, job_id: Uuid) -> QueueResult<Option<i32>> {
        let attempts: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET attempts = attempts + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING attempts
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempts.map(|(a,)| a))
    }

    #[tracing::instrument(skip(self))]
    async fn delete_job(&self, job_id: Uuid) -> QueueResult<bool> {
        // Tasks and artifacts go with the job via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn get_task(&self, task_id: Uuid) -> QueueResult<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    async fn list_tasks(&self, job_id: Uuid) -> QueueResult<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE job_id = $1 ORDER BY sequence ASC"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    /// The atomic conditional claim. Picks the oldest pending task of the
    /// stage whose job is live and whose text prerequisite (if any) is
    /// complete, and flips it to claimed in the same statement. Concurrent
    /// claimers skip locked rows instead of blocking, so exactly one wins
    /// any given task.
    #[tracing::instrument(skip(self))]
    async fn claim_next_task(&self, stage: Stage, worker_id: &str) -> QueueResult<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(&format!(
            r#"
            WITH next AS (
                SELECT t.id AS next_id
                FROM tasks t
                JOIN jobs j ON j.id = t.job_id
                WHERE t.status = 'pending'
                  AND t.stage = $1
                  AND j.status IN ('queued', 'processing')
                  AND (t.depends_on IS NULL OR EXISTS (
                        SELECT 1 FROM tasks dep
                        WHERE dep.job_id = t.job_id
                          AND dep.sequence = t.depends_on
                          AND dep.status = 'complete'))
                ORDER BY t.created_at ASC, t.sequence ASC
                FOR UPDATE OF t SKIP LOCKED
                LIMIT 1
            )
            UPDATE tasks
            SET status = 'claimed', worker_id = $2, claimed_at = NOW(),
                last_heartbeat = NOW(), updated_at = NOW()
            FROM next
            WHERE tasks.id = next.next_id
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(stage)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    async fn start_task(&self, task_id: Uuid, worker_id: &str) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'processing', updated_at = NOW()
            WHERE id = $1 AND worker_id = $2 AND status = 'claimed'
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn heartbeat_task(&self, task_id: Uuid, worker_id: &str) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET last_heartbeat = NOW(), updated_at = NOW()
            WHERE id = $1 AND worker_id = $2 AND status IN ('claimed', 'processing')
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self, artifact), fields(artifact_id = %artifact.id))]
    async fn complete_task(
        &self,
        task_id: Uuid,
        worker_id: &str,
        artifact: &Artifact,
    ) -> QueueResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Conditional on the lease: a reclaimed or cancelled task no longer
        // matches, and the whole transaction (artifact included) is dropped.
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'complete', error = NULL, updated_at = NOW()
            WHERE id = $1 AND worker_id = $2 AND status = 'processing'
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO artifacts (id, job_id, task_id, stage, storage_reference,
                                   metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(artifact.id)
        .bind(artifact.job_id)
        .bind(artifact.task_id)
        .bind(artifact.stage)
        .bind(&artifact.storage_reference)
        .bind(&artifact.metadata)
        .bind(artifact.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    #[tracing::instrument(skip(self, error))]
    async fn fail_task(
        &self,
        task_id: Uuid,
        worker_id: &str,
        error: &str,
        max_attempts: i32,
    ) -> QueueResult<Option<TaskStatus>> {
        let status: Option<(TaskStatus,)> = sqlx::query_as(
            r#"
            UPDATE tasks
            SET attempts = attempts + 1,
                status = CASE WHEN attempts + 1 < $4
                              THEN 'pending'::task_status
                              ELSE 'failed'::task_status END,
                error = $3,
                worker_id = NULL, claimed_at = NULL, last_heartbeat = NULL,
                updated_at = NOW()
            WHERE id = $1 AND worker_id = $2 AND status IN ('claimed', 'processing')
            RETURNING status
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .bind(error)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status.map(|(s,)| s))
    }

    #[tracing::instrument(skip(self, reason))]
    async fn cancel_tasks(&self, job_id: Uuid, reason: &str) -> QueueResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed', error = $2,
                worker_id = NULL, claimed_at = NULL, last_heartbeat = NULL,
                updated_at = NOW()
            WHERE job_id = $1 AND status IN ('pending', 'claimed', 'processing')
            "#,
        )
        .bind(job_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self, error))]
    async fn recover_tasks(
        &self,
        filter: RecoveryFilter,
        max_attempts: i32,
        error: &str,
    ) -> QueueResult<Vec<Task>> {
        let mut tasks = sqlx::query_as::<_, Task>(&format!(
            r#"
            UPDATE tasks
            SET attempts = attempts + 1,
                status = CASE WHEN attempts + 1 < $1
                              THEN 'pending'::task_status
                              ELSE 'failed'::task_status END,
                error = $2,
                worker_id = NULL, claimed_at = NULL, last_heartbeat = NULL,
                updated_at = NOW()
            WHERE status IN ('claimed', 'processing')
              AND ($3::uuid IS NULL OR job_id = $3)
              AND ($4::timestamptz IS NULL
                   OR last_heartbeat IS NULL
                   OR last_heartbeat < $4)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(max_attempts)
        .bind(error)
        .bind(filter.job_id)
        .bind(filter.stalled_before)
        .fetch_all(&self.pool)
        .await?;

        tasks.sort_by_key(|t| (t.job_id, t.sequence));
        Ok(tasks)
    }

    #[tracing::instrument(skip(self, artifact), fields(artifact_id = %artifact.id))]
    async fn insert_artifact(&self, artifact: &Artifact) -> QueueResult<()> {
        sqlx::query(
            r#"
            INSERT INTO artifacts (id, job_id, task_id, stage, storage_reference,
                                   metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(artifact.id)
        .bind(artifact.job_id)
        .bind(artifact.task_id)
        .bind(artifact.stage)
        .bind(&artifact.storage_reference)
        .bind(&artifact.metadata)
        .bind(artifact.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_artifacts(&self, job_id: Uuid) -> QueueResult<Vec<Artifact>> {
        let artifacts = sqlx::query_as::<_, Artifact>(
            r#"
            SELECT id, job_id, task_id, stage, storage_reference, metadata, created_at
            FROM artifacts
            WHERE job_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(artifacts)
    }
}
