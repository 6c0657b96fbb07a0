//! Cleaner-job store.
//!
//! The job row doubles as the worker lease: claiming flips Pending ->
//! Processing atomically, so exactly one worker processes a job. Aggregate
//! counters are bumped per task and reconciled from the child rows before
//! the job is finished, so they can never drift.

use sqlx::{Pool, Sqlite};
use thresh_schema::{
    now_ts, CleanerJob, CleanerJobFile, EngineError, EngineResult, JobStatus, TaskStatus,
};
use tracing::info;

#[derive(Clone)]
pub struct JobStore {
    pool: Pool<Sqlite>,
}

impl JobStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Create a job with its per-file tasks and, for wet runs, move every
    /// owning group into Cleaning - all in one transaction. A group that
    /// cannot be moved (concurrent job won the race) rolls the whole
    /// request back with a Conflict.
    pub async fn create_with_tasks(
        &self,
        selector: &str,
        dry_run: bool,
        tasks: &[(i64, i64)],
        groups_to_clean: &[i64],
    ) -> EngineResult<i64> {
        let mut tx = self.pool.begin().await?;
        let now = now_ts();

        let job_id = sqlx::query(
            r#"
            INSERT INTO th_cleaner_jobs (status, dry_run, selector, total_files, created_at)
            VALUES ('PENDING', ?, ?, ?, ?)
            "#,
        )
        .bind(dry_run)
        .bind(selector)
        .bind(tasks.len() as i64)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (file_id, group_id) in tasks {
            sqlx::query(
                r#"
                INSERT INTO th_cleaner_job_files (job_id, file_id, group_id, status)
                VALUES (?, ?, ?, 'PENDING')
                "#,
            )
            .bind(job_id)
            .bind(file_id)
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        }

        if !dry_run {
            for group_id in groups_to_clean {
                let rows = sqlx::query(
                    r#"
                    UPDATE th_groups
                    SET status = 'CLEANING', updated_at = ?
                    WHERE id = ? AND status IN ('VALIDATED','CLEANING_FAILED')
                    "#,
                )
                .bind(&now)
                .bind(group_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
                if rows == 0 {
                    tx.rollback().await?;
                    return Err(EngineError::conflict(format!(
                        "group {} changed state concurrently, no job created",
                        group_id
                    )));
                }
            }
        }

        tx.commit().await?;
        info!(
            "Created cleaner job {} ({} files, dry_run={})",
            job_id,
            tasks.len(),
            dry_run
        );
        Ok(job_id)
    }

    pub async fn get(&self, job_id: i64) -> EngineResult<Option<CleanerJob>> {
        let job = sqlx::query_as("SELECT * FROM th_cleaner_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Claim a specific job. Only a Pending job can be claimed.
    pub async fn claim(&self, job_id: i64) -> EngineResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE th_cleaner_jobs
            SET status = 'PROCESSING', started_at = ?
            WHERE id = ? AND status = 'PENDING'
            "#,
        )
        .bind(now_ts())
        .bind(job_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    /// Atomically pop the oldest Pending job, if any (worker loop).
    pub async fn claim_next(&self) -> EngineResult<Option<CleanerJob>> {
        let mut tx = self.pool.begin().await?;

        let job_id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM th_cleaner_jobs WHERE status = 'PENDING' ORDER BY id LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job_id) = job_id else {
            tx.commit().await?;
            return Ok(None);
        };

        let rows = sqlx::query(
            r#"
            UPDATE th_cleaner_jobs
            SET status = 'PROCESSING', started_at = ?
            WHERE id = ? AND status = 'PENDING'
            "#,
        )
        .bind(now_ts())
        .bind(job_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows == 0 {
            // Another worker claimed it between the SELECT and the UPDATE.
            tx.commit().await?;
            return Ok(None);
        }

        let job: CleanerJob = sqlx::query_as("SELECT * FROM th_cleaner_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Claimed cleaner job {}", job.id);
        Ok(Some(job))
    }

    /// Tasks of a job still needing work (Pending on first run, Pending +
    /// Failed on resume/retry).
    pub async fn open_tasks(&self, job_id: i64) -> EngineResult<Vec<CleanerJobFile>> {
        let tasks = sqlx::query_as(
            r#"
            SELECT * FROM th_cleaner_job_files
            WHERE job_id = ? AND status IN ('PENDING','FAILED')
            ORDER BY id
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    pub async fn tasks(&self, job_id: i64) -> EngineResult<Vec<CleanerJobFile>> {
        let tasks = sqlx::query_as(
            "SELECT * FROM th_cleaner_job_files WHERE job_id = ? ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    pub async fn distinct_groups(&self, job_id: i64) -> EngineResult<Vec<i64>> {
        let ids = sqlx::query_scalar(
            "SELECT DISTINCT group_id FROM th_cleaner_job_files WHERE job_id = ? ORDER BY group_id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Record a task outcome and bump the parent counters in one
    /// transaction. A Failed task that is later retried is re-marked, so
    /// the final recount is authoritative.
    pub async fn mark_task(
        &self,
        task_id: i64,
        job_id: i64,
        status: TaskStatus,
        archive_path: Option<&str>,
        error: Option<&str>,
    ) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE th_cleaner_job_files
            SET status = ?, archive_path = ?, error = ?, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(archive_path)
        .bind(error)
        .bind(now_ts())
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        let counter = match status {
            TaskStatus::Succeeded => "succeeded_files",
            TaskStatus::Failed => "failed_files",
            TaskStatus::Skipped => "skipped_files",
            TaskStatus::Pending => {
                tx.commit().await?;
                return Ok(());
            }
        };
        let sql = format!(
            "UPDATE th_cleaner_jobs SET processed_files = processed_files + 1, {} = {} + 1 WHERE id = ?",
            counter, counter
        );
        sqlx::query(&sql).bind(job_id).execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Reconcile the parent counters from the child rows. Makes the
    /// invariant "aggregates are recomputable from tasks" hold even if a
    /// crash lost an increment.
    pub async fn recount(&self, job_id: i64) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE th_cleaner_jobs
            SET total_files = (
                    SELECT COUNT(*) FROM th_cleaner_job_files WHERE job_id = th_cleaner_jobs.id
                ),
                processed_files = (
                    SELECT COUNT(*) FROM th_cleaner_job_files
                    WHERE job_id = th_cleaner_jobs.id AND status != 'PENDING'
                ),
                succeeded_files = (
                    SELECT COUNT(*) FROM th_cleaner_job_files
                    WHERE job_id = th_cleaner_jobs.id AND status = 'SUCCEEDED'
                ),
                failed_files = (
                    SELECT COUNT(*) FROM th_cleaner_job_files
                    WHERE job_id = th_cleaner_jobs.id AND status = 'FAILED'
                ),
                skipped_files = (
                    SELECT COUNT(*) FROM th_cleaner_job_files
                    WHERE job_id = th_cleaner_jobs.id AND status = 'SKIPPED'
                )
            WHERE id = ?
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a Processing job to its terminal status.
    pub async fn finish(&self, job_id: i64, status: JobStatus) -> EngineResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE th_cleaner_jobs
            SET status = ?, finished_at = ?
            WHERE id = ? AND status = 'PROCESSING'
            "#,
        )
        .bind(status)
        .bind(now_ts())
        .bind(job_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    /// Jobs left in Processing by a dead worker.
    pub async fn orphaned(&self) -> EngineResult<Vec<i64>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM th_cleaner_jobs WHERE status = 'PROCESSING' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Return an orphaned job to Pending so a worker can re-claim it.
    pub async fn release(&self, job_id: i64) -> EngineResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE th_cleaner_jobs
            SET status = 'PENDING', started_at = NULL
            WHERE id = ? AND status = 'PROCESSING'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    pub async fn group_has_failed_tasks(&self, job_id: i64, group_id: i64) -> EngineResult<bool> {
        let exists: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM th_cleaner_job_files
            WHERE job_id = ? AND group_id = ? AND status = 'FAILED'
            LIMIT 1
            "#,
        )
        .bind(job_id)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(exists.is_some())
    }
}
