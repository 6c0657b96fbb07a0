//! Cleaner job pipeline: create, execute, resume.
//!
//! Execution order per file is verify -> archive -> delete -> record, and
//! every step up to the confirmed archive write is side-effect free on the
//! source file. Each file has its own failure boundary: a bad file is
//! recorded and the batch continues. The job row is the worker lease, so
//! exactly one worker processes a job.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use thresh_schema::{
    CleanerJob, CleanerJobFile, DuplicateGroup, EngineError, EngineResult, GroupStatus,
    JobCounts, JobSelector, JobStatus, TaskStatus,
};

use crate::archive::{archive_key, ArchiveStore};
use crate::cancel::CancellationToken;
use crate::db::Db;
use crate::verify::sha256_file;

pub struct CleanerWorker {
    db: Db,
    archive: Arc<dyn ArchiveStore>,
    parallelism: usize,
}

impl CleanerWorker {
    pub fn new(db: Db, archive: Arc<dyn ArchiveStore>, parallelism: usize) -> Self {
        Self {
            db,
            archive,
            parallelism: parallelism.max(1),
        }
    }

    /// Create a job for the selected groups: one Pending task per live
    /// non-kept member. Wet runs move every owning group to Cleaning in the
    /// same transaction; a group already Cleaning rejects the whole request.
    pub async fn create_job(&self, selector: &JobSelector, dry_run: bool) -> EngineResult<i64> {
        let groups = self.resolve_selector(selector).await?;

        let mut tasks: Vec<(i64, i64)> = Vec::new();
        let mut group_ids: Vec<i64> = Vec::new();
        for group in &groups {
            let kept = group.kept_file_id.ok_or_else(|| {
                EngineError::invalid_transition(format!(
                    "group {} has no kept file, nothing may be deleted",
                    group.id
                ))
            })?;
            let members = self.db.files.live_members(group.id).await?;
            let before = tasks.len();
            for file in members.iter().filter(|f| f.id != kept) {
                tasks.push((file.id, group.id));
            }
            if tasks.len() > before {
                group_ids.push(group.id);
            }
        }

        if tasks.is_empty() {
            return Err(EngineError::not_found(
                "selector matched no files to clean".to_string(),
            ));
        }

        self.db
            .jobs
            .create_with_tasks(&selector.describe(), dry_run, &tasks, &group_ids)
            .await
    }

    async fn resolve_selector(
        &self,
        selector: &JobSelector,
    ) -> EngineResult<Vec<DuplicateGroup>> {
        match selector {
            JobSelector::Groups { ids } => {
                let mut groups = Vec::with_capacity(ids.len());
                for &id in ids {
                    let group = self
                        .db
                        .groups
                        .get(id)
                        .await?
                        .ok_or_else(|| EngineError::not_found(format!("group {}", id)))?;
                    if group.status == GroupStatus::Cleaning {
                        return Err(EngineError::conflict(format!(
                            "group {} is already being cleaned",
                            id
                        )));
                    }
                    if !group.status.is_cleanable() {
                        return Err(EngineError::invalid_transition(format!(
                            "group {} is {}, cleanup needs VALIDATED or CLEANING_FAILED",
                            id, group.status
                        )));
                    }
                    groups.push(group);
                }
                Ok(groups)
            }
            // Filter selectors pick up only eligible groups; everything
            // else is simply out of scope.
            JobSelector::Category { category } => {
                self.db.groups.cleanable_by_category(*category).await
            }
            JobSelector::Directory { prefix } => {
                self.db.groups.cleanable_by_directory(prefix).await
            }
        }
    }

    /// Claim and execute one job. Running a terminal job returns its counts
    /// unchanged; a job another worker holds is a Conflict.
    pub async fn run_job(&self, job_id: i64) -> EngineResult<JobCounts> {
        let job = self
            .db
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("job {}", job_id)))?;
        if job.status.is_terminal() {
            return Ok(JobCounts::from(&job));
        }
        if !self.db.jobs.claim(job_id).await? {
            return Err(EngineError::conflict(format!(
                "job {} is already claimed by another worker",
                job_id
            )));
        }
        let job = self
            .db
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("job {}", job_id)))?;
        self.execute(job).await
    }

    /// Worker loop: claim and execute pending jobs until the queue is empty
    /// or cancellation is requested. Returns the number of jobs executed.
    pub async fn run_until_idle(&self, cancel: &CancellationToken) -> EngineResult<u64> {
        let mut executed = 0u64;
        while !cancel.is_cancelled() {
            let Some(job) = self.db.jobs.claim_next().await? else {
                break;
            };
            self.execute(job).await?;
            executed += 1;
        }
        Ok(executed)
    }

    /// Long-running worker loop with an idle wait between polls.
    pub async fn run_loop(
        &self,
        cancel: &CancellationToken,
        idle_wait: Duration,
    ) -> EngineResult<()> {
        loop {
            if cancel.is_cancelled() {
                info!("Cleaner worker stopping");
                return Ok(());
            }
            match self.db.jobs.claim_next().await? {
                Some(job) => {
                    self.execute(job).await?;
                }
                None => tokio::time::sleep(idle_wait).await,
            }
        }
    }

    /// Reset jobs orphaned in Processing by a dead worker back to Pending.
    /// Task re-verification makes re-execution idempotent: files already
    /// archived and deleted surface as Skipped, never re-archived.
    pub async fn recover_orphaned_jobs(&self) -> EngineResult<Vec<i64>> {
        let orphaned = self.db.jobs.orphaned().await?;
        let mut released = Vec::with_capacity(orphaned.len());
        for job_id in orphaned {
            if self.db.jobs.release(job_id).await? {
                warn!("Job {} was orphaned mid-run, returned to queue", job_id);
                released.push(job_id);
            }
        }
        Ok(released)
    }

    async fn execute(&self, job: CleanerJob) -> EngineResult<JobCounts> {
        let tasks = self.db.jobs.open_tasks(job.id).await?;
        info!(
            "Executing job {} ({} open tasks, dry_run={})",
            job.id,
            tasks.len(),
            job.dry_run
        );

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut handles: Vec<JoinHandle<EngineResult<()>>> = Vec::with_capacity(tasks.len());
        for task in tasks {
            let semaphore = semaphore.clone();
            let db = self.db.clone();
            let archive = self.archive.clone();
            let dry_run = job.dry_run;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| EngineError::Internal("cleaner pool closed".to_string()))?;
                let (status, key, error) = process_file(&db, &archive, dry_run, &task).await?;
                if status == TaskStatus::Failed && !dry_run {
                    db.files
                        .record_failure(task.file_id, error.as_deref().unwrap_or("unknown error"))
                        .await?;
                }
                db.jobs
                    .mark_task(task.id, task.job_id, status, key.as_deref(), error.as_deref())
                    .await?;
                Ok(())
            }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|e| EngineError::Internal(format!("cleaner task panicked: {}", e)))??;
        }

        // Reconcile the aggregates from the child rows before finishing.
        self.db.jobs.recount(job.id).await?;
        let job = self
            .db
            .jobs
            .get(job.id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("job {}", job.id)))?;

        let final_status = if job.failed_files > 0 {
            JobStatus::CompletedWithErrors
        } else {
            JobStatus::Completed
        };
        self.db.jobs.finish(job.id, final_status).await?;

        if !job.dry_run {
            for group_id in self.db.jobs.distinct_groups(job.id).await? {
                self.finalize_group(job.id, group_id).await?;
            }
        }

        let job = self
            .db
            .jobs
            .get(job.id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("job {}", job.id)))?;
        info!(
            "Job {} {}: {} succeeded, {} failed, {} skipped",
            job.id, job.status, job.succeeded_files, job.failed_files, job.skipped_files
        );
        Ok(JobCounts::from(&job))
    }

    /// Move an owning group out of Cleaning: CleaningFailed when any task
    /// failed, Cleaned when no live non-kept member is left, Pending when
    /// new members arrived mid-clean.
    async fn finalize_group(&self, job_id: i64, group_id: i64) -> EngineResult<()> {
        self.db.groups.recount(group_id).await?;

        if self.db.jobs.group_has_failed_tasks(job_id, group_id).await? {
            self.db
                .groups
                .try_finish_cleaning(group_id, GroupStatus::CleaningFailed)
                .await?;
            return Ok(());
        }

        let Some(group) = self.db.groups.get(group_id).await? else {
            return Ok(());
        };
        let Some(kept) = group.kept_file_id else {
            return Ok(());
        };
        let remaining = self.db.files.count_live_non_kept(group_id, kept).await?;
        let target = if remaining == 0 {
            GroupStatus::Cleaned
        } else {
            GroupStatus::Pending
        };
        self.db.groups.try_finish_cleaning(group_id, target).await?;
        Ok(())
    }
}

/// Verify -> archive -> delete for one task. Expected per-file problems
/// come back as Failed/Skipped outcomes; only infrastructure failures
/// (database unavailable) return Err.
///
/// Dry runs stop after verification: the would-be archive key is reported,
/// but no archive write, deletion, or file-row mutation happens.
async fn process_file(
    db: &Db,
    archive: &Arc<dyn ArchiveStore>,
    dry_run: bool,
    task: &CleanerJobFile,
) -> EngineResult<(TaskStatus, Option<String>, Option<String>)> {
    let Some(file) = db.files.get(task.file_id).await? else {
        return Ok((
            TaskStatus::Failed,
            None,
            Some(format!("file {} row missing", task.file_id)),
        ));
    };

    if file.is_deleted {
        return match &file.archive_path {
            // An earlier run (or a crashed one) already did the work.
            Some(key) => Ok((
                TaskStatus::Skipped,
                Some(key.clone()),
                Some("already archived and deleted".to_string()),
            )),
            None => Ok((
                TaskStatus::Failed,
                None,
                Some("file is marked deleted without an archive record".to_string()),
            )),
        };
    }

    if file.group_id != Some(task.group_id) {
        return Ok((
            TaskStatus::Skipped,
            None,
            Some("file is no longer a member of the group".to_string()),
        ));
    }

    let Some(group) = db.groups.get(task.group_id).await? else {
        return Ok((
            TaskStatus::Failed,
            None,
            Some(format!("group {} row missing", task.group_id)),
        ));
    };
    if group.kept_file_id == Some(file.id) {
        return Ok((
            TaskStatus::Skipped,
            None,
            Some("file became the kept original".to_string()),
        ));
    }

    // Step 1: re-verify on disk before anything destructive.
    let path = Path::new(&file.path);
    match tokio::fs::metadata(path).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((
                TaskStatus::Failed,
                None,
                Some(format!("missing on disk: {}", file.path)),
            ));
        }
        Err(e) => {
            return Ok((
                TaskStatus::Failed,
                None,
                Some(format!("cannot stat {}: {}", file.path, e)),
            ));
        }
    }
    let current_hash = match sha256_file(path).await {
        Ok(hash) => hash,
        Err(e) => {
            return Ok((
                TaskStatus::Failed,
                None,
                Some(format!("cannot hash {}: {}", file.path, e)),
            ));
        }
    };
    if current_hash != file.content_hash {
        return Ok((
            TaskStatus::Failed,
            None,
            Some(format!(
                "content hash changed since indexing (expected {}, found {})",
                file.content_hash, current_hash
            )),
        ));
    }

    let key = archive_key(&file.content_hash);
    if dry_run {
        return Ok((TaskStatus::Succeeded, Some(key), None));
    }

    // Step 2: archive. Existing keys make this a no-op, so resumption never
    // re-uploads.
    if let Err(e) = archive.put(&key, path).await {
        return Ok((
            TaskStatus::Failed,
            None,
            Some(format!("archive write failed: {}", e)),
        ));
    }

    // Step 3: delete only after the archive write is confirmed.
    if let Err(e) = tokio::fs::remove_file(path).await {
        return Ok((
            TaskStatus::Failed,
            Some(key),
            Some(format!("source delete failed: {}", e)),
        ));
    }
    db.files.mark_deleted(file.id, &key).await?;

    Ok((TaskStatus::Succeeded, Some(key), None))
}
