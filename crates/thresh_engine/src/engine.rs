//! Transport-agnostic engine facade. The CLI (or any other surface) wraps
//! these methods 1:1.

use std::sync::Arc;
use std::time::Duration;

use thresh_schema::{
    BulkApplyOutcome, BulkPreviewOutcome, EngineResult, EngineStats, GroupStatus, IngestOutcome,
    IngestRecord, JobCounts, JobSelector, OverrideScope, PatternOutcome, RecalcOutcome,
    SelectStrategy, SelectionConfig, SelectionPreference, SweepStats, UndoResult,
    ValidateOutcome,
};

use crate::archive::{ArchiveStore, FsArchiveStore};
use crate::cancel::CancellationToken;
use crate::cleaner::CleanerWorker;
use crate::config::EngineConfig;
use crate::db::Db;
use crate::ingest::Ingestor;
use crate::lifecycle::Lifecycle;
use crate::retention::RetentionSweeper;
use crate::selection::SelectionEngine;

pub struct Engine {
    db: Db,
    config: EngineConfig,
    selection: SelectionEngine,
    lifecycle: Lifecycle,
    cleaner: CleanerWorker,
    retention: RetentionSweeper,
    ingestor: Ingestor,
}

impl Engine {
    /// Open the database (creating schema as needed) and a filesystem
    /// archive store per the config.
    pub async fn connect(config: EngineConfig) -> EngineResult<Self> {
        let db = Db::connect(&config.database_url).await?;
        let archive: Arc<dyn ArchiveStore> =
            Arc::new(FsArchiveStore::new(config.archive_root.clone()));
        Ok(Self::new(db, archive, config))
    }

    /// Assemble from parts (tests inject their own archive store).
    pub fn new(db: Db, archive: Arc<dyn ArchiveStore>, config: EngineConfig) -> Self {
        Self {
            selection: SelectionEngine::new(db.clone(), config.preview_examples),
            lifecycle: Lifecycle::new(db.clone()),
            cleaner: CleanerWorker::new(db.clone(), archive.clone(), config.cleaner_parallelism),
            retention: RetentionSweeper::new(db.clone(), archive),
            ingestor: Ingestor::new(db.clone()),
            db,
            config,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    // ------------------------------------------------------------------
    // Preferences
    // ------------------------------------------------------------------

    pub async fn selection_config(&self) -> EngineResult<SelectionConfig> {
        Ok(SelectionConfig {
            preferences: self.db.preferences.list().await?,
            strategies: SelectStrategy::ALL.iter().map(|s| s.to_string()).collect(),
            scopes: vec![
                OverrideScope::Pending.to_string(),
                OverrideScope::All.to_string(),
            ],
        })
    }

    pub async fn preferences(&self) -> EngineResult<Vec<SelectionPreference>> {
        self.db.preferences.list().await
    }

    pub async fn save_preferences(&self, prefs: &[SelectionPreference]) -> EngineResult<()> {
        self.db.preferences.replace_all(prefs).await
    }

    pub async fn reset_preferences(&self) -> EngineResult<Vec<SelectionPreference>> {
        self.db.preferences.reset_defaults().await
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    pub async fn calculate_file_score(&self, file_id: i64) -> EngineResult<i64> {
        self.selection.calculate_file_score(file_id).await
    }

    pub async fn recalculate_originals(
        &self,
        scope: OverrideScope,
        preview: bool,
        cancel: &CancellationToken,
    ) -> EngineResult<RecalcOutcome> {
        self.selection
            .recalculate_originals(scope, preview, cancel)
            .await
    }

    pub async fn set_original(&self, group_id: i64, file_id: i64) -> EngineResult<()> {
        self.selection.set_original(group_id, file_id).await
    }

    pub async fn auto_select(
        &self,
        group_id: i64,
        strategy: SelectStrategy,
    ) -> EngineResult<i64> {
        self.selection.auto_select(group_id, strategy).await
    }

    pub async fn auto_select_all(
        &self,
        strategy: SelectStrategy,
        cancel: &CancellationToken,
    ) -> EngineResult<u64> {
        self.selection.auto_select_all(strategy, cancel).await
    }

    pub async fn apply_pattern_rule(
        &self,
        directories: &[String],
        preferred_directory: &str,
        tie_breaker: SelectStrategy,
        preview: bool,
    ) -> EngineResult<PatternOutcome> {
        self.selection
            .apply_pattern_rule(directories, preferred_directory, tie_breaker, preview)
            .await
    }

    pub async fn bulk_override_preview(
        &self,
        keep_pattern: &str,
        remove_pattern: &str,
        scope: OverrideScope,
    ) -> EngineResult<BulkPreviewOutcome> {
        self.selection
            .bulk_override_preview(keep_pattern, remove_pattern, scope)
            .await
    }

    pub async fn bulk_override_apply(
        &self,
        keep_pattern: &str,
        remove_pattern: &str,
        scope: OverrideScope,
        cancel: &CancellationToken,
    ) -> EngineResult<BulkApplyOutcome> {
        self.selection
            .bulk_override_apply(keep_pattern, remove_pattern, scope, cancel)
            .await
    }

    // ------------------------------------------------------------------
    // Validation / undo
    // ------------------------------------------------------------------

    pub async fn validate_batch(
        &self,
        count: i64,
        status_filter: Option<GroupStatus>,
    ) -> EngineResult<ValidateOutcome> {
        self.lifecycle.validate_batch(count, status_filter).await
    }

    pub async fn undo_validation(&self, group_ids: &[i64]) -> EngineResult<Vec<UndoResult>> {
        self.lifecycle.undo_validation(group_ids).await
    }

    // ------------------------------------------------------------------
    // Cleaner jobs
    // ------------------------------------------------------------------

    pub async fn create_cleaner_job(
        &self,
        selector: &JobSelector,
        dry_run: bool,
    ) -> EngineResult<i64> {
        self.cleaner.create_job(selector, dry_run).await
    }

    pub async fn run_job(&self, job_id: i64) -> EngineResult<JobCounts> {
        self.cleaner.run_job(job_id).await
    }

    pub async fn run_pending_jobs(&self, cancel: &CancellationToken) -> EngineResult<u64> {
        self.cleaner.run_until_idle(cancel).await
    }

    pub async fn run_worker(
        &self,
        cancel: &CancellationToken,
        idle_wait: Duration,
    ) -> EngineResult<()> {
        self.cleaner.run_loop(cancel, idle_wait).await
    }

    pub async fn recover_orphaned_jobs(&self) -> EngineResult<Vec<i64>> {
        self.cleaner.recover_orphaned_jobs().await
    }

    pub async fn job_status(&self, job_id: i64) -> EngineResult<JobCounts> {
        let job = self
            .db
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| thresh_schema::EngineError::not_found(format!("job {}", job_id)))?;
        Ok(JobCounts::from(&job))
    }

    // ------------------------------------------------------------------
    // Supplements
    // ------------------------------------------------------------------

    pub async fn ingest(&self, records: &[IngestRecord]) -> EngineResult<IngestOutcome> {
        self.ingestor.ingest(records).await
    }

    pub async fn stats(&self) -> EngineResult<EngineStats> {
        self.db.groups.stats().await
    }

    /// Sweep with the configured retention window.
    pub async fn sweep_archive(&self, dry_run: bool) -> EngineResult<SweepStats> {
        self.retention
            .sweep(self.config.retention_days, dry_run)
            .await
    }

    /// Sweep with an explicit retention window (CLI override).
    pub async fn sweep_archive_with(
        &self,
        retention_days: i64,
        dry_run: bool,
    ) -> EngineResult<SweepStats> {
        self.retention.sweep(retention_days, dry_run).await
    }
}
