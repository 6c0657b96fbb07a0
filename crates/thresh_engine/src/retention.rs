//! Retention sweep: permanently purge archived bytes past the retention
//! window. Independent of the cleaner pipeline.

use chrono::{Duration, SecondsFormat, Utc};
use std::sync::Arc;
use thresh_schema::{EngineResult, SweepStats};
use tracing::{info, warn};

use crate::archive::ArchiveStore;
use crate::db::Db;

pub struct RetentionSweeper {
    db: Db,
    archive: Arc<dyn ArchiveStore>,
}

impl RetentionSweeper {
    pub fn new(db: Db, archive: Arc<dyn ArchiveStore>) -> Self {
        Self { db, archive }
    }

    /// Purge archive objects for files deleted more than `retention_days`
    /// ago. A key still referenced by a row inside the window (identical
    /// content deleted later) is left alone. Dry run reports without
    /// touching anything.
    pub async fn sweep(&self, retention_days: i64, dry_run: bool) -> EngineResult<SweepStats> {
        let cutoff = (Utc::now() - Duration::days(retention_days))
            .to_rfc3339_opts(SecondsFormat::Micros, true);
        let candidates = self.db.files.purge_candidates(&cutoff).await?;

        let mut stats = SweepStats {
            scanned: candidates.len() as u64,
            ..SweepStats::default()
        };

        for file in candidates {
            let Some(key) = file.archive_path.as_deref() else {
                continue;
            };
            if self
                .db
                .files
                .archive_key_still_referenced(key, file.id, &cutoff)
                .await?
            {
                continue;
            }
            if dry_run {
                stats.purged += 1;
                stats.bytes_reclaimed += file.size.max(0) as u64;
                continue;
            }
            if let Err(e) = self.archive.remove(key).await {
                warn!("Failed to purge archive object {}: {}", key, e);
                stats.errors += 1;
                continue;
            }
            self.db.files.mark_purged(file.id).await?;
            stats.purged += 1;
            stats.bytes_reclaimed += file.size.max(0) as u64;
        }

        info!(
            "Retention sweep: {} scanned, {} purged, {} bytes reclaimed, {} errors (dry_run={})",
            stats.scanned, stats.purged, stats.bytes_reclaimed, stats.errors, dry_run
        );
        Ok(stats)
    }
}
