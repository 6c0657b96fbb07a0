//! Ingestion hook for already-hashed file records from the upstream
//! scanner.
//!
//! Grouping happens here: a hash seen on a second live file creates a
//! group; a hash landing in an existing group attaches the file and, for
//! groups past the automated states, reopens the group to Pending. The
//! kept file (if any) stays as the incumbent candidate.

use thresh_schema::{EngineResult, GroupStatus, IngestOutcome, IngestRecord};
use tracing::{debug, info};

use crate::db::Db;

pub struct Ingestor {
    db: Db,
}

impl Ingestor {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn ingest(&self, records: &[IngestRecord]) -> EngineResult<IngestOutcome> {
        let mut outcome = IngestOutcome::default();
        for record in records {
            self.ingest_one(record, &mut outcome).await?;
        }
        info!(
            "Ingested {} files ({} skipped, {} groups created, {} reopened)",
            outcome.files_added,
            outcome.files_skipped,
            outcome.groups_created,
            outcome.groups_reopened
        );
        Ok(outcome)
    }

    async fn ingest_one(
        &self,
        record: &IngestRecord,
        outcome: &mut IngestOutcome,
    ) -> EngineResult<()> {
        // Paths are unique; re-scans of a known path are the scanner's
        // concern, not ours.
        if self.db.files.find_by_path(&record.path).await?.is_some() {
            debug!("Path {} already indexed, skipped", record.path);
            outcome.files_skipped += 1;
            return Ok(());
        }

        if let Some(group) = self.db.groups.get_by_hash(&record.content_hash).await? {
            self.db.files.insert(record, Some(group.id)).await?;
            outcome.files_added += 1;
            self.db.groups.recount(group.id).await?;

            match group.status {
                GroupStatus::Pending | GroupStatus::Cleaning => {
                    // Pending needs nothing; an in-flight job is left
                    // untouched - completion sees the new live member and
                    // parks the group at Pending.
                }
                GroupStatus::AutoSelected => {
                    // Still an automated state; the standing proposal is a
                    // valid candidate and recompute may revise it.
                }
                GroupStatus::Validated
                | GroupStatus::Cleaned
                | GroupStatus::CleaningFailed => {
                    // The decision predates the new member: reopen.
                    if self
                        .db
                        .groups
                        .try_reopen(
                            group.id,
                            &[
                                GroupStatus::Validated,
                                GroupStatus::Cleaned,
                                GroupStatus::CleaningFailed,
                            ],
                        )
                        .await?
                    {
                        outcome.groups_reopened += 1;
                    }
                }
            }
            return Ok(());
        }

        // No group yet: a second live sighting of the hash creates one.
        if let Some(existing) = self
            .db
            .files
            .find_ungrouped_by_hash(&record.content_hash)
            .await?
        {
            let group_id = self.db.groups.create(&record.content_hash).await?;
            self.db.files.assign_group(existing.id, group_id).await?;
            self.db.files.insert(record, Some(group_id)).await?;
            self.db.groups.recount(group_id).await?;
            outcome.files_added += 1;
            outcome.groups_created += 1;
            return Ok(());
        }

        self.db.files.insert(record, None).await?;
        outcome.files_added += 1;
        Ok(())
    }
}
