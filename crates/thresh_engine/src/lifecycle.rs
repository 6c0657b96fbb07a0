//! Validation and undo workflow.
//!
//! Batch validation approves standing proposals; undo reverts a Validated
//! group to the state its provenance implies. Undo after cleaning has
//! started is an InvalidTransition, never a silent no-op.

use thresh_schema::{EngineResult, GroupStatus, UndoResult, ValidateOutcome};
use tracing::info;

use crate::db::Db;

pub struct Lifecycle {
    db: Db,
}

impl Lifecycle {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Validate up to `count` groups holding a standing kept-file proposal.
    /// Default source status is AutoSelected; a filter of Pending covers
    /// reopened groups whose incumbent original survived.
    pub async fn validate_batch(
        &self,
        count: i64,
        status_filter: Option<GroupStatus>,
    ) -> EngineResult<ValidateOutcome> {
        let status = status_filter.unwrap_or(GroupStatus::AutoSelected);
        let candidates = self.db.groups.list_validatable(status, count).await?;

        let mut validated = 0u64;
        for group_id in candidates {
            if self.db.groups.try_validate_proposal(group_id).await? {
                validated += 1;
            }
        }
        let remaining = self.db.groups.count_validatable(status).await? as u64;
        info!("Validated {} groups, {} remaining", validated, remaining);
        Ok(ValidateOutcome {
            validated,
            remaining,
        })
    }

    /// Revert validations. Automated provenance (Score/Strategy) keeps the
    /// proposal and lands in AutoSelected; human provenance (Manual/
    /// Pattern/Bulk) clears it and lands in Pending.
    pub async fn undo_validation(&self, group_ids: &[i64]) -> EngineResult<Vec<UndoResult>> {
        let mut results = Vec::with_capacity(group_ids.len());
        for &group_id in group_ids {
            results.push(self.undo_one(group_id).await?);
        }
        Ok(results)
    }

    async fn undo_one(&self, group_id: i64) -> EngineResult<UndoResult> {
        let Some(group) = self.db.groups.get(group_id).await? else {
            return Ok(UndoResult {
                group_id,
                reverted_to: None,
                error: Some(format!("group {} not found", group_id)),
            });
        };

        if group.status != GroupStatus::Validated {
            return Ok(UndoResult {
                group_id,
                reverted_to: None,
                error: Some(format!(
                    "invalid transition: group {} is {}, only VALIDATED can be undone",
                    group_id, group.status
                )),
            });
        }

        let target = match group.selection_source {
            Some(source) if source.is_automated() => GroupStatus::AutoSelected,
            _ => GroupStatus::Pending,
        };

        if self.db.groups.try_undo(group_id, target).await? {
            Ok(UndoResult {
                group_id,
                reverted_to: Some(target),
                error: None,
            })
        } else {
            Ok(UndoResult {
                group_id,
                reverted_to: None,
                error: Some(format!("group {} changed state concurrently", group_id)),
            })
        }
    }
}
