//! Selection engine: scoring, automated recompute, strategies, pattern
//! rules, and bulk overrides.
//!
//! Automated operations (recompute, auto-select) only ever touch groups in
//! Pending/AutoSelected. Human-equivalent operations (set-original, pattern
//! apply, bulk override) land groups in Validated, which automated
//! recompute never touches again. Bulk operations commit per group and
//! check the cancellation token between groups.

use glob::Pattern;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use thresh_schema::{
    BulkApplyOutcome, BulkExample, BulkPreviewOutcome, EngineError, EngineResult, GroupStatus,
    IndexedFile, OverrideScope, PatternMatch, PatternOutcome, ProposedOriginal, RecalcOutcome,
    SelectStrategy, SelectionPreference, SelectionSource,
};
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::db::Db;

/// Score a path against the ordered preference list: the first matching
/// prefix wins and contributes its priority, no match scores 0. Pure
/// function of (path, preference list).
pub fn score_path(path: &str, prefs: &[SelectionPreference]) -> i64 {
    prefs
        .iter()
        .find(|p| path.starts_with(&p.path_prefix))
        .map(|p| p.priority)
        .unwrap_or(0)
}

/// Pick a file by strategy. Ties within the strategy's criterion fall back
/// to ascending file id, so the choice is a total order.
pub fn pick_by_strategy(
    files: &[IndexedFile],
    strategy: SelectStrategy,
) -> Option<&IndexedFile> {
    files.iter().min_by(|a, b| {
        strategy_cmp(strategy, a, b).then_with(|| a.id.cmp(&b.id))
    })
}

fn strategy_cmp(strategy: SelectStrategy, a: &IndexedFile, b: &IndexedFile) -> Ordering {
    match strategy {
        SelectStrategy::EarliestDate => cmp_optional(&a.modified_at, &b.modified_at),
        SelectStrategy::ShortestPath => a.path.len().cmp(&b.path.len()),
        SelectStrategy::LargestFile => b.size.cmp(&a.size),
        SelectStrategy::FirstIndexed => a.indexed_at.cmp(&b.indexed_at),
    }
}

/// None sorts last: a file without a timestamp never beats one with one.
fn cmp_optional(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// The distinct parent directories of a set of files.
pub fn directory_set(files: &[IndexedFile]) -> BTreeSet<String> {
    files.iter().map(|f| f.parent_dir()).collect()
}

fn normalize_dir(dir: &str) -> String {
    if dir == "/" {
        return dir.to_string();
    }
    dir.trim_end_matches('/').to_string()
}

pub struct SelectionEngine {
    db: Db,
    preview_examples: usize,
}

impl SelectionEngine {
    pub fn new(db: Db, preview_examples: usize) -> Self {
        Self {
            db,
            preview_examples,
        }
    }

    pub async fn calculate_file_score(&self, file_id: i64) -> EngineResult<i64> {
        let file = self
            .db
            .files
            .get(file_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("file {}", file_id)))?;
        let prefs = self.db.preferences.list().await?;
        Ok(score_path(&file.path, &prefs))
    }

    /// Score every member of every eligible group and propose the strictly
    /// highest scorer as original. Ties are reported as conflicts and never
    /// assign a kept file; a stale AutoSelected proposal that scoring can
    /// no longer justify is cleared back to Pending.
    pub async fn recalculate_originals(
        &self,
        scope: OverrideScope,
        preview: bool,
        cancel: &CancellationToken,
    ) -> EngineResult<RecalcOutcome> {
        let statuses: &[GroupStatus] = match scope {
            OverrideScope::Pending => &[GroupStatus::Pending],
            OverrideScope::All => &[GroupStatus::Pending, GroupStatus::AutoSelected],
        };
        let prefs = self.db.preferences.list().await?;
        let groups = self.db.groups.list_by_status(statuses).await?;

        let mut updated = 0u64;
        let mut conflicts = 0u64;
        let mut changes = Vec::new();

        for group in groups {
            if cancel.is_cancelled() {
                info!("Recalculate cancelled; committed groups left unchanged");
                break;
            }
            let members = self.db.files.live_members(group.id).await?;
            if members.is_empty() {
                continue;
            }

            let top_score = members
                .iter()
                .map(|f| score_path(&f.path, &prefs))
                .max()
                .unwrap_or(0);
            let top: Vec<&IndexedFile> = members
                .iter()
                .filter(|f| score_path(&f.path, &prefs) == top_score)
                .collect();

            if top.len() == 1 {
                let winner = top[0];
                if preview {
                    updated += 1;
                    changes.push(ProposedOriginal {
                        group_id: group.id,
                        file_id: Some(winner.id),
                        score: top_score,
                        conflict: false,
                    });
                } else if self
                    .db
                    .groups
                    .try_propose(group.id, winner.id, SelectionSource::Score)
                    .await?
                {
                    updated += 1;
                } else {
                    // A concurrent human decision won; their state stands.
                    debug!("Group {} changed state mid-recalculate, skipped", group.id);
                }
            } else {
                conflicts += 1;
                if preview {
                    changes.push(ProposedOriginal {
                        group_id: group.id,
                        file_id: None,
                        score: top_score,
                        conflict: true,
                    });
                } else if group.status == GroupStatus::AutoSelected {
                    self.db.groups.try_clear_proposal(group.id).await?;
                }
            }
        }

        Ok(RecalcOutcome {
            updated,
            conflicts,
            preview: preview.then_some(changes),
        })
    }

    /// Propose an original for one group using a strategy instead of
    /// preference scores.
    pub async fn auto_select(
        &self,
        group_id: i64,
        strategy: SelectStrategy,
    ) -> EngineResult<i64> {
        let group = self
            .db
            .groups
            .get(group_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("group {}", group_id)))?;
        if !group.status.is_recomputable() {
            return Err(EngineError::invalid_transition(format!(
                "group {} is {}, auto-select only applies to PENDING/AUTO_SELECTED",
                group_id, group.status
            )));
        }

        let members = self.db.files.live_members(group_id).await?;
        let winner = pick_by_strategy(&members, strategy)
            .ok_or_else(|| EngineError::not_found(format!("group {} has no live members", group_id)))?;
        let winner_id = winner.id;

        if !self
            .db
            .groups
            .try_propose(group_id, winner_id, SelectionSource::Strategy)
            .await?
        {
            return Err(EngineError::conflict(format!(
                "group {} changed state concurrently",
                group_id
            )));
        }
        Ok(winner_id)
    }

    /// Apply a strategy across all undecided groups. Skips groups a
    /// concurrent writer touches.
    pub async fn auto_select_all(
        &self,
        strategy: SelectStrategy,
        cancel: &CancellationToken,
    ) -> EngineResult<u64> {
        let groups = self
            .db
            .groups
            .list_by_status(&[GroupStatus::Pending, GroupStatus::AutoSelected])
            .await?;
        let mut count = 0u64;
        for group in groups {
            if cancel.is_cancelled() {
                break;
            }
            let members = self.db.files.live_members(group.id).await?;
            let Some(winner) = pick_by_strategy(&members, strategy) else {
                continue;
            };
            if self
                .db
                .groups
                .try_propose(group.id, winner.id, SelectionSource::Strategy)
                .await?
            {
                count += 1;
            }
        }
        info!("Auto-selected {} groups via {}", count, strategy);
        Ok(count)
    }

    /// Bulk decision for groups whose member directories, as a set, exactly
    /// equal `directories`: keep a file from `preferred_directory`, chosen
    /// by `tie_breaker`. Matching groups go straight to Validated - a
    /// pattern rule is an explicit human decision.
    pub async fn apply_pattern_rule(
        &self,
        directories: &[String],
        preferred_directory: &str,
        tie_breaker: SelectStrategy,
        preview: bool,
    ) -> EngineResult<PatternOutcome> {
        if directories.is_empty() {
            return Err(EngineError::Configuration(
                "pattern rule needs at least one directory".to_string(),
            ));
        }
        let wanted: BTreeSet<String> = directories.iter().map(|d| normalize_dir(d)).collect();
        let preferred = normalize_dir(preferred_directory);
        if !wanted.contains(&preferred) {
            return Err(EngineError::Configuration(format!(
                "preferred directory '{}' is not one of the rule's directories",
                preferred
            )));
        }

        let groups = self
            .db
            .groups
            .list_by_status(&[
                GroupStatus::Pending,
                GroupStatus::AutoSelected,
                GroupStatus::Validated,
            ])
            .await?;

        let mut matches = Vec::new();
        for group in groups {
            let members = self.db.files.live_members(group.id).await?;
            if members.len() < 2 || directory_set(&members) != wanted {
                continue;
            }
            let in_preferred: Vec<IndexedFile> = members
                .iter()
                .filter(|f| f.parent_dir() == preferred)
                .cloned()
                .collect();
            let Some(winner) = pick_by_strategy(&in_preferred, tie_breaker) else {
                continue;
            };
            matches.push(PatternMatch {
                group_id: group.id,
                file_id: winner.id,
            });
        }

        if !preview {
            let mut applied = Vec::with_capacity(matches.len());
            for m in matches {
                if self
                    .db
                    .groups
                    .try_validate(
                        m.group_id,
                        m.file_id,
                        SelectionSource::Pattern,
                        &[
                            GroupStatus::Pending,
                            GroupStatus::AutoSelected,
                            GroupStatus::Validated,
                        ],
                    )
                    .await?
                {
                    applied.push(m);
                }
            }
            info!("Pattern rule validated {} groups", applied.len());
            return Ok(PatternOutcome {
                matched: applied.len() as u64,
                groups: applied,
                applied: true,
            });
        }

        Ok(PatternOutcome {
            matched: matches.len() as u64,
            groups: matches,
            applied: false,
        })
    }

    /// Read-only half of the bulk override: count matching groups and
    /// return the first few as examples.
    pub async fn bulk_override_preview(
        &self,
        keep_pattern: &str,
        remove_pattern: &str,
        scope: OverrideScope,
    ) -> EngineResult<BulkPreviewOutcome> {
        let (keep, remove) = parse_patterns(keep_pattern, remove_pattern)?;
        let mut match_count = 0u64;
        let mut examples = Vec::new();

        for group in self.scoped_groups(scope).await? {
            let members = self.db.files.live_members(group.id).await?;
            let Some((kept, removed)) = bulk_match(&members, &keep, &remove) else {
                continue;
            };
            match_count += 1;
            if examples.len() < self.preview_examples {
                examples.push(BulkExample {
                    group_id: group.id,
                    keep_path: kept.path.clone(),
                    remove_path: removed.path.clone(),
                });
            }
        }

        Ok(BulkPreviewOutcome {
            match_count,
            examples,
        })
    }

    /// Destructive half: validate every matching group with the keep-side
    /// file as original. Callers are expected to preview first.
    pub async fn bulk_override_apply(
        &self,
        keep_pattern: &str,
        remove_pattern: &str,
        scope: OverrideScope,
        cancel: &CancellationToken,
    ) -> EngineResult<BulkApplyOutcome> {
        let (keep, remove) = parse_patterns(keep_pattern, remove_pattern)?;
        let from: &[GroupStatus] = match scope {
            OverrideScope::Pending => &[GroupStatus::Pending, GroupStatus::AutoSelected],
            OverrideScope::All => &[
                GroupStatus::Pending,
                GroupStatus::AutoSelected,
                GroupStatus::Validated,
            ],
        };

        let mut applied = 0u64;
        for group in self.scoped_groups(scope).await? {
            if cancel.is_cancelled() {
                info!("Bulk override cancelled; committed groups left unchanged");
                break;
            }
            let members = self.db.files.live_members(group.id).await?;
            let Some((kept, _)) = bulk_match(&members, &keep, &remove) else {
                continue;
            };
            if self
                .db
                .groups
                .try_validate(group.id, kept.id, SelectionSource::Bulk, from)
                .await?
            {
                applied += 1;
            }
        }
        info!(
            "Bulk override applied to {} groups (keep='{}', remove='{}')",
            applied, keep_pattern, remove_pattern
        );
        Ok(BulkApplyOutcome { applied })
    }

    /// Explicit single-group human selection.
    pub async fn set_original(&self, group_id: i64, file_id: i64) -> EngineResult<()> {
        let group = self
            .db
            .groups
            .get(group_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("group {}", group_id)))?;
        match group.status {
            GroupStatus::Pending | GroupStatus::AutoSelected | GroupStatus::Validated => {}
            status => {
                return Err(EngineError::invalid_transition(format!(
                    "group {} is {}, cannot set an original",
                    group_id, status
                )))
            }
        }

        let file = self.db.files.get(file_id).await?;
        let is_member = file
            .as_ref()
            .map(|f| f.group_id == Some(group_id) && !f.is_deleted)
            .unwrap_or(false);
        if !is_member {
            return Err(EngineError::not_found(format!(
                "file {} is not a live member of group {}",
                file_id, group_id
            )));
        }

        if !self
            .db
            .groups
            .try_validate(
                group_id,
                file_id,
                SelectionSource::Manual,
                &[
                    GroupStatus::Pending,
                    GroupStatus::AutoSelected,
                    GroupStatus::Validated,
                ],
            )
            .await?
        {
            return Err(EngineError::conflict(format!(
                "group {} changed state concurrently",
                group_id
            )));
        }
        Ok(())
    }

    async fn scoped_groups(
        &self,
        scope: OverrideScope,
    ) -> EngineResult<Vec<thresh_schema::DuplicateGroup>> {
        let statuses: &[GroupStatus] = match scope {
            OverrideScope::Pending => &[GroupStatus::Pending, GroupStatus::AutoSelected],
            OverrideScope::All => &[
                GroupStatus::Pending,
                GroupStatus::AutoSelected,
                GroupStatus::Validated,
            ],
        };
        self.db.groups.list_by_status(statuses).await
    }
}

fn parse_patterns(keep: &str, remove: &str) -> EngineResult<(Pattern, Pattern)> {
    let keep = Pattern::new(keep)
        .map_err(|e| EngineError::Configuration(format!("bad keep pattern: {}", e)))?;
    let remove = Pattern::new(remove)
        .map_err(|e| EngineError::Configuration(format!("bad remove pattern: {}", e)))?;
    Ok((keep, remove))
}

/// A group matches a bulk override when it has a live member matching the
/// keep pattern (and not the remove pattern) plus a distinct live member
/// matching the remove pattern. Returns (kept, sample removed): kept is
/// the lowest-id keep candidate.
fn bulk_match<'a>(
    members: &'a [IndexedFile],
    keep: &Pattern,
    remove: &Pattern,
) -> Option<(&'a IndexedFile, &'a IndexedFile)> {
    let kept = members
        .iter()
        .find(|f| keep.matches(&f.path) && !remove.matches(&f.path))?;
    let removed = members
        .iter()
        .find(|f| f.id != kept.id && remove.matches(&f.path))?;
    Some((kept, removed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use thresh_schema::FileCategory;

    fn pref(prefix: &str, priority: i64, sort_order: i64) -> SelectionPreference {
        SelectionPreference {
            id: sort_order,
            path_prefix: prefix.to_string(),
            priority,
            sort_order,
        }
    }

    fn file(id: i64, path: &str, size: i64, modified: Option<&str>) -> IndexedFile {
        IndexedFile {
            id,
            group_id: Some(1),
            path: path.to_string(),
            content_hash: "h".to_string(),
            size,
            modified_at: modified.map(|s| s.to_string()),
            file_created_at: None,
            category: FileCategory::from_path(path),
            is_deleted: false,
            deleted_at: None,
            archive_path: None,
            archive_purged_at: None,
            last_error: None,
            retry_count: 0,
            indexed_at: format!("2026-01-01T00:00:{:02}.000000Z", id),
        }
    }

    #[test]
    fn test_score_first_matching_prefix_wins() {
        let prefs = vec![pref("/photos/raw", 90, 0), pref("/photos", 50, 1)];
        assert_eq!(score_path("/photos/raw/a.jpg", &prefs), 90);
        assert_eq!(score_path("/photos/b.jpg", &prefs), 50);
        assert_eq!(score_path("/tmp/c.jpg", &prefs), 0);
    }

    #[test]
    fn test_score_lower_sort_order_wins_among_matches() {
        // Both prefixes match; the earlier rule wins even at lower priority.
        let prefs = vec![pref("/data", 10, 0), pref("/data/keep", 99, 1)];
        assert_eq!(score_path("/data/keep/a", &prefs), 10);
    }

    #[test]
    fn test_pick_earliest_date_none_sorts_last() {
        let files = vec![
            file(1, "/a", 10, None),
            file(2, "/b", 10, Some("2020-05-01T00:00:00.000000Z")),
            file(3, "/c", 10, Some("2019-01-01T00:00:00.000000Z")),
        ];
        let winner = pick_by_strategy(&files, SelectStrategy::EarliestDate).unwrap();
        assert_eq!(winner.id, 3);
    }

    #[test]
    fn test_pick_largest_file_ties_break_on_id() {
        let files = vec![file(7, "/a", 500, None), file(3, "/b", 500, None)];
        let winner = pick_by_strategy(&files, SelectStrategy::LargestFile).unwrap();
        assert_eq!(winner.id, 3);
    }

    #[test]
    fn test_pick_shortest_path() {
        let files = vec![file(1, "/longer/path/x.jpg", 1, None), file(2, "/x.jpg", 1, None)];
        let winner = pick_by_strategy(&files, SelectStrategy::ShortestPath).unwrap();
        assert_eq!(winner.id, 2);
    }

    #[test]
    fn test_pick_first_indexed() {
        let files = vec![file(5, "/a", 1, None), file(2, "/b", 1, None)];
        let winner = pick_by_strategy(&files, SelectStrategy::FirstIndexed).unwrap();
        assert_eq!(winner.id, 2);
    }

    #[test]
    fn test_directory_set() {
        let files = vec![
            file(1, "/photos/a.jpg", 1, None),
            file(2, "/public/a.jpg", 1, None),
            file(3, "/photos/b.jpg", 1, None),
        ];
        let dirs = directory_set(&files);
        assert_eq!(
            dirs.into_iter().collect::<Vec<_>>(),
            vec!["/photos".to_string(), "/public".to_string()]
        );
    }

    #[test]
    fn test_bulk_match_requires_distinct_members() {
        let keep = Pattern::new("/photos/*").unwrap();
        let remove = Pattern::new("/public/*").unwrap();

        let members = vec![file(1, "/photos/a.jpg", 1, None), file(2, "/public/a.jpg", 1, None)];
        let (kept, removed) = bulk_match(&members, &keep, &remove).unwrap();
        assert_eq!(kept.id, 1);
        assert_eq!(removed.id, 2);

        // Only a keep-side match: no removal candidate, no match.
        let only_keep = vec![file(1, "/photos/a.jpg", 1, None)];
        assert!(bulk_match(&only_keep, &keep, &remove).is_none());
    }

    #[test]
    fn test_bulk_match_keep_candidate_never_matches_remove() {
        let keep = Pattern::new("/data/*").unwrap();
        let remove = Pattern::new("/data/old*").unwrap();
        // File 1 matches both patterns; it cannot be the kept file.
        let members = vec![file(1, "/data/old.jpg", 1, None), file(2, "/data/new.jpg", 1, None)];
        let (kept, removed) = bulk_match(&members, &keep, &remove).unwrap();
        assert_eq!(kept.id, 2);
        assert_eq!(removed.id, 1);
    }

    #[test]
    fn test_normalize_dir() {
        assert_eq!(normalize_dir("/photos/"), "/photos");
        assert_eq!(normalize_dir("/photos"), "/photos");
        assert_eq!(normalize_dir("/"), "/");
    }
}
