//! Duplicate-group store.
//!
//! Every transition method is a guarded UPDATE (`WHERE id = ? AND status IN
//! (...)`) returning whether the row was actually moved. Callers translate
//! a `false` into Conflict, InvalidTransition, or a bulk skip.

use sqlx::{Pool, Sqlite};
use thresh_schema::{
    now_ts, DuplicateGroup, EngineResult, EngineStats, GroupStatus, SelectionSource,
};
use tracing::debug;

use super::status_in;

#[derive(Clone)]
pub struct GroupStore {
    pool: Pool<Sqlite>,
}

impl GroupStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> EngineResult<Option<DuplicateGroup>> {
        let group = sqlx::query_as("SELECT * FROM th_groups WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(group)
    }

    pub async fn get_by_hash(&self, content_hash: &str) -> EngineResult<Option<DuplicateGroup>> {
        let group = sqlx::query_as("SELECT * FROM th_groups WHERE content_hash = ?")
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(group)
    }

    /// Create a Pending group for a content hash. Counts are filled by
    /// `recount` once members are attached.
    pub async fn create(&self, content_hash: &str) -> EngineResult<i64> {
        let now = now_ts();
        let result = sqlx::query(
            r#"
            INSERT INTO th_groups (content_hash, status, created_at, updated_at)
            VALUES (?, 'PENDING', ?, ?)
            "#,
        )
        .bind(content_hash)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_by_status(
        &self,
        statuses: &[GroupStatus],
    ) -> EngineResult<Vec<DuplicateGroup>> {
        let sql = format!(
            "SELECT * FROM th_groups WHERE status IN ({}) ORDER BY id",
            status_in(statuses)
        );
        let groups = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(groups)
    }

    pub async fn count_by_status(&self, statuses: &[GroupStatus]) -> EngineResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM th_groups WHERE status IN ({})",
            status_in(statuses)
        );
        let count = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Groups eligible for batch validation: in `status`, with a standing
    /// kept file.
    pub async fn list_validatable(
        &self,
        status: GroupStatus,
        limit: i64,
    ) -> EngineResult<Vec<i64>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT id FROM th_groups
            WHERE status = ? AND kept_file_id IS NOT NULL
            ORDER BY id LIMIT ?
            "#,
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn count_validatable(&self, status: GroupStatus) -> EngineResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM th_groups WHERE status = ? AND kept_file_id IS NOT NULL",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Cleanable groups (Validated/CleaningFailed with a kept file) owning
    /// a live file of the given category.
    pub async fn cleanable_by_category(
        &self,
        category: thresh_schema::FileCategory,
    ) -> EngineResult<Vec<DuplicateGroup>> {
        let groups = sqlx::query_as(
            r#"
            SELECT DISTINCT g.* FROM th_groups g
            JOIN th_files f ON f.group_id = g.id
            WHERE g.status IN ('VALIDATED','CLEANING_FAILED')
              AND g.kept_file_id IS NOT NULL
              AND f.is_deleted = 0
              AND f.category = ?
            ORDER BY g.id
            "#,
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        Ok(groups)
    }

    /// Cleanable groups owning a live file under the directory prefix.
    pub async fn cleanable_by_directory(&self, prefix: &str) -> EngineResult<Vec<DuplicateGroup>> {
        let groups = sqlx::query_as(
            r#"
            SELECT DISTINCT g.* FROM th_groups g
            JOIN th_files f ON f.group_id = g.id
            WHERE g.status IN ('VALIDATED','CLEANING_FAILED')
              AND g.kept_file_id IS NOT NULL
              AND f.is_deleted = 0
              AND f.path LIKE ? || '%'
            ORDER BY g.id
            "#,
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(groups)
    }

    /// Propose an original from automated scoring or a strategy. Only moves
    /// groups still in an automated state.
    pub async fn try_propose(
        &self,
        id: i64,
        file_id: i64,
        source: SelectionSource,
    ) -> EngineResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE th_groups
            SET status = 'AUTO_SELECTED',
                kept_file_id = ?,
                selection_source = ?,
                updated_at = ?
            WHERE id = ? AND status IN ('PENDING','AUTO_SELECTED')
            "#,
        )
        .bind(file_id)
        .bind(source)
        .bind(now_ts())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    /// Drop a stale automated proposal (scoring now ties). AutoSelected only.
    pub async fn try_clear_proposal(&self, id: i64) -> EngineResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE th_groups
            SET status = 'PENDING',
                kept_file_id = NULL,
                selection_source = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'AUTO_SELECTED'
            "#,
        )
        .bind(now_ts())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    /// Confirm an original (human or human-equivalent decision).
    pub async fn try_validate(
        &self,
        id: i64,
        file_id: i64,
        source: SelectionSource,
        from: &[GroupStatus],
    ) -> EngineResult<bool> {
        let now = now_ts();
        let sql = format!(
            r#"
            UPDATE th_groups
            SET status = 'VALIDATED',
                kept_file_id = ?,
                selection_source = ?,
                validated_at = ?,
                updated_at = ?
            WHERE id = ? AND status IN ({})
            "#,
            status_in(from)
        );
        let rows = sqlx::query(&sql)
            .bind(file_id)
            .bind(source)
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows == 1)
    }

    /// Approve a standing proposal without changing it (batch validation).
    /// Requires a kept file; covers reopened groups whose incumbent kept
    /// file survived, hence PENDING is also allowed.
    pub async fn try_validate_proposal(&self, id: i64) -> EngineResult<bool> {
        let now = now_ts();
        let rows = sqlx::query(
            r#"
            UPDATE th_groups
            SET status = 'VALIDATED',
                validated_at = ?,
                updated_at = ?
            WHERE id = ? AND status IN ('PENDING','AUTO_SELECTED') AND kept_file_id IS NOT NULL
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    /// Undo a validation. Automated provenance keeps the proposal and lands
    /// in AutoSelected; human provenance clears it and lands in Pending.
    pub async fn try_undo(&self, id: i64, to: GroupStatus) -> EngineResult<bool> {
        let sql = match to {
            GroupStatus::AutoSelected => {
                r#"
                UPDATE th_groups
                SET status = 'AUTO_SELECTED',
                    validated_at = NULL,
                    updated_at = ?
                WHERE id = ? AND status = 'VALIDATED'
                "#
            }
            _ => {
                r#"
                UPDATE th_groups
                SET status = 'PENDING',
                    kept_file_id = NULL,
                    selection_source = NULL,
                    validated_at = NULL,
                    updated_at = ?
                WHERE id = ? AND status = 'VALIDATED'
                "#
            }
        };
        let rows = sqlx::query(sql)
            .bind(now_ts())
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows == 1)
    }

    /// Move a group into Cleaning when a wet job is created (or retried).
    pub async fn try_begin_cleaning(&self, id: i64) -> EngineResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE th_groups
            SET status = 'CLEANING',
                updated_at = ?
            WHERE id = ? AND status IN ('VALIDATED','CLEANING_FAILED')
            "#,
        )
        .bind(now_ts())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    /// Leave Cleaning for a completion state. `Cleaned` stamps resolved_at;
    /// `Pending` is the mid-clean-growth reopening path.
    pub async fn try_finish_cleaning(&self, id: i64, to: GroupStatus) -> EngineResult<bool> {
        let now = now_ts();
        let sql = match to {
            GroupStatus::Cleaned => {
                r#"
                UPDATE th_groups
                SET status = 'CLEANED',
                    resolved_at = ?,
                    updated_at = ?
                WHERE id = ? AND status = 'CLEANING'
                "#
            }
            GroupStatus::CleaningFailed => {
                r#"
                UPDATE th_groups
                SET status = 'CLEANING_FAILED',
                    resolved_at = NULL,
                    updated_at = ?
                WHERE id = ? AND status = 'CLEANING'
                "#
            }
            _ => {
                r#"
                UPDATE th_groups
                SET status = 'PENDING',
                    resolved_at = NULL,
                    updated_at = ?
                WHERE id = ? AND status = 'CLEANING'
                "#
            }
        };
        let mut query = sqlx::query(sql);
        if to == GroupStatus::Cleaned {
            query = query.bind(&now);
        }
        let rows = query
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows == 1)
    }

    /// Reopen a group that gained a member after a decision or cleanup. The
    /// kept file stays as the incumbent candidate.
    pub async fn try_reopen(&self, id: i64, from: &[GroupStatus]) -> EngineResult<bool> {
        let sql = format!(
            r#"
            UPDATE th_groups
            SET status = 'PENDING',
                validated_at = NULL,
                resolved_at = NULL,
                updated_at = ?
            WHERE id = ? AND status IN ({})
            "#,
            status_in(from)
        );
        let rows = sqlx::query(&sql)
            .bind(now_ts())
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if rows == 1 {
            debug!("Group {} reopened to PENDING", id);
        }
        Ok(rows == 1)
    }

    /// Recompute file_count/total_size from live members.
    pub async fn recount(&self, id: i64) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE th_groups
            SET file_count = (
                    SELECT COUNT(*) FROM th_files
                    WHERE group_id = th_groups.id AND is_deleted = 0
                ),
                total_size = (
                    SELECT COALESCE(SUM(size), 0) FROM th_files
                    WHERE group_id = th_groups.id AND is_deleted = 0
                ),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now_ts())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Status overview plus file totals.
    pub async fn stats(&self) -> EngineResult<EngineStats> {
        let stats = sqlx::query_as::<_, StatusCounts>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'PENDING') AS pending,
                COUNT(*) FILTER (WHERE status = 'AUTO_SELECTED') AS auto_selected,
                COUNT(*) FILTER (WHERE status = 'VALIDATED') AS validated,
                COUNT(*) FILTER (WHERE status = 'CLEANING') AS cleaning,
                COUNT(*) FILTER (WHERE status = 'CLEANING_FAILED') AS cleaning_failed,
                COUNT(*) FILTER (WHERE status = 'CLEANED') AS cleaned
            FROM th_groups
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let (total_files, deleted_files): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(*) FILTER (WHERE is_deleted = 1) FROM th_files
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let reclaimable_bytes: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(f.size), 0)
            FROM th_files f
            JOIN th_groups g ON f.group_id = g.id
            WHERE f.is_deleted = 0
              AND g.kept_file_id IS NOT NULL
              AND f.id != g.kept_file_id
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(EngineStats {
            groups_pending: stats.pending,
            groups_auto_selected: stats.auto_selected,
            groups_validated: stats.validated,
            groups_cleaning: stats.cleaning,
            groups_cleaning_failed: stats.cleaning_failed,
            groups_cleaned: stats.cleaned,
            total_files,
            deleted_files,
            reclaimable_bytes,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StatusCounts {
    pending: i64,
    auto_selected: i64,
    validated: i64,
    cleaning: i64,
    cleaning_failed: i64,
    cleaned: i64,
}
