//! Indexed-file store.
//!
//! Files hold a plain `group_id` reference. Soft delete only: a file row is
//! never removed, the cleaner marks it deleted after the archive write is
//! confirmed.

use sqlx::{Pool, Sqlite};
use thresh_schema::{now_ts, EngineResult, FileCategory, IndexedFile, IngestRecord};

#[derive(Clone)]
pub struct FileStore {
    pool: Pool<Sqlite>,
}

impl FileStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> EngineResult<Option<IndexedFile>> {
        let file = sqlx::query_as("SELECT * FROM th_files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(file)
    }

    pub async fn find_by_path(&self, path: &str) -> EngineResult<Option<IndexedFile>> {
        let file = sqlx::query_as("SELECT * FROM th_files WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(file)
    }

    /// A live file with this hash not yet attached to any group, if any.
    /// Its existence is what turns the next ingest of the hash into a group.
    pub async fn find_ungrouped_by_hash(
        &self,
        content_hash: &str,
    ) -> EngineResult<Option<IndexedFile>> {
        let file = sqlx::query_as(
            r#"
            SELECT * FROM th_files
            WHERE content_hash = ? AND group_id IS NULL AND is_deleted = 0
            ORDER BY id LIMIT 1
            "#,
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(file)
    }

    pub async fn insert(
        &self,
        record: &IngestRecord,
        group_id: Option<i64>,
    ) -> EngineResult<i64> {
        let category = FileCategory::from_path(&record.path);
        let result = sqlx::query(
            r#"
            INSERT INTO th_files
                (group_id, path, content_hash, size, modified_at, file_created_at,
                 category, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(group_id)
        .bind(&record.path)
        .bind(&record.content_hash)
        .bind(record.size)
        .bind(&record.modified_at)
        .bind(&record.created_at)
        .bind(category)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn assign_group(&self, file_id: i64, group_id: i64) -> EngineResult<()> {
        sqlx::query("UPDATE th_files SET group_id = ? WHERE id = ?")
            .bind(group_id)
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Non-deleted members of a group, ascending id.
    pub async fn live_members(&self, group_id: i64) -> EngineResult<Vec<IndexedFile>> {
        let files = sqlx::query_as(
            "SELECT * FROM th_files WHERE group_id = ? AND is_deleted = 0 ORDER BY id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    pub async fn count_live_non_kept(&self, group_id: i64, kept_file_id: i64) -> EngineResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM th_files WHERE group_id = ? AND is_deleted = 0 AND id != ?",
        )
        .bind(group_id)
        .bind(kept_file_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Soft delete after a confirmed archive write.
    pub async fn mark_deleted(&self, file_id: i64, archive_key: &str) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE th_files
            SET is_deleted = 1,
                deleted_at = ?,
                archive_path = ?,
                last_error = NULL
            WHERE id = ?
            "#,
        )
        .bind(now_ts())
        .bind(archive_key)
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a per-file cleanup failure. Never called in dry runs.
    pub async fn record_failure(&self, file_id: i64, error: &str) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE th_files
            SET last_error = ?,
                retry_count = retry_count + 1
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Archived files whose retention window has expired.
    pub async fn purge_candidates(&self, cutoff: &str) -> EngineResult<Vec<IndexedFile>> {
        let files = sqlx::query_as(
            r#"
            SELECT * FROM th_files
            WHERE is_deleted = 1
              AND archive_path IS NOT NULL
              AND archive_purged_at IS NULL
              AND deleted_at < ?
            ORDER BY id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    /// True if another unpurged row inside the retention window still
    /// references the same archive key (identical content, deleted later).
    pub async fn archive_key_still_referenced(
        &self,
        archive_key: &str,
        excluding_file_id: i64,
        cutoff: &str,
    ) -> EngineResult<bool> {
        let exists: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM th_files
            WHERE archive_path = ?
              AND id != ?
              AND archive_purged_at IS NULL
              AND deleted_at >= ?
            LIMIT 1
            "#,
        )
        .bind(archive_key)
        .bind(excluding_file_id)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;
        Ok(exists.is_some())
    }

    pub async fn mark_purged(&self, file_id: i64) -> EngineResult<()> {
        sqlx::query("UPDATE th_files SET archive_purged_at = ? WHERE id = ?")
            .bind(now_ts())
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
