//! Schema DDL and version management for pre-v1 development.
//!
//! Pre-v1 has no data to preserve, so on version mismatch we simply drop
//! all known tables and recreate them.

use sqlx::{Pool, Sqlite};
use thresh_schema::{now_ts, EngineResult};
use tracing::warn;

/// Current schema version. Increment when schema changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Known tables that will be dropped on schema mismatch.
///
/// Order matters: tables referencing others come first, th_meta last so a
/// version check fails if other tables exist without it.
const KNOWN_TABLES: &[&str] = &[
    "th_cleaner_job_files",
    "th_cleaner_jobs",
    "th_files",
    "th_groups",
    "th_preferences",
    "th_meta",
];

/// Ensure the database schema version matches the expected version.
///
/// If the version mismatches or th_meta doesn't exist while other known
/// tables do, drops all known tables and recreates th_meta with the current
/// version. Returns `true` if a reset occurred.
pub async fn ensure_schema_version(pool: &Pool<Sqlite>, expected: i32) -> EngineResult<bool> {
    match current_version(pool).await? {
        Some(v) if v == expected => Ok(false),
        Some(v) => {
            warn!("Database schema reset (dev mode): version {} -> {}", v, expected);
            reset_schema(pool, expected).await?;
            Ok(true)
        }
        None => {
            if has_any_known_tables(pool).await? {
                warn!("Database schema reset (dev mode): unversioned -> {}", expected);
                reset_schema(pool, expected).await?;
                Ok(true)
            } else {
                create_meta_table(pool, expected).await?;
                Ok(false)
            }
        }
    }
}

/// Create all engine tables if absent.
pub async fn init_schema(pool: &Pool<Sqlite>) -> EngineResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS th_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content_hash TEXT NOT NULL UNIQUE,
            file_count INTEGER NOT NULL DEFAULT 0,
            total_size INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'PENDING',
            kept_file_id INTEGER,
            selection_source TEXT,
            validated_at TEXT,
            resolved_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS th_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id INTEGER,
            path TEXT NOT NULL UNIQUE,
            content_hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            modified_at TEXT,
            file_created_at TEXT,
            category TEXT NOT NULL DEFAULT 'OTHER',
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            archive_path TEXT,
            archive_purged_at TEXT,
            last_error TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            indexed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_th_files_group ON th_files(group_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_th_files_hash ON th_files(content_hash)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS th_preferences (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path_prefix TEXT NOT NULL,
            priority INTEGER NOT NULL,
            sort_order INTEGER NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS th_cleaner_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            status TEXT NOT NULL DEFAULT 'PENDING',
            dry_run INTEGER NOT NULL DEFAULT 0,
            selector TEXT NOT NULL,
            total_files INTEGER NOT NULL DEFAULT 0,
            processed_files INTEGER NOT NULL DEFAULT 0,
            succeeded_files INTEGER NOT NULL DEFAULT 0,
            failed_files INTEGER NOT NULL DEFAULT 0,
            skipped_files INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS th_cleaner_job_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            file_id INTEGER NOT NULL,
            group_id INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            archive_path TEXT,
            error TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_th_job_files_job ON th_cleaner_job_files(job_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn current_version(pool: &Pool<Sqlite>) -> EngineResult<Option<i32>> {
    let meta_exists: Option<i32> = sqlx::query_scalar(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'th_meta'",
    )
    .fetch_optional(pool)
    .await?;

    if meta_exists.is_none() {
        return Ok(None);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT schema_version FROM th_meta WHERE key = 'schema'")
            .fetch_optional(pool)
            .await?;
    Ok(version)
}

async fn has_any_known_tables(pool: &Pool<Sqlite>) -> EngineResult<bool> {
    for table in KNOWN_TABLES.iter().filter(|t| **t != "th_meta") {
        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(*table)
                .fetch_optional(pool)
                .await?;
        if exists.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn reset_schema(pool: &Pool<Sqlite>, version: i32) -> EngineResult<()> {
    for table in KNOWN_TABLES {
        let drop_sql = format!("DROP TABLE IF EXISTS {}", table);
        sqlx::query(&drop_sql).execute(pool).await?;
    }
    create_meta_table(pool, version).await
}

async fn create_meta_table(pool: &Pool<Sqlite>, version: i32) -> EngineResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS th_meta (
            key TEXT PRIMARY KEY,
            schema_version INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO th_meta (key, schema_version, updated_at)
        VALUES ('schema', ?, ?)
        ON CONFLICT(key) DO UPDATE SET
            schema_version = excluded.schema_version,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(version)
    .bind(now_ts())
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> Pool<Sqlite> {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_database_creates_meta() {
        let pool = memory_pool().await;
        let reset = ensure_schema_version(&pool, 1).await.unwrap();
        assert!(!reset);
        assert_eq!(current_version(&pool).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_matching_version_no_reset() {
        let pool = memory_pool().await;
        ensure_schema_version(&pool, 1).await.unwrap();
        init_schema(&pool).await.unwrap();

        let reset = ensure_schema_version(&pool, 1).await.unwrap();
        assert!(!reset);

        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM sqlite_master WHERE name = 'th_groups'")
                .fetch_optional(&pool)
                .await
                .unwrap();
        assert!(exists.is_some());
    }

    #[tokio::test]
    async fn test_version_mismatch_triggers_reset() {
        let pool = memory_pool().await;
        ensure_schema_version(&pool, 1).await.unwrap();
        init_schema(&pool).await.unwrap();

        let reset = ensure_schema_version(&pool, 2).await.unwrap();
        assert!(reset);

        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM sqlite_master WHERE name = 'th_groups'")
                .fetch_optional(&pool)
                .await
                .unwrap();
        assert!(exists.is_none());
        assert_eq!(current_version(&pool).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_unversioned_schema_triggers_reset() {
        let pool = memory_pool().await;
        sqlx::query("CREATE TABLE th_groups (id INTEGER PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();

        let reset = ensure_schema_version(&pool, 1).await.unwrap();
        assert!(reset);
        assert_eq!(current_version(&pool).await.unwrap(), Some(1));
    }
}
