//! SQLite persistence layer.
//!
//! One store struct per table family, each holding a pool clone. All group
//! status transitions are status-guarded single-row UPDATEs; zero rows
//! affected means a concurrent writer won and the caller reports a conflict
//! or skips instead of clobbering.

pub mod files;
pub mod groups;
pub mod jobs;
pub mod preferences;
pub mod schema;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use thresh_schema::{EngineResult, GroupStatus};

pub use files::FileStore;
pub use groups::GroupStore;
pub use jobs::JobStore;
pub use preferences::PreferenceStore;

/// SQL fragment `'A','B'` for a `status IN (...)` guard. Values come from
/// the closed enum, never from input.
pub(crate) fn status_in(statuses: &[GroupStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Handle bundling the pool and the per-table stores.
#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
    pub groups: GroupStore,
    pub files: FileStore,
    pub preferences: PreferenceStore,
    pub jobs: JobStore,
}

impl Db {
    /// Open (creating if missing), verify the schema version, and create
    /// tables.
    pub async fn connect(database_url: &str) -> EngineResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        schema::ensure_schema_version(&pool, schema::SCHEMA_VERSION).await?;
        schema::init_schema(&pool).await?;
        let db = Self::from_pool(pool);
        // A fresh database starts with the shipped preference list.
        if db.preferences.list().await?.is_empty() {
            db.preferences.reset_defaults().await?;
        }
        Ok(db)
    }

    /// Wrap an existing pool (tests). Does not touch the schema.
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self {
            groups: GroupStore::new(pool.clone()),
            files: FileStore::new(pool.clone()),
            preferences: PreferenceStore::new(pool.clone()),
            jobs: JobStore::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}
