//! Engine configuration (plain data).

use std::path::PathBuf;

/// Canonical engine configuration used by the CLI and tests.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite connection string (sqlite:/path/to/db.sqlite | sqlite::memory:)
    pub database_url: String,
    /// Root directory of the filesystem archive store
    pub archive_root: PathBuf,
    /// Max files a cleaner job processes concurrently
    pub cleaner_parallelism: usize,
    /// Days an archived file is retained before the sweep may purge it
    pub retention_days: i64,
    /// Sample size returned by bulk-override previews
    pub preview_examples: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://thresh.db".to_string(),
            archive_root: PathBuf::from("thresh_archive"),
            cleaner_parallelism: 4,
            retention_days: 30,
            preview_examples: 10,
        }
    }
}
