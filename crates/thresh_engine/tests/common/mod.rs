#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use thresh_engine::db::Db;
use thresh_engine::verify::sha256_bytes;
use thresh_engine::{Engine, EngineConfig, FsArchiveStore};
use thresh_schema::{DuplicateGroup, IndexedFile, IngestRecord};

/// Engine over a temp-dir database and archive root. The TempDir keeps the
/// files alive for the duration of the test.
pub struct Harness {
    pub engine: Engine,
    pub dir: TempDir,
}

impl Harness {
    pub fn archive_root(&self) -> std::path::PathBuf {
        self.dir.path().join("archive")
    }
}

pub async fn engine() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let database_url = format!("sqlite://{}", dir.path().join("thresh.db").display());
    let config = EngineConfig {
        database_url: database_url.clone(),
        archive_root: dir.path().join("archive"),
        ..EngineConfig::default()
    };
    let db = Db::connect(&database_url).await.unwrap();
    let archive = Arc::new(FsArchiveStore::new(config.archive_root.clone()));
    Harness {
        engine: Engine::new(db, archive, config),
        dir,
    }
}

pub fn record(path: &str, hash: &str, size: i64) -> IngestRecord {
    IngestRecord {
        path: path.to_string(),
        content_hash: hash.to_string(),
        size,
        modified_at: None,
        created_at: None,
    }
}

pub fn record_modified(path: &str, hash: &str, size: i64, modified_at: &str) -> IngestRecord {
    IngestRecord {
        modified_at: Some(modified_at.to_string()),
        ..record(path, hash, size)
    }
}

/// Write real bytes under the harness dir and return a matching record,
/// with the hash the cleaner's re-verification will recompute.
pub async fn write_file(dir: &Path, rel: &str, contents: &[u8]) -> IngestRecord {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.unwrap();
    }
    tokio::fs::write(&path, contents).await.unwrap();
    record(
        &path.display().to_string(),
        &sha256_bytes(contents),
        contents.len() as i64,
    )
}

pub async fn group_by_hash(engine: &Engine, hash: &str) -> DuplicateGroup {
    engine.db().groups.get_by_hash(hash).await.unwrap().unwrap()
}

pub async fn file_by_path(engine: &Engine, path: &str) -> IndexedFile {
    engine.db().files.find_by_path(path).await.unwrap().unwrap()
}
