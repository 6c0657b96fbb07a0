//! Archive store: upload-by-key byte storage for files awaiting deletion.
//!
//! Keys are derived from the content hash, so re-archiving identical
//! content is a no-op and a resumed job can detect work already done with
//! an existence check.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Deterministic archive key for a content hash: first-byte shard plus the
/// full hash, e.g. `ab/ab12...`.
pub fn archive_key(content_hash: &str) -> String {
    if content_hash.len() < 2 {
        return content_hash.to_string();
    }
    format!("{}/{}", &content_hash[..2], content_hash)
}

/// Byte store the cleaner archives into. Object-store shaped: upload by
/// key, existence check, delete by key.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Copy the file at `source` into the store under `key`. Returns bytes
    /// written. Uploading an existing key is a no-op.
    async fn put(&self, key: &str, source: &Path) -> io::Result<u64>;

    async fn exists(&self, key: &str) -> io::Result<bool>;

    /// Remove the object. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> io::Result<()>;
}

/// Filesystem-backed archive store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsArchiveStore {
    root: PathBuf,
}

impl FsArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

/// Staging name unique to this writer. Tasks for one group share a content
/// hash and therefore a key, and may upload it concurrently; each writer
/// must stage on its own inode so no one truncates bytes mid-copy.
fn staging_path(dest: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!("{}.{}.{}.partial", name, std::process::id(), seq))
}

#[async_trait]
impl ArchiveStore for FsArchiveStore {
    async fn put(&self, key: &str, source: &Path) -> io::Result<u64> {
        let dest = self.object_path(key);
        if tokio::fs::try_exists(&dest).await? {
            debug!("Archive object {} already present, skipping upload", key);
            let meta = tokio::fs::metadata(&dest).await?;
            return Ok(meta.len());
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Copy to a writer-unique staging name first so a crash never
        // leaves a partial object under the final key.
        let staging = staging_path(&dest);
        let bytes = tokio::fs::copy(source, &staging).await?;
        match tokio::fs::rename(&staging, &dest).await {
            Ok(()) => Ok(bytes),
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                // A concurrent writer of the same key may have published
                // the object first; identical content, same outcome.
                if tokio::fs::try_exists(&dest).await? {
                    let meta = tokio::fs::metadata(&dest).await?;
                    Ok(meta.len())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn exists(&self, key: &str) -> io::Result<bool> {
        tokio::fs::try_exists(self.object_path(key)).await
    }

    async fn remove(&self, key: &str) -> io::Result<()> {
        match tokio::fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_key_shards_by_first_byte() {
        assert_eq!(archive_key("ab12cd"), "ab/ab12cd");
        assert_eq!(archive_key("x"), "x");
    }

    #[tokio::test]
    async fn test_put_exists_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArchiveStore::new(dir.path().join("archive"));

        let src = dir.path().join("src.bin");
        tokio::fs::write(&src, b"payload").await.unwrap();

        assert!(!store.exists("ab/ab12").await.unwrap());
        let bytes = store.put("ab/ab12", &src).await.unwrap();
        assert_eq!(bytes, 7);
        assert!(store.exists("ab/ab12").await.unwrap());

        // Idempotent re-upload.
        let again = store.put("ab/ab12", &src).await.unwrap();
        assert_eq!(again, 7);

        store.remove("ab/ab12").await.unwrap();
        assert!(!store.exists("ab/ab12").await.unwrap());
        // Removing a missing key is fine.
        store.remove("ab/ab12").await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_puts_of_one_key_both_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArchiveStore::new(dir.path().join("archive"));

        // Duplicate members share a hash and therefore an archive key; a
        // group's tasks upload it in parallel.
        let payload = vec![7u8; 4 * 1024 * 1024];
        let src_a = dir.path().join("a.bin");
        let src_b = dir.path().join("b.bin");
        tokio::fs::write(&src_a, &payload).await.unwrap();
        tokio::fs::write(&src_b, &payload).await.unwrap();

        for round in 0..4 {
            let key = format!("cd/cd{:02}", round);
            let (store_a, store_b) = (store.clone(), store.clone());
            let (key_a, key_b) = (key.clone(), key.clone());
            let (src_a, src_b) = (src_a.clone(), src_b.clone());
            let a = tokio::spawn(async move { store_a.put(&key_a, &src_a).await });
            let b = tokio::spawn(async move { store_b.put(&key_b, &src_b).await });

            assert_eq!(a.await.unwrap().unwrap(), payload.len() as u64);
            assert_eq!(b.await.unwrap().unwrap(), payload.len() as u64);

            // The published object is complete, never a truncated stage.
            let meta = tokio::fs::metadata(dir.path().join("archive").join(&key))
                .await
                .unwrap();
            assert_eq!(meta.len(), payload.len() as u64);
        }
    }
}
