//! Content re-verification used by the cleaner before any destructive step.

use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// SHA-256 of a file's current bytes, lowercase hex. Streams in 64 KiB
/// chunks so large media files don't get buffered whole.
pub async fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_string(&hasher.finalize()))
}

/// SHA-256 of an in-memory buffer, lowercase hex (tests, ingestion shims).
pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex_string(&Sha256::digest(bytes))
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_and_buffer_hashes_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        tokio::fs::write(&path, b"duplicate bytes").await.unwrap();

        let from_file = sha256_file(&path).await.unwrap();
        let from_bytes = sha256_bytes(b"duplicate bytes");
        assert_eq!(from_file, from_bytes);
        assert_eq!(from_file.len(), 64);
    }
}
