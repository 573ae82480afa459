//! Small filesystem helpers shared by the persistence layers.

use sha2::{Digest, Sha256};
use std::path::Path;
use uuid::Uuid;

/// Writes `bytes` to `path` atomically.
///
/// The bytes land in a uniquely-named sibling temp file first, then a
/// rename moves them over the target. Readers see either the old file or
/// the new one, never a partial write.
pub(crate) async fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, bytes).await?;
    match tokio::fs::rename(&tmp, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            Err(e)
        }
    }
}

/// Hex-encoded sha-256 of a file's contents.
pub(crate) async fn sha256_hex_of_file(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}
