//! Pluggable persistence for checkpoint data.
//!
//! A backend only moves bytes; the store owns all semantics. Artifacts
//! are pipeline-owned files on the real filesystem regardless of which
//! backend holds the manifest and records.

use crate::utils;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};

pub(crate) const MANIFEST_FILE: &str = "checkpoint_manifest.json";

pub(crate) fn record_file_name(level: u32) -> String {
    format!("level_{level:02}.json")
}

/// Durable storage for a project's manifest and level records.
#[async_trait]
pub trait CheckpointBackend: Send + Sync {
    /// Raw manifest bytes, or `None` when no manifest has been written.
    async fn read_manifest(&self) -> io::Result<Option<Vec<u8>>>;

    /// Persists the manifest.
    async fn write_manifest(&self, bytes: &[u8]) -> io::Result<()>;

    /// Persists one level record, returning where it landed.
    async fn write_record(&self, level: u32, bytes: &[u8]) -> io::Result<PathBuf>;

    /// Removes the manifest and every record.
    async fn clear(&self) -> io::Result<()>;
}

/// Filesystem backend, one directory per project.
#[derive(Debug, Clone)]
pub struct FsBackend {
    dir: PathBuf,
}

impl FsBackend {
    /// Creates a backend rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory holding this project's checkpoint files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }
}

#[async_trait]
impl CheckpointBackend for FsBackend {
    async fn read_manifest(&self) -> io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.manifest_path()).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_manifest(&self, bytes: &[u8]) -> io::Result<()> {
        utils::atomic_write(&self.manifest_path(), bytes).await
    }

    async fn write_record(&self, level: u32, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.dir.join(record_file_name(level));
        utils::atomic_write(&path, bytes).await?;
        Ok(path)
    }

    async fn clear(&self) -> io::Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory backend for tests and short-lived runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    manifest: Mutex<Option<Vec<u8>>>,
    records: DashMap<u32, Vec<u8>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored level records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl CheckpointBackend for MemoryBackend {
    async fn read_manifest(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.manifest.lock().clone())
    }

    async fn write_manifest(&self, bytes: &[u8]) -> io::Result<()> {
        *self.manifest.lock() = Some(bytes.to_vec());
        Ok(())
    }

    async fn write_record(&self, level: u32, bytes: &[u8]) -> io::Result<PathBuf> {
        self.records.insert(level, bytes.to_vec());
        Ok(PathBuf::from(record_file_name(level)))
    }

    async fn clear(&self) -> io::Result<()> {
        *self.manifest.lock() = None;
        self.records.clear();
        Ok(())
    }
}
