//! Saving and restoring the cache as a single JSON snapshot.
//!
//! Snapshots hold the full entry set in least-recently-used order, so a
//! reload replays them through [`WeightedCache::put`] and rebuilds both
//! recency order and total size from scratch. Sizes recorded on disk are
//! never trusted.

use crate::cache::entry::CacheEntry;
use crate::cache::store::WeightedCache;
use crate::errors::StagekeepError;
use crate::utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// On-disk form of a cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    /// When the snapshot was written.
    pub saved_at: DateTime<Utc>,
    /// Every entry, least-recently-used first.
    pub entries: Vec<CacheEntry>,
}

impl WeightedCache {
    /// Writes the full entry set to `path` atomically.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if an entry cannot be encoded, or an
    /// io error from the underlying write.
    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<(), StagekeepError> {
        let path = path.as_ref();
        let snapshot = CacheSnapshot {
            saved_at: Utc::now(),
            entries: self.entries_by_recency(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| StagekeepError::Serialization(e.to_string()))?;
        utils::atomic_write(path, &bytes).await?;
        tracing::debug!(
            path = %path.display(),
            entries = snapshot.entries.len(),
            "Saved cache snapshot"
        );
        Ok(())
    }

    /// Builds a cache from the snapshot at `path`, bounded to
    /// `capacity_bytes`.
    ///
    /// A missing or unreadable snapshot yields an empty cache; losing
    /// cached work is recoverable, refusing to start is not. Entries are
    /// replayed in saved order, so if the capacity shrank since the save,
    /// the least-recently-used entries fall off first.
    pub async fn load_from(path: impl AsRef<Path>, capacity_bytes: u64) -> Self {
        let path = path.as_ref();
        let cache = Self::new(capacity_bytes);
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No cache snapshot to load");
                return cache;
            }
        };
        let snapshot: CacheSnapshot = match serde_json::from_slice(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Cache snapshot unreadable; starting empty"
                );
                return cache;
            }
        };

        let total = snapshot.entries.len();
        let mut restored = 0usize;
        for mut entry in snapshot.entries {
            entry.recompute_size();
            match cache.put(entry) {
                Ok(_) => restored += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipped snapshot entry larger than the cache");
                }
            }
        }
        tracing::debug!(path = %path.display(), restored, total, "Loaded cache snapshot");
        cache
    }
}
