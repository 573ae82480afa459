//! The weighted, capacity-bounded cache.

use crate::cache::entry::{CacheEntry, EntryStatus};
use crate::errors::{CacheError, StagekeepError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug)]
struct StoredEntry {
    entry: CacheEntry,
    last_access: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, StoredEntry>,
    clock: u64,
    size_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    protected_evictions: u64,
}

impl CacheInner {
    fn pick_victim(&self, exclude: &str) -> Option<String> {
        let unprotected = self
            .entries
            .values()
            .filter(|s| s.entry.id != exclude && !s.entry.is_protected())
            .min_by_key(|s| s.last_access)
            .map(|s| s.entry.id.clone());
        if unprotected.is_some() {
            return unprotected;
        }
        // Last resort: give up the oldest protected entry rather than
        // reject new data. No hard guarantee protects a transcript under
        // sustained overload.
        self.entries
            .values()
            .filter(|s| s.entry.id != exclude)
            .min_by_key(|s| s.entry.created_at)
            .map(|s| s.entry.id.clone())
    }

    fn evict(&mut self, id: &str) {
        if let Some(stored) = self.entries.remove(id) {
            self.size_bytes = self.size_bytes.saturating_sub(stored.entry.size_bytes);
            self.evictions += 1;
            if stored.entry.is_protected() {
                self.protected_evictions += 1;
                tracing::warn!(
                    id = %stored.entry.id,
                    kind = %stored.entry.kind,
                    "Evicted protected entry under capacity pressure"
                );
            } else {
                tracing::debug!(
                    id = %stored.entry.id,
                    size_bytes = stored.entry.size_bytes,
                    "Evicted cache entry"
                );
            }
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries currently stored.
    pub entries: usize,
    /// Total size of stored entries in bytes.
    pub size_bytes: u64,
    /// Configured capacity in bytes.
    pub capacity_bytes: u64,
    /// Retrieval hits.
    pub hits: u64,
    /// Retrieval misses.
    pub misses: u64,
    /// Entries evicted to make room.
    pub evictions: u64,
    /// Evictions that had to take a protected entry.
    pub protected_evictions: u64,
    /// Entries with active status.
    pub active: usize,
    /// Entries with archived status.
    pub archived: usize,
    /// Entries with deprecated status.
    pub deprecated: usize,
}

impl CacheStats {
    /// Converts the stats to a JSON value.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Capacity-bounded key/value store with soft-delete statuses and LRU
/// eviction.
///
/// All operations take `&self`; one mutex guards the whole instance. These
/// operations are never the pipeline bottleneck (the generation calls are),
/// so coarse locking keeps the invariants simple. Construct one per
/// project/session and share it through the pipeline context.
#[derive(Debug)]
pub struct WeightedCache {
    capacity_bytes: u64,
    inner: Mutex<CacheInner>,
}

impl WeightedCache {
    /// Default capacity: 1 MiB.
    pub const DEFAULT_CAPACITY_BYTES: u64 = 1024 * 1024;

    /// Creates a cache bounded to `capacity_bytes`.
    #[must_use]
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Creates a cache with the default 1 MiB capacity.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(Self::DEFAULT_CAPACITY_BYTES)
    }

    /// Stores an entry, evicting least-recently-used entries as needed.
    ///
    /// Replaces any existing entry with the same id. Eviction skips
    /// protected entries until nothing else remains, then takes the oldest
    /// protected entry. After every put, total size is within capacity.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Saturated`] when the entry alone is larger
    /// than the whole cache; eviction cannot help there.
    pub fn put(&self, entry: CacheEntry) -> Result<CacheEntry, StagekeepError> {
        if entry.size_bytes > self.capacity_bytes {
            return Err(CacheError::saturated(entry.size_bytes, self.capacity_bytes).into());
        }

        let inner = &mut *self.inner.lock();
        let replaced = inner
            .entries
            .get(&entry.id)
            .map_or(0, |s| s.entry.size_bytes);

        while inner.size_bytes.saturating_sub(replaced) + entry.size_bytes > self.capacity_bytes {
            match inner.pick_victim(&entry.id) {
                Some(victim) => inner.evict(&victim),
                None => break,
            }
        }

        if let Some(old) = inner.entries.remove(&entry.id) {
            inner.size_bytes = inner.size_bytes.saturating_sub(old.entry.size_bytes);
        }
        inner.clock += 1;
        inner.size_bytes += entry.size_bytes;
        inner.entries.insert(
            entry.id.clone(),
            StoredEntry {
                entry: entry.clone(),
                last_access: inner.clock,
            },
        );
        tracing::debug!(
            id = %entry.id,
            kind = %entry.kind,
            size_bytes = entry.size_bytes,
            "Cached entry"
        );
        Ok(entry)
    }

    /// Retrieves an entry and marks it recently used.
    ///
    /// Deprecated entries are treated as misses; see [`Self::get_any`].
    #[must_use]
    pub fn get(&self, id: &str) -> Option<CacheEntry> {
        let inner = &mut *self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        let result = match inner.entries.get_mut(id) {
            Some(stored) if stored.entry.is_retrievable() => {
                stored.last_access = clock;
                Some(stored.entry.clone())
            }
            _ => None,
        };
        if result.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        result
    }

    /// Retrieves an entry regardless of status, for audit paths.
    ///
    /// Does not touch recency order or hit counters.
    #[must_use]
    pub fn get_any(&self, id: &str) -> Option<CacheEntry> {
        self.inner.lock().entries.get(id).map(|s| s.entry.clone())
    }

    /// Marks an entry archived. Idempotent; returns false for unknown ids.
    pub fn archive(&self, id: &str) -> bool {
        self.set_status(id, EntryStatus::Archived)
    }

    /// Marks an entry deprecated. Idempotent; returns false for unknown ids.
    pub fn deprecate(&self, id: &str) -> bool {
        self.set_status(id, EntryStatus::Deprecated)
    }

    /// Restores an entry to active. Idempotent; returns false for unknown
    /// ids.
    pub fn restore(&self, id: &str) -> bool {
        self.set_status(id, EntryStatus::Active)
    }

    /// Removes an entry outright, returning it.
    pub fn remove(&self, id: &str) -> Option<CacheEntry> {
        let inner = &mut *self.inner.lock();
        let stored = inner.entries.remove(id)?;
        inner.size_bytes = inner.size_bytes.saturating_sub(stored.entry.size_bytes);
        Some(stored.entry)
    }

    /// Clears every entry, returning how many were removed.
    pub fn flush(&self) -> usize {
        let inner = &mut *self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.size_bytes = 0;
        tracing::debug!(count, "Flushed cache");
        count
    }

    /// Returns active entries, best retrieval rank first.
    #[must_use]
    pub fn get_active(&self) -> Vec<CacheEntry> {
        self.entries_with_status(EntryStatus::Active)
    }

    /// Returns archived entries, best retrieval rank first.
    #[must_use]
    pub fn get_archived(&self) -> Vec<CacheEntry> {
        self.entries_with_status(EntryStatus::Archived)
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Total stored size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.inner.lock().size_bytes
    }

    /// Configured capacity in bytes.
    #[must_use]
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Returns a snapshot of the cache counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let mut active = 0;
        let mut archived = 0;
        let mut deprecated = 0;
        for stored in inner.entries.values() {
            match stored.entry.status {
                EntryStatus::Active => active += 1,
                EntryStatus::Archived => archived += 1,
                EntryStatus::Deprecated => deprecated += 1,
            }
        }
        CacheStats {
            entries: inner.entries.len(),
            size_bytes: inner.size_bytes,
            capacity_bytes: self.capacity_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            protected_evictions: inner.protected_evictions,
            active,
            archived,
            deprecated,
        }
    }

    /// Entries ordered least-recently-used first, for persistence.
    pub(crate) fn entries_by_recency(&self) -> Vec<CacheEntry> {
        let inner = self.inner.lock();
        let mut stored: Vec<(u64, CacheEntry)> = inner
            .entries
            .values()
            .map(|s| (s.last_access, s.entry.clone()))
            .collect();
        stored.sort_by_key(|(stamp, _)| *stamp);
        stored.into_iter().map(|(_, entry)| entry).collect()
    }

    fn set_status(&self, id: &str, status: EntryStatus) -> bool {
        let inner = &mut *self.inner.lock();
        match inner.entries.get_mut(id) {
            Some(stored) => {
                stored.entry.set_status(status);
                true
            }
            None => false,
        }
    }

    fn entries_with_status(&self, status: EntryStatus) -> Vec<CacheEntry> {
        let inner = self.inner.lock();
        let mut entries: Vec<CacheEntry> = inner
            .entries
            .values()
            .filter(|s| s.entry.status == status)
            .map(|s| s.entry.clone())
            .collect();
        entries.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        entries
    }
}

impl Default for WeightedCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
