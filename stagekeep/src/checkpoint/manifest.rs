//! The per-project checkpoint index.

use crate::checkpoint::record::{CheckpointRecord, LevelStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Index of every checkpoint level saved for one project.
///
/// Pure in-memory state; the store serializes it after every mutation.
/// `completed` lists levels in ascending order and only contains levels
/// whose records are not invalidated. `current_level` is the highest level
/// ever reached that is still completed, which is not the same thing as
/// [`Self::resume_level`]: resuming additionally requires every lower
/// level to be valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    /// The project this manifest indexes.
    pub project: String,
    /// When the first checkpoint was saved.
    pub created_at: DateTime<Utc>,
    /// When the manifest last changed.
    pub updated_at: DateTime<Utc>,
    /// Completed levels, ascending.
    #[serde(default)]
    pub completed: Vec<u32>,
    /// Highest completed level, 0 when none.
    #[serde(default)]
    pub current_level: u32,
    /// Saved records keyed by level.
    #[serde(default)]
    pub records: BTreeMap<u32, CheckpointRecord>,
}

impl CheckpointManifest {
    /// Creates an empty manifest for `project`.
    #[must_use]
    pub fn new(project: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            project: project.into(),
            created_at: now,
            updated_at: now,
            completed: Vec::new(),
            current_level: 0,
            records: BTreeMap::new(),
        }
    }

    /// Inserts or replaces the record for its level.
    ///
    /// Re-saving an invalidated level restores it to the completed list
    /// with whatever status the fresh record carries.
    pub fn upsert(&mut self, record: CheckpointRecord) {
        let level = record.level;
        self.records.insert(level, record);
        if let Err(pos) = self.completed.binary_search(&level) {
            self.completed.insert(pos, level);
        }
        self.current_level = self.current_level.max(level);
        self.updated_at = Utc::now();
    }

    /// Invalidates `level` and everything above it.
    ///
    /// Later levels depend on earlier ones, so the cascade always runs to
    /// the top. Returns the levels whose status actually changed.
    pub fn invalidate_from(&mut self, level: u32) -> Vec<u32> {
        let affected: Vec<u32> = self
            .records
            .range(level..)
            .filter(|(_, record)| record.status != LevelStatus::Invalid)
            .map(|(l, _)| *l)
            .collect();
        for l in &affected {
            if let Some(record) = self.records.get_mut(l) {
                record.status = LevelStatus::Invalid;
            }
        }
        self.completed.retain(|l| *l < level);
        self.current_level = self.completed.last().copied().unwrap_or(0);
        if !affected.is_empty() {
            self.updated_at = Utc::now();
        }
        affected
    }

    /// Highest level L such that levels 1 through L are all valid.
    ///
    /// Returns 0 when the pipeline must start from scratch. A valid level
    /// above a gap or above a partial level does not count.
    #[must_use]
    pub fn resume_level(&self) -> u32 {
        let mut level = 0;
        while let Some(record) = self.records.get(&(level + 1)) {
            if record.is_valid() {
                level += 1;
            } else {
                break;
            }
        }
        level
    }

    /// The record for a level, if one was ever saved.
    #[must_use]
    pub fn record(&self, level: u32) -> Option<&CheckpointRecord> {
        self.records.get(&level)
    }

    /// Whether any level has been saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(level: u32) -> CheckpointRecord {
        CheckpointRecord::new(level, serde_json::json!({ "level": level }))
    }

    #[test]
    fn test_upsert_keeps_completed_sorted_and_deduped() {
        let mut manifest = CheckpointManifest::new("demo");
        manifest.upsert(record(2));
        manifest.upsert(record(1));
        manifest.upsert(record(2));

        assert_eq!(manifest.completed, vec![1, 2]);
        assert_eq!(manifest.current_level, 2);
    }

    #[test]
    fn test_invalidate_cascades_to_the_top() {
        let mut manifest = CheckpointManifest::new("demo");
        for level in 1..=3 {
            manifest.upsert(record(level));
        }

        let affected = manifest.invalidate_from(2);
        assert_eq!(affected, vec![2, 3]);
        assert_eq!(manifest.completed, vec![1]);
        assert_eq!(manifest.current_level, 1);
        assert_eq!(manifest.record(2).unwrap().status, LevelStatus::Invalid);
        assert_eq!(manifest.record(3).unwrap().status, LevelStatus::Invalid);
        assert!(manifest.record(1).unwrap().is_valid());
        assert_eq!(manifest.resume_level(), 1);

        // Already-invalid levels are not re-reported
        assert!(manifest.invalidate_from(2).is_empty());
    }

    #[test]
    fn test_resume_stops_at_gaps_and_partials() {
        let mut manifest = CheckpointManifest::new("demo");
        assert_eq!(manifest.resume_level(), 0);

        manifest.upsert(record(1));
        manifest.upsert(record(3));
        assert_eq!(manifest.resume_level(), 1);

        let mut partial = record(2);
        partial.status = LevelStatus::Partial;
        manifest.upsert(partial);
        assert_eq!(manifest.resume_level(), 1);

        manifest.upsert(record(2));
        assert_eq!(manifest.resume_level(), 3);
    }

    #[test]
    fn test_resave_restores_invalidated_level() {
        let mut manifest = CheckpointManifest::new("demo");
        manifest.upsert(record(1));
        manifest.upsert(record(2));
        manifest.invalidate_from(1);
        assert_eq!(manifest.resume_level(), 0);
        assert_eq!(manifest.current_level, 0);

        manifest.upsert(record(1));
        assert_eq!(manifest.completed, vec![1]);
        assert_eq!(manifest.resume_level(), 1);
        assert_eq!(manifest.current_level, 1);
    }
}
