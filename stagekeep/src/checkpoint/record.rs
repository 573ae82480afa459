//! Per-level checkpoint records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Validity of a checkpoint level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelStatus {
    /// Every artifact existed and was hashed when the level was saved.
    Valid,
    /// Some artifact path was missing at save time.
    Partial,
    /// Explicitly invalidated; only a fresh save restores validity.
    Invalid,
}

impl fmt::Display for LevelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::Partial => write!(f, "partial"),
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

/// Everything persisted for one pipeline milestone.
///
/// Owned by the checkpoint store; pipelines receive clones and mutate
/// nothing. `artifact_hashes` holds an entry per artifact that existed at
/// save time, keyed like `artifacts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// The 1-based milestone number.
    pub level: u32,
    /// When the level was saved.
    pub saved_at: DateTime<Utc>,
    /// Serialized stage state, opaque to the store.
    pub state: serde_json::Value,
    /// Artifact name to file path.
    #[serde(default)]
    pub artifacts: BTreeMap<String, PathBuf>,
    /// Artifact name to hex sha-256 of its content at save time.
    #[serde(default)]
    pub artifact_hashes: BTreeMap<String, String>,
    /// Validity of this level.
    pub status: LevelStatus,
}

impl CheckpointRecord {
    /// Creates a valid record with no artifacts.
    #[must_use]
    pub fn new(level: u32, state: serde_json::Value) -> Self {
        Self {
            level,
            saved_at: Utc::now(),
            state,
            artifacts: BTreeMap::new(),
            artifact_hashes: BTreeMap::new(),
            status: LevelStatus::Valid,
        }
    }

    /// Whether this level counts toward the resume point.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.status == LevelStatus::Valid
    }
}
