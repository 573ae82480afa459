//! Cache entry types: lifecycle status, kind tags, and the entry record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// Soft-delete lifecycle status of a cache entry.
///
/// Status changes are in-place and never move or resize the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Normal entry, returned by default retrieval.
    #[default]
    Active,
    /// Deprioritized but still retrievable.
    Archived,
    /// Excluded from default retrieval, retained for audit.
    Deprecated,
}

impl EntryStatus {
    /// The canonical weight for this status, kept for the serialized form:
    /// active 1.0, archived -0.5, deprecated -1.0.
    #[must_use]
    pub fn canonical_weight(&self) -> f64 {
        match self {
            Self::Active => 1.0,
            Self::Archived => -0.5,
            Self::Deprecated => -1.0,
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Deprecated => "deprecated",
        };
        write!(f, "{s}")
    }
}

/// What an entry's payload represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Error transcript from a failed generation call.
    Transcript,
    /// Term or concept definition.
    Definition,
    /// Concept that was retired from the active set.
    ArchivedConcept,
    /// Reusable generation result (API response payload).
    GenerationResult,
}

impl EntryKind {
    /// Whether entries of this kind resist eviction.
    ///
    /// Transcripts record what went wrong during expensive calls and are the
    /// last thing to drop under capacity pressure.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        matches!(self, Self::Transcript)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transcript => "transcript",
            Self::Definition => "definition",
            Self::ArchivedConcept => "archived_concept",
            Self::GenerationResult => "generation_result",
        };
        write!(f, "{s}")
    }
}

/// Derives a stable id from payload content.
#[must_use]
pub fn content_id(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    let result = hasher.finalize();
    format!("entry:{}", hex::encode(&result[..16]))
}

/// One cached artifact.
///
/// Payloads are UTF-8 text (API responses, transcripts, definitions); large
/// binary artifacts belong on disk behind the checkpoint store. Size is
/// fixed at construction from payload and metadata byte length and does not
/// change on status flips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Content-derived or caller-supplied id.
    pub id: String,
    /// What the payload represents.
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// The cached payload.
    pub payload: String,
    /// Lifecycle status.
    #[serde(default)]
    pub status: EntryStatus,
    /// Retrieval priority for tie ranking; defaults from the status weight.
    #[serde(default = "default_priority")]
    pub priority: f64,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
    /// Entry footprint in bytes.
    pub size_bytes: u64,
    /// Caller metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_priority() -> f64 {
    EntryStatus::Active.canonical_weight()
}

impl CacheEntry {
    /// Creates a new active entry with a content-derived id.
    #[must_use]
    pub fn new(payload: impl Into<String>, kind: EntryKind) -> Self {
        let payload = payload.into();
        let mut entry = Self {
            id: content_id(&payload),
            kind,
            payload,
            status: EntryStatus::Active,
            priority: EntryStatus::Active.canonical_weight(),
            created_at: Utc::now(),
            size_bytes: 0,
            metadata: HashMap::new(),
        };
        entry.recompute_size();
        entry
    }

    /// Replaces the content-derived id with a caller-supplied one.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the lifecycle status, resetting priority to its weight.
    #[must_use]
    pub fn with_status(mut self, status: EntryStatus) -> Self {
        self.set_status(status);
        self
    }

    /// Overrides the retrieval priority.
    #[must_use]
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self.recompute_size();
        self
    }

    /// Replaces the metadata map.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self.recompute_size();
        self
    }

    /// Whether default retrieval returns this entry.
    #[must_use]
    pub fn is_retrievable(&self) -> bool {
        self.status != EntryStatus::Deprecated
    }

    /// Whether this entry resists eviction.
    ///
    /// Only entries that are both of a protected kind and still active do;
    /// archiving or deprecating a transcript makes it ordinary again.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.kind.is_protected() && self.status == EntryStatus::Active
    }

    /// The canonical weight of the current status.
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.status.canonical_weight()
    }

    pub(crate) fn set_status(&mut self, status: EntryStatus) {
        self.status = status;
        self.priority = status.canonical_weight();
    }

    // Size is derived from payload and metadata, never taken from the
    // caller or from disk; empty metadata costs nothing.
    pub(crate) fn recompute_size(&mut self) {
        let metadata_len = if self.metadata.is_empty() {
            0
        } else {
            serde_json::to_string(&self.metadata)
                .unwrap_or_default()
                .len()
        };
        self.size_bytes = (self.payload.len() + metadata_len) as u64;
    }
}
