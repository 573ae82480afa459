//! Error types for the stagekeep substrate.
//!
//! The taxonomy separates transient faults (worth retrying), resource
//! exhaustion (report and back off), integrity misses (degrade to a cache
//! miss), and corruption (recover by reinitializing). Programming errors
//! such as referencing an unregistered phase propagate immediately.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The main error type for stagekeep operations.
#[derive(Debug, Error)]
pub enum StagekeepError {
    /// A phase scheduling error occurred.
    #[error("{0}")]
    Phase(#[from] PhaseError),

    /// A cache capacity error occurred.
    #[error("{0}")]
    Cache(#[from] CacheError),

    /// A checkpoint integrity error occurred.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to phase slot acquisition.
#[derive(Debug, Clone, Error)]
pub enum PhaseError {
    /// The phase was never registered with the scheduler.
    #[error("Unknown phase: {phase}")]
    Unknown {
        /// The phase name.
        phase: String,
    },

    /// The phase configuration is unusable.
    #[error("Invalid phase '{phase}': {reason}")]
    Invalid {
        /// The phase name.
        phase: String,
        /// The reason the configuration was rejected.
        reason: String,
    },

    /// No slot became available before the deadline.
    #[error("No slot available for phase '{phase}' after {waited_ms}ms")]
    DeadlineExceeded {
        /// The phase name.
        phase: String,
        /// How long the caller waited, in milliseconds.
        waited_ms: u64,
    },
}

impl PhaseError {
    /// Creates an unknown phase error.
    #[must_use]
    pub fn unknown(phase: impl Into<String>) -> Self {
        Self::Unknown { phase: phase.into() }
    }

    /// Creates an invalid phase error.
    #[must_use]
    pub fn invalid(phase: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            phase: phase.into(),
            reason: reason.into(),
        }
    }

    /// Creates a deadline exceeded error.
    #[must_use]
    pub fn deadline_exceeded(phase: impl Into<String>, waited_ms: u64) -> Self {
        Self::DeadlineExceeded {
            phase: phase.into(),
            waited_ms,
        }
    }
}

/// Errors related to cache capacity.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The entry is larger than the whole cache; eviction cannot help.
    #[error("Entry of {needed_bytes} bytes exceeds cache capacity of {capacity_bytes} bytes")]
    Saturated {
        /// Bytes the rejected entry would occupy.
        needed_bytes: u64,
        /// Total configured capacity in bytes.
        capacity_bytes: u64,
    },
}

impl CacheError {
    /// Creates a saturated cache error.
    #[must_use]
    pub fn saturated(needed_bytes: u64, capacity_bytes: u64) -> Self {
        Self::Saturated {
            needed_bytes,
            capacity_bytes,
        }
    }
}

/// Errors related to checkpoint integrity.
#[derive(Debug, Clone, Error)]
pub enum CheckpointError {
    /// An artifact failed hash verification under strict integrity mode.
    #[error("Integrity failure for level {level} of '{project}': {detail}")]
    Integrity {
        /// The project name.
        project: String,
        /// The checkpoint level.
        level: u32,
        /// What failed verification.
        detail: String,
    },
    /// A caller passed a level outside the valid 1-based range.
    #[error("Checkpoint level {level} is out of range; levels start at 1")]
    InvalidLevel {
        /// The rejected level.
        level: u32,
    },
}

impl CheckpointError {
    /// Creates an integrity error.
    #[must_use]
    pub fn integrity(project: impl Into<String>, level: u32, detail: impl Into<String>) -> Self {
        Self::Integrity {
            project: project.into(),
            level,
            detail: detail.into(),
        }
    }

    /// Creates an out-of-range level error.
    #[must_use]
    pub fn invalid_level(level: u32) -> Self {
        Self::InvalidLevel { level }
    }
}

/// Coarse classification of a failure, used to decide retry eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network-level failure (connection reset, DNS, unreachable host).
    Network,
    /// The operation timed out.
    Timeout,
    /// The upstream service asked us to slow down.
    RateLimited,
    /// A bounded resource (slots, capacity) is exhausted.
    ResourceExhausted,
    /// Stored data is missing or stale; treat as a miss.
    Integrity,
    /// Stored data is unreadable; recover by starting fresh.
    Corruption,
    /// Caller misuse; propagate, never retry.
    Invariant,
}

impl FailureKind {
    /// Returns true for kinds that a retry is likely to cure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::RateLimited)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Integrity => "integrity",
            Self::Corruption => "corruption",
            Self::Invariant => "invariant",
        };
        write!(f, "{s}")
    }
}

/// Maps an error to a [`FailureKind`] so the retry loop can decide whether
/// another attempt is worthwhile.
///
/// Pipeline layers implement this for their own error types; the substrate's
/// own errors classify themselves.
pub trait ClassifyFailure {
    /// Returns the failure kind of this error.
    fn failure_kind(&self) -> FailureKind;
}

impl ClassifyFailure for StagekeepError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Phase(PhaseError::DeadlineExceeded { .. }) => FailureKind::ResourceExhausted,
            Self::Phase(_) => FailureKind::Invariant,
            Self::Cache(CacheError::Saturated { .. }) => FailureKind::ResourceExhausted,
            Self::Checkpoint(CheckpointError::Integrity { .. }) => FailureKind::Integrity,
            Self::Checkpoint(CheckpointError::InvalidLevel { .. }) => FailureKind::Invariant,
            Self::Serialization(_) => FailureKind::Corruption,
            Self::Io(_) => FailureKind::Corruption,
        }
    }
}
