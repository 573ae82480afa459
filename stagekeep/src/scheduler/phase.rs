//! Phase configuration, cost tiers, and per-phase statistics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Cost tier label for a phase.
///
/// Tiers describe how expensive one call in the phase is; cheaper tiers get
/// more concurrent slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    /// Cheap, high-volume calls (e.g. consensus voting rounds).
    Light,
    /// Mid-cost calls.
    #[default]
    Standard,
    /// Expensive long-running calls.
    Heavy,
    /// Rate-limited external image generation.
    Image,
}

impl fmt::Display for CostTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Light => "light",
            Self::Standard => "standard",
            Self::Heavy => "heavy",
            Self::Image => "image",
        };
        write!(f, "{s}")
    }
}

/// Configuration for one phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// The phase name.
    pub name: String,
    /// Maximum concurrent slots.
    pub max_concurrent: usize,
    /// Cost tier label.
    #[serde(default)]
    pub cost_tier: CostTier,
}

impl PhaseConfig {
    /// Creates a new phase configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, max_concurrent: usize, cost_tier: CostTier) -> Self {
        Self {
            name: name.into(),
            max_concurrent,
            cost_tier,
        }
    }

    /// The default phase set, one per cost tier.
    ///
    /// Callers pick a phase per operation's cost: light 8, standard 4,
    /// heavy 2, image 2.
    #[must_use]
    pub fn default_set() -> Vec<Self> {
        vec![
            Self::new("light", 8, CostTier::Light),
            Self::new("standard", 4, CostTier::Standard),
            Self::new("heavy", 2, CostTier::Heavy),
            Self::new("image", 2, CostTier::Image),
        ]
    }
}

/// Counters for one phase's slot traffic.
#[derive(Debug, Default)]
pub struct PhaseMetrics {
    /// Permits currently held.
    active: AtomicU64,
    /// Permits granted since construction.
    total_acquired: AtomicU64,
    /// Cumulative time spent waiting for a slot.
    total_wait_ms: AtomicU64,
    /// Longest single wait.
    max_wait_ms: AtomicU64,
    /// Acquisitions that gave up at their deadline.
    deadline_misses: AtomicU64,
}

impl PhaseMetrics {
    /// Records a granted permit and the time spent waiting for it.
    pub fn record_acquire(&self, waited: Duration) {
        let waited_ms = waited.as_millis() as u64;
        self.active.fetch_add(1, Ordering::Relaxed);
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
        self.total_wait_ms.fetch_add(waited_ms, Ordering::Relaxed);
        self.max_wait_ms.fetch_max(waited_ms, Ordering::Relaxed);
    }

    /// Records a released permit.
    pub fn record_release(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Records an acquisition that exceeded its deadline.
    pub fn record_deadline_miss(&self) {
        self.deadline_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of permits currently held.
    #[must_use]
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Returns the number of permits granted so far.
    #[must_use]
    pub fn total_acquired(&self) -> u64 {
        self.total_acquired.load(Ordering::Relaxed)
    }

    /// Returns the cumulative wait time in milliseconds.
    #[must_use]
    pub fn total_wait_ms(&self) -> u64 {
        self.total_wait_ms.load(Ordering::Relaxed)
    }

    /// Returns the longest single wait in milliseconds.
    #[must_use]
    pub fn max_wait_ms(&self) -> u64 {
        self.max_wait_ms.load(Ordering::Relaxed)
    }

    /// Returns the number of deadline misses.
    #[must_use]
    pub fn deadline_misses(&self) -> u64 {
        self.deadline_misses.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of one phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    /// The phase name.
    pub phase: String,
    /// Cost tier label.
    pub cost_tier: CostTier,
    /// Configured slot limit.
    pub limit: usize,
    /// Permits currently held.
    pub active: u64,
    /// Permits granted since construction.
    pub total_acquired: u64,
    /// Cumulative wait time in milliseconds.
    pub total_wait_ms: u64,
    /// Longest single wait in milliseconds.
    pub max_wait_ms: u64,
    /// Acquisitions that gave up at their deadline.
    pub deadline_misses: u64,
}

/// Statistics across all registered phases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// One snapshot per phase, sorted by phase name.
    pub phases: Vec<PhaseSnapshot>,
}

impl SchedulerStats {
    /// Looks up the snapshot for a phase.
    #[must_use]
    pub fn phase(&self, name: &str) -> Option<&PhaseSnapshot> {
        self.phases.iter().find(|p| p.phase == name)
    }

    /// Converts the stats to a JSON value.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}
