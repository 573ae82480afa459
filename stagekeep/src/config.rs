//! Configuration types for the substrate.

use crate::checkpoint::IntegrityMode;
use crate::retry::RetryPolicy;
use crate::scheduler::PhaseConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the weighted cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Capacity in bytes.
    #[serde(default = "default_cache_capacity")]
    pub capacity_bytes: u64,
    /// Where the cache snapshot is persisted, if anywhere.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

fn default_cache_capacity() -> u64 {
    1024 * 1024 // 1 MiB
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: default_cache_capacity(),
            snapshot_path: None,
        }
    }
}

impl CacheConfig {
    /// Creates a new cache configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the capacity in bytes.
    #[must_use]
    pub fn with_capacity_bytes(mut self, capacity_bytes: u64) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }

    /// Sets the snapshot path.
    #[must_use]
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }
}

/// Configuration for the phase scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// The phases registered at startup.
    #[serde(default = "default_phases")]
    pub phases: Vec<PhaseConfig>,
}

fn default_phases() -> Vec<PhaseConfig> {
    PhaseConfig::default_set()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            phases: default_phases(),
        }
    }
}

impl SchedulerConfig {
    /// Creates a new scheduler configuration with the default phase set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a phase.
    #[must_use]
    pub fn with_phase(mut self, phase: PhaseConfig) -> Self {
        self.phases.push(phase);
        self
    }

    /// Replaces the phase set.
    #[must_use]
    pub fn with_phases(mut self, phases: impl IntoIterator<Item = PhaseConfig>) -> Self {
        self.phases = phases.into_iter().collect();
        self
    }
}

/// Configuration for the checkpoint store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding one subdirectory per project.
    #[serde(default = "default_checkpoint_dir")]
    pub base_dir: PathBuf,
    /// How strictly artifact hashes are verified.
    #[serde(default)]
    pub integrity: IntegrityMode,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".stagekeep/checkpoints")
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            base_dir: default_checkpoint_dir(),
            integrity: IntegrityMode::default(),
        }
    }
}

impl CheckpointConfig {
    /// Creates a new checkpoint configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base directory.
    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Sets the integrity mode.
    #[must_use]
    pub fn with_integrity(mut self, integrity: IntegrityMode) -> Self {
        self.integrity = integrity;
        self
    }
}

/// Combined configuration for a substrate instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagekeepConfig {
    /// Cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Checkpoint settings.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// Default retry policy applied by `run_stage`.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for StagekeepConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            scheduler: SchedulerConfig::default(),
            checkpoint: CheckpointConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl StagekeepConfig {
    /// Creates a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache configuration.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the scheduler configuration.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Sets the checkpoint configuration.
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: CheckpointConfig) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// Sets the default retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::CostTier;

    #[test]
    fn test_defaults() {
        let config = StagekeepConfig::default();
        assert_eq!(config.cache.capacity_bytes, 1024 * 1024);
        assert!(config.cache.snapshot_path.is_none());
        assert_eq!(config.checkpoint.base_dir, PathBuf::from(".stagekeep/checkpoints"));
        assert_eq!(config.checkpoint.integrity, IntegrityMode::Lenient);
        assert_eq!(config.scheduler.phases.len(), 4);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_builders() {
        let config = StagekeepConfig::new()
            .with_cache(
                CacheConfig::new()
                    .with_capacity_bytes(2048)
                    .with_snapshot_path("/tmp/cache.json"),
            )
            .with_checkpoint(
                CheckpointConfig::new()
                    .with_base_dir("/tmp/ckpt")
                    .with_integrity(IntegrityMode::Strict),
            )
            .with_scheduler(
                SchedulerConfig::new().with_phase(PhaseConfig::new("video", 1, CostTier::Heavy)),
            )
            .with_retry(RetryPolicy::default().with_max_attempts(5));

        assert_eq!(config.cache.capacity_bytes, 2048);
        assert_eq!(
            config.cache.snapshot_path,
            Some(PathBuf::from("/tmp/cache.json"))
        );
        assert_eq!(config.checkpoint.integrity, IntegrityMode::Strict);
        assert_eq!(config.scheduler.phases.len(), 5);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: StagekeepConfig =
            serde_json::from_str(r#"{ "cache": { "capacity_bytes": 4096 } }"#).unwrap();
        assert_eq!(config.cache.capacity_bytes, 4096);
        assert_eq!(config.scheduler.phases.len(), 4);
        assert_eq!(config.checkpoint.integrity, IntegrityMode::Lenient);

        let empty: StagekeepConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.cache.capacity_bytes, 1024 * 1024);
    }

    #[test]
    fn test_round_trip() {
        let config = StagekeepConfig::new()
            .with_checkpoint(CheckpointConfig::new().with_integrity(IntegrityMode::Strict));
        let json = serde_json::to_string(&config).unwrap();
        let back: StagekeepConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.checkpoint.integrity, IntegrityMode::Strict);
        assert_eq!(back.scheduler.phases.len(), config.scheduler.phases.len());
    }
}
