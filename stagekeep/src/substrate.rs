//! The substrate handle: scheduler, cache, checkpoints, and retry policy
//! bundled for explicit dependency injection.
//!
//! One substrate per project/session, passed by clone through the
//! pipeline. There is no global registry to reach for; everything a stage
//! needs travels in this handle, which keeps tests isolated and sessions
//! independent.

use crate::cache::WeightedCache;
use crate::checkpoint::{CheckpointBackend, CheckpointStore};
use crate::config::StagekeepConfig;
use crate::errors::{ClassifyFailure, StagekeepError};
use crate::retry::{with_retry, RetryError, RetryPolicy};
use crate::scheduler::{PhasePermit, PhaseScheduler};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Failure of a stage run through [`Substrate::run_stage`].
///
/// Slot trouble and operation trouble stay distinguishable so the
/// pipeline layer can phrase its own message; the retry error carries the
/// attempt count it needs.
#[derive(Debug, Error)]
pub enum StageError<E: fmt::Display> {
    /// The phase slot could not be acquired.
    #[error("{0}")]
    Slot(#[from] StagekeepError),
    /// The operation failed through every permitted attempt.
    #[error("{0}")]
    Operation(RetryError<E>),
}

/// Explicit bundle of the four substrate components.
///
/// Cloning is cheap; the scheduler, cache, and checkpoint store are
/// shared behind [`Arc`]s while the retry policy is copied per handle.
#[derive(Debug, Clone)]
pub struct Substrate {
    session_id: Uuid,
    scheduler: Arc<PhaseScheduler>,
    cache: Arc<WeightedCache>,
    checkpoints: Arc<CheckpointStore>,
    retry_policy: RetryPolicy,
    cache_snapshot_path: Option<PathBuf>,
}

impl Substrate {
    /// Starts building a substrate for `project`.
    #[must_use]
    pub fn builder(project: impl Into<String>) -> SubstrateBuilder {
        SubstrateBuilder {
            project: project.into(),
            config: StagekeepConfig::default(),
            checkpoint_backend: None,
        }
    }

    /// Opens a substrate for `project` from a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured phase set is invalid.
    pub async fn open(
        config: StagekeepConfig,
        project: impl Into<String>,
    ) -> Result<Self, StagekeepError> {
        Self::builder(project).with_config(config).build().await
    }

    /// This session's identifier, attached to substrate log events.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The phase scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &PhaseScheduler {
        &self.scheduler
    }

    /// The weighted cache.
    #[must_use]
    pub fn cache(&self) -> &WeightedCache {
        &self.cache
    }

    /// The checkpoint store.
    #[must_use]
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// The default retry policy applied by [`Self::run_stage`].
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Runs an operation inside a phase slot with the default retry
    /// policy: acquire, retry until success or exhaustion, release.
    ///
    /// The caller stores results and checkpoints afterwards as it sees
    /// fit; this method only moves the payload.
    ///
    /// # Errors
    ///
    /// [`StageError::Slot`] when the slot cannot be acquired,
    /// [`StageError::Operation`] when the operation fails terminally.
    pub async fn run_stage<T, E, F, Fut>(
        &self,
        phase: &str,
        operation: F,
    ) -> Result<T, StageError<E>>
    where
        E: ClassifyFailure + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.scheduler.acquire(phase).await?;
        self.run_held(permit, operation).await
    }

    /// Like [`Self::run_stage`], but gives up on the slot after
    /// `deadline`, surfacing a deadline error the caller can degrade on.
    ///
    /// # Errors
    ///
    /// [`StageError::Slot`] on deadline or misuse, [`StageError::Operation`]
    /// on terminal operation failure.
    pub async fn run_stage_with_deadline<T, E, F, Fut>(
        &self,
        phase: &str,
        deadline: Duration,
        operation: F,
    ) -> Result<T, StageError<E>>
    where
        E: ClassifyFailure + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.scheduler.acquire_with_deadline(phase, deadline).await?;
        self.run_held(permit, operation).await
    }

    /// Writes the cache snapshot if a snapshot path was configured.
    /// Returns whether anything was written.
    ///
    /// # Errors
    ///
    /// Propagates snapshot serialization and write failures.
    pub async fn persist_cache(&self) -> Result<bool, StagekeepError> {
        match &self.cache_snapshot_path {
            Some(path) => {
                self.cache.save_to(path).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn run_held<T, E, F, Fut>(
        &self,
        permit: PhasePermit,
        operation: F,
    ) -> Result<T, StageError<E>>
    where
        E: ClassifyFailure + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        tracing::debug!(
            session_id = %self.session_id,
            phase = permit.phase(),
            waited_ms = permit.waited().as_millis() as u64,
            "Stage slot acquired"
        );
        let result = with_retry(&self.retry_policy, operation).await;
        drop(permit);
        result.map_err(StageError::Operation)
    }
}

/// Builder for [`Substrate`].
pub struct SubstrateBuilder {
    project: String,
    config: StagekeepConfig,
    checkpoint_backend: Option<Arc<dyn CheckpointBackend>>,
}

impl SubstrateBuilder {
    /// Replaces the whole configuration.
    #[must_use]
    pub fn with_config(mut self, config: StagekeepConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the default retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Stores checkpoints in the given backend instead of the configured
    /// base directory.
    #[must_use]
    pub fn with_checkpoint_backend(mut self, backend: Arc<dyn CheckpointBackend>) -> Self {
        self.checkpoint_backend = Some(backend);
        self
    }

    /// Builds the substrate, loading any configured cache snapshot and the
    /// project's checkpoint manifest.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured phase set is invalid.
    pub async fn build(self) -> Result<Substrate, StagekeepError> {
        let scheduler = Arc::new(PhaseScheduler::new(self.config.scheduler.phases.clone())?);
        let cache = Arc::new(match &self.config.cache.snapshot_path {
            Some(path) => WeightedCache::load_from(path, self.config.cache.capacity_bytes).await,
            None => WeightedCache::new(self.config.cache.capacity_bytes),
        });
        let checkpoints = Arc::new(match self.checkpoint_backend {
            Some(backend) => {
                CheckpointStore::with_backend(
                    self.project.clone(),
                    self.config.checkpoint.integrity,
                    backend,
                )
                .await
            }
            None => {
                CheckpointStore::open_with_mode(
                    &self.config.checkpoint.base_dir,
                    self.project.clone(),
                    self.config.checkpoint.integrity,
                )
                .await
            }
        });

        let session_id = Uuid::now_v7();
        tracing::info!(
            session_id = %session_id,
            project = %self.project,
            resume_level = checkpoints.resume_level().await,
            "Opened substrate"
        );
        Ok(Substrate {
            session_id,
            scheduler,
            cache,
            checkpoints,
            retry_policy: self.config.retry,
            cache_snapshot_path: self.config.cache.snapshot_path,
        })
    }
}

impl fmt::Debug for SubstrateBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubstrateBuilder")
            .field("project", &self.project)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEntry, EntryKind};
    use crate::checkpoint::MemoryBackend;
    use crate::config::{CacheConfig, SchedulerConfig};
    use crate::errors::PhaseError;
    use crate::retry::JitterRange;
    use crate::scheduler::{CostTier, PhaseConfig};
    use crate::testing::{FlakyOperation, SimulatedFailure};
    use pretty_assertions::assert_eq;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(3)
            .with_base_delay_ms(1)
            .with_jitter(JitterRange::NONE)
    }

    async fn memory_substrate() -> Substrate {
        Substrate::builder("demo")
            .with_retry_policy(fast_retry())
            .with_checkpoint_backend(Arc::new(MemoryBackend::new()))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_stage_retries_then_succeeds() {
        let substrate = memory_substrate().await;
        let op = FlakyOperation::new(2);

        let result = substrate
            .run_stage("standard", || op.invoke())
            .await
            .unwrap();
        assert_eq!(result, 3);
        assert_eq!(op.calls(), 3);

        let stats = substrate.scheduler().stats();
        let standard = stats.phase("standard").unwrap();
        assert_eq!(standard.total_acquired, 1);
        assert_eq!(standard.active, 0);
    }

    #[tokio::test]
    async fn test_run_stage_unknown_phase() {
        let substrate = memory_substrate().await;
        let result: Result<usize, _> = substrate
            .run_stage("nonexistent", || async { Ok::<_, SimulatedFailure>(1) })
            .await;
        assert!(matches!(
            result,
            Err(StageError::Slot(StagekeepError::Phase(
                PhaseError::Unknown { .. }
            )))
        ));
    }

    #[tokio::test]
    async fn test_run_stage_surfaces_exhaustion_with_attempts() {
        let substrate = memory_substrate().await;
        let op = FlakyOperation::new(usize::MAX);

        let result = substrate.run_stage("light", || op.invoke()).await;
        match result {
            Err(StageError::Operation(RetryError::Exhausted { attempts, .. })) => {
                assert_eq!(attempts, 3);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(op.calls(), 3);
    }

    #[tokio::test]
    async fn test_run_stage_with_deadline_degrades() {
        let config = StagekeepConfig::new().with_scheduler(
            SchedulerConfig::new().with_phases([PhaseConfig::new("solo", 1, CostTier::Heavy)]),
        );
        let substrate = Substrate::builder("demo")
            .with_config(config)
            .with_checkpoint_backend(Arc::new(MemoryBackend::new()))
            .build()
            .await
            .unwrap();

        let held = substrate.scheduler().acquire("solo").await.unwrap();
        let result: Result<usize, _> = substrate
            .run_stage_with_deadline("solo", Duration::from_millis(20), || async {
                Ok::<_, SimulatedFailure>(1)
            })
            .await;
        assert!(matches!(
            result,
            Err(StageError::Slot(StagekeepError::Phase(
                PhaseError::DeadlineExceeded { .. }
            )))
        ));

        drop(held);
        let retried = substrate
            .run_stage_with_deadline("solo", Duration::from_millis(100), || async {
                Ok::<_, SimulatedFailure>(2)
            })
            .await
            .unwrap();
        assert_eq!(retried, 2);
    }

    #[tokio::test]
    async fn test_cache_snapshot_round_trip_between_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let config = StagekeepConfig::new().with_cache(
            CacheConfig::new()
                .with_capacity_bytes(4096)
                .with_snapshot_path(dir.path().join("cache.json")),
        );

        let first = Substrate::builder("demo")
            .with_config(config.clone())
            .with_checkpoint_backend(Arc::new(MemoryBackend::new()))
            .build()
            .await
            .unwrap();
        first
            .cache()
            .put(CacheEntry::new("payload", EntryKind::Definition).with_id("d1"))
            .unwrap();
        assert!(first.persist_cache().await.unwrap());

        let second = Substrate::builder("demo")
            .with_config(config)
            .with_checkpoint_backend(Arc::new(MemoryBackend::new()))
            .build()
            .await
            .unwrap();
        assert_eq!(second.cache().get("d1").unwrap().payload, "payload");
        assert_ne!(first.session_id(), second.session_id());
    }

    #[tokio::test]
    async fn test_persist_cache_without_path_is_a_no_op() {
        let substrate = memory_substrate().await;
        assert!(!substrate.persist_cache().await.unwrap());
    }
}
