//! The phase scheduler: named concurrency buckets backed by semaphores.

use crate::errors::{PhaseError, StagekeepError};
use crate::scheduler::permit::PhasePermit;
use crate::scheduler::phase::{PhaseConfig, PhaseMetrics, PhaseSnapshot, SchedulerStats};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[derive(Debug)]
struct PhaseState {
    config: PhaseConfig,
    semaphore: Option<Arc<Semaphore>>,
    metrics: Arc<PhaseMetrics>,
}

/// Bounds how many calls of each phase may run simultaneously.
///
/// One semaphore per registered phase, built on first acquisition and kept
/// for the scheduler's lifetime. The scheduler runs nothing itself; it only
/// gates how many callers are in flight. Construct one per project/session
/// and share it by reference through the pipeline context.
#[derive(Debug)]
pub struct PhaseScheduler {
    phases: DashMap<String, PhaseState>,
}

impl PhaseScheduler {
    /// Creates a scheduler from the given phase configurations.
    ///
    /// # Errors
    ///
    /// Returns an error if any phase has an empty name or a zero slot limit.
    pub fn new(
        configs: impl IntoIterator<Item = PhaseConfig>,
    ) -> Result<Self, StagekeepError> {
        let scheduler = Self {
            phases: DashMap::new(),
        };
        for config in configs {
            scheduler.register_phase(config)?;
        }
        Ok(scheduler)
    }

    /// Creates a scheduler with the default cost-tier phases.
    #[must_use]
    pub fn with_defaults() -> Self {
        let scheduler = Self {
            phases: DashMap::new(),
        };
        for config in PhaseConfig::default_set() {
            scheduler.insert_phase(config);
        }
        scheduler
    }

    /// Registers an additional phase.
    ///
    /// Replaces any existing phase with the same name, discarding its
    /// semaphore and counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the limit is zero.
    pub fn register_phase(&self, config: PhaseConfig) -> Result<(), StagekeepError> {
        if config.name.is_empty() {
            return Err(PhaseError::invalid("", "phase name must not be empty").into());
        }
        if config.max_concurrent == 0 {
            return Err(PhaseError::invalid(&config.name, "limit must be at least 1").into());
        }
        self.insert_phase(config);
        Ok(())
    }

    fn insert_phase(&self, config: PhaseConfig) {
        self.phases.insert(
            config.name.clone(),
            PhaseState {
                config,
                semaphore: None,
                metrics: Arc::new(PhaseMetrics::default()),
            },
        );
    }

    /// Whether a phase is registered.
    #[must_use]
    pub fn contains_phase(&self, phase: &str) -> bool {
        self.phases.contains_key(phase)
    }

    /// Acquires a slot for the phase, suspending until one is free.
    ///
    /// Dropping the returned future while it is still waiting leaves no
    /// slot held.
    ///
    /// # Errors
    ///
    /// Returns an error if the phase was never registered.
    pub async fn acquire(&self, phase: &str) -> Result<PhasePermit, StagekeepError> {
        let (semaphore, metrics) = self.slot_source(phase)?;
        let start = Instant::now();
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| PhaseError::invalid(phase, "semaphore closed"))?;
        let waited = start.elapsed();
        metrics.record_acquire(waited);
        tracing::trace!(
            phase,
            waited_ms = waited.as_millis() as u64,
            "Acquired phase slot"
        );
        Ok(PhasePermit::new(phase.to_string(), waited, metrics, permit))
    }

    /// Acquires a slot, giving up once the deadline elapses.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::DeadlineExceeded`] if no slot was granted in
    /// time, so callers can degrade instead of hanging.
    pub async fn acquire_with_deadline(
        &self,
        phase: &str,
        deadline: Duration,
    ) -> Result<PhasePermit, StagekeepError> {
        let (semaphore, metrics) = self.slot_source(phase)?;
        let start = Instant::now();
        match tokio::time::timeout(deadline, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => {
                let waited = start.elapsed();
                metrics.record_acquire(waited);
                Ok(PhasePermit::new(phase.to_string(), waited, metrics, permit))
            }
            Ok(Err(_)) => Err(PhaseError::invalid(phase, "semaphore closed").into()),
            Err(_) => {
                metrics.record_deadline_miss();
                let waited_ms = start.elapsed().as_millis() as u64;
                tracing::warn!(phase, waited_ms, "Phase slot deadline exceeded");
                Err(PhaseError::deadline_exceeded(phase, waited_ms).into())
            }
        }
    }

    /// Runs the operation inside a phase slot, releasing it afterward on
    /// every exit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the phase was never registered.
    pub async fn with_phase<T, F, Fut>(&self, phase: &str, operation: F) -> Result<T, StagekeepError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let _permit = self.acquire(phase).await?;
        Ok(operation().await)
    }

    /// Replaces the slot limit for a phase.
    ///
    /// The old semaphore is discarded and a new one is built on the next
    /// acquisition. Permits already held release into the discarded
    /// semaphore and no longer count against the new limit, so this is only
    /// safe to call between batches, not mid-flight.
    ///
    /// # Errors
    ///
    /// Returns an error for an unregistered phase or a zero limit.
    pub fn set_limit(&self, phase: &str, max_concurrent: usize) -> Result<(), StagekeepError> {
        if max_concurrent == 0 {
            return Err(PhaseError::invalid(phase, "limit must be at least 1").into());
        }
        let mut state = self
            .phases
            .get_mut(phase)
            .ok_or_else(|| PhaseError::unknown(phase))?;
        state.config.max_concurrent = max_concurrent;
        state.semaphore = None;
        tracing::info!(phase, limit = max_concurrent, "Phase limit reconfigured");
        Ok(())
    }

    /// Returns the number of permits currently held for a phase, or `None`
    /// if the phase is not registered.
    #[must_use]
    pub fn active_count(&self, phase: &str) -> Option<usize> {
        self.phases
            .get(phase)
            .map(|state| state.metrics.active() as usize)
    }

    /// Returns a snapshot of every phase, sorted by phase name.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let mut phases: Vec<PhaseSnapshot> = self
            .phases
            .iter()
            .map(|entry| {
                let state = entry.value();
                PhaseSnapshot {
                    phase: state.config.name.clone(),
                    cost_tier: state.config.cost_tier,
                    limit: state.config.max_concurrent,
                    active: state.metrics.active(),
                    total_acquired: state.metrics.total_acquired(),
                    total_wait_ms: state.metrics.total_wait_ms(),
                    max_wait_ms: state.metrics.max_wait_ms(),
                    deadline_misses: state.metrics.deadline_misses(),
                }
            })
            .collect();
        phases.sort_by(|a, b| a.phase.cmp(&b.phase));
        SchedulerStats { phases }
    }

    fn slot_source(
        &self,
        phase: &str,
    ) -> Result<(Arc<Semaphore>, Arc<PhaseMetrics>), StagekeepError> {
        let mut state = self
            .phases
            .get_mut(phase)
            .ok_or_else(|| PhaseError::unknown(phase))?;
        let metrics = state.metrics.clone();
        let semaphore = match &state.semaphore {
            Some(existing) => existing.clone(),
            None => {
                let built = Arc::new(Semaphore::new(state.config.max_concurrent));
                tracing::debug!(
                    phase,
                    limit = state.config.max_concurrent,
                    "Built phase semaphore"
                );
                state.semaphore = Some(built.clone());
                built
            }
        };
        Ok((semaphore, metrics))
    }
}

impl Default for PhaseScheduler {
    fn default() -> Self {
        Self::with_defaults()
    }
}
