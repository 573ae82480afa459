//! Scoped slot permits.

use crate::scheduler::phase::PhaseMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;

/// A held concurrency slot for one phase.
///
/// The slot returns to the phase when the permit is dropped, so release is
/// unconditional across success, error, and cancellation paths.
#[must_use = "a permit frees its slot as soon as it is dropped"]
#[derive(Debug)]
pub struct PhasePermit {
    phase: String,
    waited: Duration,
    metrics: Arc<PhaseMetrics>,
    _permit: OwnedSemaphorePermit,
}

impl PhasePermit {
    pub(crate) fn new(
        phase: String,
        waited: Duration,
        metrics: Arc<PhaseMetrics>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            phase,
            waited,
            metrics,
            _permit: permit,
        }
    }

    /// The phase this permit belongs to.
    #[must_use]
    pub fn phase(&self) -> &str {
        &self.phase
    }

    /// How long the caller waited before the slot was granted.
    #[must_use]
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl Drop for PhasePermit {
    fn drop(&mut self) {
        self.metrics.record_release();
        tracing::trace!(phase = %self.phase, "Released phase slot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Semaphore;

    #[tokio::test]
    async fn test_drop_returns_slot_and_updates_gauge() {
        let metrics = Arc::new(PhaseMetrics::default());
        let semaphore = Arc::new(Semaphore::new(1));

        let owned = semaphore.clone().acquire_owned().await.unwrap();
        metrics.record_acquire(Duration::from_millis(0));
        let permit = PhasePermit::new("heavy".to_string(), Duration::ZERO, metrics.clone(), owned);

        assert_eq!(metrics.active(), 1);
        assert_eq!(semaphore.available_permits(), 0);

        drop(permit);
        assert_eq!(metrics.active(), 0);
        assert_eq!(semaphore.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_accessors() {
        let metrics = Arc::new(PhaseMetrics::default());
        let semaphore = Arc::new(Semaphore::new(1));
        let owned = semaphore.clone().acquire_owned().await.unwrap();
        metrics.record_acquire(Duration::from_millis(3));

        let permit = PhasePermit::new(
            "image".to_string(),
            Duration::from_millis(3),
            metrics,
            owned,
        );
        assert_eq!(permit.phase(), "image");
        assert_eq!(permit.waited(), Duration::from_millis(3));
    }
}
