//! Fixtures for exercising retry, scheduling, and persistence paths.

use crate::errors::{ClassifyFailure, FailureKind};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

/// Installs a test tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to debug output for this crate. Safe to
/// call from every test.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stagekeep=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A classifiable error for driving retry paths in tests.
#[derive(Debug, Clone)]
pub struct SimulatedFailure {
    kind: FailureKind,
    message: String,
}

impl SimulatedFailure {
    /// Creates a failure of the given kind.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a retryable network failure.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, message)
    }

    /// Creates a non-retryable invariant failure.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Invariant, message)
    }

    /// The failure kind.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }
}

impl fmt::Display for SimulatedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SimulatedFailure {}

impl ClassifyFailure for SimulatedFailure {
    fn failure_kind(&self) -> FailureKind {
        self.kind
    }
}

/// An async operation that fails its first N calls, then succeeds.
///
/// `invoke` returns the 1-based call index on success, so tests can assert
/// exactly how many attempts ran.
#[derive(Debug)]
pub struct FlakyOperation {
    failures_before_success: usize,
    kind: FailureKind,
    calls: AtomicUsize,
}

impl FlakyOperation {
    /// Creates an operation that fails `failures_before_success` times
    /// with a network failure.
    #[must_use]
    pub fn new(failures_before_success: usize) -> Self {
        Self::with_kind(failures_before_success, FailureKind::Network)
    }

    /// Creates an operation failing with the given kind.
    #[must_use]
    pub fn with_kind(failures_before_success: usize, kind: FailureKind) -> Self {
        Self {
            failures_before_success,
            kind,
            calls: AtomicUsize::new(0),
        }
    }

    /// Runs one call.
    pub async fn invoke(&self) -> Result<usize, SimulatedFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures_before_success {
            Err(SimulatedFailure::new(
                self.kind,
                format!("simulated failure on call {call}"),
            ))
        } else {
            Ok(call)
        }
    }

    /// How many times `invoke` has run.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Collects per-attempt observations from a retry loop.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    seen: Mutex<Vec<(usize, String)>>,
}

impl RecordingObserver {
    /// Creates an empty observer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one observation.
    pub fn record(&self, attempt: usize, error: impl fmt::Display) {
        self.seen.lock().push((attempt, error.to_string()));
    }

    /// The attempt numbers observed, in order.
    #[must_use]
    pub fn attempts(&self) -> Vec<usize> {
        self.seen.lock().iter().map(|(attempt, _)| *attempt).collect()
    }

    /// The error messages observed, in order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.seen.lock().iter().map(|(_, msg)| msg.clone()).collect()
    }

    /// Number of observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Whether nothing was observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}
