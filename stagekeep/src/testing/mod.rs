//! Testing utilities for substrate consumers.
//!
//! This module provides:
//! - A process-wide test tracing subscriber
//! - Operations with scripted failure patterns
//! - An observer that records retry attempts

mod fixtures;

pub use fixtures::{init_tracing, FlakyOperation, RecordingObserver, SimulatedFailure};
