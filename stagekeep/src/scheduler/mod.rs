//! Phase-scoped concurrency limits.
//!
//! This module provides:
//! - Phase configurations keyed by cost tier
//! - A scheduler mapping each phase to one lazily-built semaphore
//! - Scoped permits that release on drop
//! - Per-phase wait and occupancy statistics

mod permit;
mod phase;
mod registry;

pub use permit::PhasePermit;
pub use phase::{CostTier, PhaseConfig, PhaseMetrics, PhaseSnapshot, SchedulerStats};
pub use registry::PhaseScheduler;
