//! Retry with exponential backoff and jitter.
//!
//! This module provides:
//! - Retry policies with a backoff curve, delay cap, and jitter range
//! - Failure-kind based retry eligibility
//! - An async retry loop with optional per-attempt observers

mod executor;
mod policy;

pub use executor::{with_retry, with_retry_observed, RetryError};
pub use policy::{JitterRange, RetryPolicy};
