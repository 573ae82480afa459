//! Checkpoint and resume for multi-stage pipelines.
//!
//! - [`CheckpointStore`]: per-project save/load/invalidate/resume
//! - [`CheckpointManifest`]: the index of saved levels
//! - [`CheckpointRecord`]: state, artifact paths, and artifact hashes for
//!   one level
//! - [`CheckpointBackend`]: where the bytes live ([`FsBackend`] in
//!   production, [`MemoryBackend`] in tests)
//!
//! Levels are 1-based milestones. A pipeline resumes at the highest level
//! whose whole prefix is valid; invalidating a level cascades upward
//! because later stages build on earlier ones.

mod backend;
mod manifest;
mod record;
mod store;

pub use backend::{CheckpointBackend, FsBackend, MemoryBackend};
pub use manifest::CheckpointManifest;
pub use record::{CheckpointRecord, LevelStatus};
pub use store::{CheckpointStore, IntegrityMode};
