//! The checkpoint store: save, verify, resume.

use crate::checkpoint::backend::{CheckpointBackend, FsBackend};
use crate::checkpoint::manifest::CheckpointManifest;
use crate::checkpoint::record::{CheckpointRecord, LevelStatus};
use crate::errors::{CheckpointError, StagekeepError};
use crate::utils;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// How thoroughly artifact hashes are checked during verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityMode {
    /// A changed artifact hash is logged but does not fail verification.
    /// Artifacts are often legitimately regenerated with new content.
    #[default]
    Lenient,
    /// Every artifact must exist and match its recorded hash.
    Strict,
}

impl fmt::Display for IntegrityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lenient => write!(f, "lenient"),
            Self::Strict => write!(f, "strict"),
        }
    }
}

/// Persists numbered pipeline milestones so a restarted run can skip
/// completed stages.
///
/// One store per project. The manifest is the authority on which levels
/// are valid; level record files and the manifest itself live in the
/// store's [`CheckpointBackend`]. Artifact files belong to the pipeline
/// and are only hashed and probed, never written.
///
/// Checkpointing is an optimization, not a dependency: every read path
/// degrades to "nothing saved" rather than failing the pipeline. A corrupt
/// manifest opens as an empty one, and a missing artifact turns `load`
/// into a miss so the caller regenerates. Write failures do propagate;
/// silently dropping a save would defeat the point.
///
/// All mutation is serialized through one async lock per store instance.
pub struct CheckpointStore {
    project: String,
    integrity: IntegrityMode,
    backend: Arc<dyn CheckpointBackend>,
    inner: Mutex<CheckpointManifest>,
}

impl CheckpointStore {
    /// Opens the store for `project` under `base_dir` with lenient
    /// integrity checking.
    pub async fn open(base_dir: impl AsRef<Path>, project: impl Into<String>) -> Self {
        Self::open_with_mode(base_dir, project, IntegrityMode::default()).await
    }

    /// Opens the store with an explicit integrity mode.
    pub async fn open_with_mode(
        base_dir: impl AsRef<Path>,
        project: impl Into<String>,
        integrity: IntegrityMode,
    ) -> Self {
        let project = project.into();
        let backend = Arc::new(FsBackend::new(base_dir.as_ref().join(&project)));
        Self::with_backend(project, integrity, backend).await
    }

    /// Opens the store over any backend. Tests typically pass a
    /// [`MemoryBackend`](crate::checkpoint::MemoryBackend).
    pub async fn with_backend(
        project: impl Into<String>,
        integrity: IntegrityMode,
        backend: Arc<dyn CheckpointBackend>,
    ) -> Self {
        let project = project.into();
        let manifest = match backend.read_manifest().await {
            Ok(Some(bytes)) => match serde_json::from_slice::<CheckpointManifest>(&bytes) {
                Ok(manifest) => {
                    tracing::debug!(
                        project = %project,
                        completed = manifest.completed.len(),
                        "Loaded checkpoint manifest"
                    );
                    manifest
                }
                Err(e) => {
                    tracing::warn!(
                        project = %project,
                        error = %e,
                        "Checkpoint manifest unreadable; starting fresh"
                    );
                    CheckpointManifest::new(project.as_str())
                }
            },
            Ok(None) => CheckpointManifest::new(project.as_str()),
            Err(e) => {
                tracing::warn!(
                    project = %project,
                    error = %e,
                    "Checkpoint manifest unavailable; starting fresh"
                );
                CheckpointManifest::new(project.as_str())
            }
        };
        Self {
            project,
            integrity,
            backend,
            inner: Mutex::new(manifest),
        }
    }

    /// Saves a level: hashes its artifacts, writes the record file, and
    /// persists the updated manifest. Returns where the record landed.
    ///
    /// Under [`IntegrityMode::Lenient`] an artifact path that cannot be
    /// read marks the level `partial` instead of failing the save; the
    /// level then does not count toward the resume point until re-saved
    /// cleanly. Under [`IntegrityMode::Strict`] the save is rejected.
    ///
    /// # Errors
    ///
    /// Rejects level 0 (levels are 1-based), rejects unreadable artifacts
    /// in strict mode, and propagates persistence failures.
    pub async fn save(
        &self,
        level: u32,
        state: serde_json::Value,
        artifacts: BTreeMap<String, PathBuf>,
    ) -> Result<PathBuf, StagekeepError> {
        if level == 0 {
            return Err(CheckpointError::invalid_level(level).into());
        }

        let mut status = LevelStatus::Valid;
        let mut artifact_hashes = BTreeMap::new();
        let hashed = futures::future::join_all(artifacts.iter().map(|(name, path)| async move {
            (name.clone(), utils::sha256_hex_of_file(path).await)
        }))
        .await;
        for (name, outcome) in hashed {
            match outcome {
                Ok(hash) => {
                    artifact_hashes.insert(name, hash);
                }
                Err(e) => {
                    if self.integrity == IntegrityMode::Strict {
                        return Err(CheckpointError::integrity(
                            self.project.clone(),
                            level,
                            format!("artifact '{name}' unreadable: {e}"),
                        )
                        .into());
                    }
                    status = LevelStatus::Partial;
                    tracing::warn!(
                        project = %self.project,
                        level,
                        artifact = %name,
                        error = %e,
                        "Artifact unreadable at save; level marked partial"
                    );
                }
            }
        }

        let record = CheckpointRecord {
            level,
            saved_at: Utc::now(),
            state,
            artifacts,
            artifact_hashes,
            status,
        };
        let record_bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| StagekeepError::Serialization(e.to_string()))?;

        let mut manifest = self.inner.lock().await;
        let path = self.backend.write_record(level, &record_bytes).await?;
        manifest.upsert(record);
        let manifest_bytes = serde_json::to_vec_pretty(&*manifest)
            .map_err(|e| StagekeepError::Serialization(e.to_string()))?;
        self.backend.write_manifest(&manifest_bytes).await?;

        tracing::debug!(
            project = %self.project,
            level,
            status = %status,
            path = %path.display(),
            "Saved checkpoint"
        );
        Ok(path)
    }

    /// Returns the record for `level` if it verifies, `None` otherwise.
    ///
    /// A miss here is not an error: the caller regenerates the stage. See
    /// [`Self::record`] for the unverified view.
    pub async fn load(&self, level: u32) -> Option<CheckpointRecord> {
        let record = { self.inner.lock().await.record(level).cloned() }?;
        if self.verify_record(&record).await {
            Some(record)
        } else {
            None
        }
    }

    /// Whether `level` is usable: saved, not invalidated, and every
    /// referenced artifact file still present.
    ///
    /// Under [`IntegrityMode::Lenient`] a hash mismatch only logs a
    /// warning. Under [`IntegrityMode::Strict`] it fails verification, as
    /// does an artifact saved without a hash.
    pub async fn verify_integrity(&self, level: u32) -> bool {
        let record = { self.inner.lock().await.record(level).cloned() };
        match record {
            Some(record) => self.verify_record(&record).await,
            None => false,
        }
    }

    /// Highest level the pipeline can resume from, 0 meaning "start from
    /// scratch".
    ///
    /// Derived from manifest statuses alone; a level whose artifacts have
    /// since vanished still counts here, and the subsequent `load` turns
    /// it into a miss.
    pub async fn resume_level(&self) -> u32 {
        self.inner.lock().await.resume_level()
    }

    /// Highest completed level, independent of whether lower levels are
    /// valid.
    pub async fn current_level(&self) -> u32 {
        self.inner.lock().await.current_level
    }

    /// Completed levels in ascending order.
    pub async fn completed_levels(&self) -> Vec<u32> {
        self.inner.lock().await.completed.clone()
    }

    /// The stored record for `level` regardless of integrity, for
    /// inspection and audit.
    pub async fn record(&self, level: u32) -> Option<CheckpointRecord> {
        self.inner.lock().await.record(level).cloned()
    }

    /// Invalidates `level` and every level above it, persisting the
    /// manifest. Record files stay on disk for audit; the manifest is
    /// authoritative.
    ///
    /// # Errors
    ///
    /// Rejects level 0 and propagates manifest write failures.
    pub async fn invalidate(&self, level: u32) -> Result<(), StagekeepError> {
        if level == 0 {
            return Err(CheckpointError::invalid_level(level).into());
        }
        let mut manifest = self.inner.lock().await;
        let affected = manifest.invalidate_from(level);
        if affected.is_empty() {
            return Ok(());
        }
        let manifest_bytes = serde_json::to_vec_pretty(&*manifest)
            .map_err(|e| StagekeepError::Serialization(e.to_string()))?;
        self.backend.write_manifest(&manifest_bytes).await?;
        tracing::info!(
            project = %self.project,
            from_level = level,
            affected = ?affected,
            "Invalidated checkpoint levels"
        );
        Ok(())
    }

    /// Deletes every persisted checkpoint and resets the manifest.
    ///
    /// # Errors
    ///
    /// Propagates backend failures; in-memory state is untouched when the
    /// backend could not be cleared.
    pub async fn clear_all(&self) -> Result<(), StagekeepError> {
        let mut manifest = self.inner.lock().await;
        self.backend.clear().await?;
        *manifest = CheckpointManifest::new(self.project.as_str());
        tracing::info!(project = %self.project, "Cleared all checkpoints");
        Ok(())
    }

    /// The project this store belongs to.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The configured integrity mode.
    #[must_use]
    pub fn integrity_mode(&self) -> IntegrityMode {
        self.integrity
    }

    async fn verify_record(&self, record: &CheckpointRecord) -> bool {
        if record.status == LevelStatus::Invalid {
            return false;
        }
        for (name, path) in &record.artifacts {
            match utils::sha256_hex_of_file(path).await {
                Ok(current) => match record.artifact_hashes.get(name) {
                    Some(saved) if *saved == current => {}
                    Some(saved) => {
                        tracing::warn!(
                            project = %self.project,
                            level = record.level,
                            artifact = %name,
                            saved = %saved,
                            current = %current,
                            "Artifact hash changed since checkpoint"
                        );
                        if self.integrity == IntegrityMode::Strict {
                            return false;
                        }
                    }
                    None => {
                        // Saved without a hash; strict mode cannot vouch
                        // for the content.
                        if self.integrity == IntegrityMode::Strict {
                            return false;
                        }
                    }
                },
                Err(e) => {
                    tracing::debug!(
                        project = %self.project,
                        level = record.level,
                        artifact = %name,
                        error = %e,
                        "Checkpoint artifact missing"
                    );
                    return false;
                }
            }
        }
        true
    }
}

impl fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("project", &self.project)
            .field("integrity", &self.integrity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::backend::MemoryBackend;
    use pretty_assertions::assert_eq;

    async fn artifact_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let frames = artifact_file(dir.path(), "frames.json", "[1, 2, 3]").await;
        let store = CheckpointStore::open(dir.path().join("checkpoints"), "demo").await;

        let state = serde_json::json!({ "stage": "frames", "count": 3 });
        let artifacts = BTreeMap::from([("frames".to_string(), frames.clone())]);
        let path = store.save(1, state.clone(), artifacts.clone()).await.unwrap();
        assert!(path.exists());

        let record = store.load(1).await.unwrap();
        assert_eq!(record.level, 1);
        assert_eq!(record.state, state);
        assert_eq!(record.artifacts, artifacts);
        assert_eq!(record.status, LevelStatus::Valid);
        assert_eq!(record.artifact_hashes.len(), 1);
        assert!(store.verify_integrity(1).await);
        assert_eq!(store.resume_level().await, 1);
    }

    #[tokio::test]
    async fn test_resume_requires_contiguous_levels() {
        let store = CheckpointStore::with_backend(
            "demo",
            IntegrityMode::default(),
            Arc::new(MemoryBackend::new()),
        )
        .await;

        store
            .save(2, serde_json::json!({}), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(store.current_level().await, 2);
        assert_eq!(store.resume_level().await, 0);

        store
            .save(1, serde_json::json!({}), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(store.resume_level().await, 2);
        assert_eq!(store.completed_levels().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_invalidate_cascade_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("checkpoints");
        let store = CheckpointStore::open(&base, "demo").await;
        for level in 1..=3 {
            store
                .save(level, serde_json::json!({ "level": level }), BTreeMap::new())
                .await
                .unwrap();
        }
        assert_eq!(store.resume_level().await, 3);

        store.invalidate(2).await.unwrap();
        assert_eq!(store.resume_level().await, 1);
        assert!(store.load(1).await.is_some());
        assert!(store.load(2).await.is_none());
        assert!(store.load(3).await.is_none());

        let reopened = CheckpointStore::open(&base, "demo").await;
        assert_eq!(reopened.resume_level().await, 1);
        assert_eq!(
            reopened.record(2).await.unwrap().status,
            LevelStatus::Invalid
        );
    }

    #[tokio::test]
    async fn test_corrupt_manifest_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("checkpoints");
        let project_dir = base.join("demo");
        tokio::fs::create_dir_all(&project_dir).await.unwrap();
        tokio::fs::write(project_dir.join("checkpoint_manifest.json"), b"{ broken")
            .await
            .unwrap();

        let store = CheckpointStore::open(&base, "demo").await;
        assert_eq!(store.resume_level().await, 0);

        // Still fully usable afterwards
        store
            .save(1, serde_json::json!({}), BTreeMap::new())
            .await
            .unwrap();
        let reopened = CheckpointStore::open(&base, "demo").await;
        assert_eq!(reopened.resume_level().await, 1);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_soft_miss() {
        let dir = tempfile::tempdir().unwrap();
        let refs = artifact_file(dir.path(), "refs.json", "{}").await;
        let store = CheckpointStore::open(dir.path().join("checkpoints"), "demo").await;
        store
            .save(
                1,
                serde_json::json!({}),
                BTreeMap::from([("refs".to_string(), refs.clone())]),
            )
            .await
            .unwrap();

        tokio::fs::remove_file(&refs).await.unwrap();
        assert!(!store.verify_integrity(1).await);
        assert!(store.load(1).await.is_none());
        // The record itself is still inspectable
        assert!(store.record(1).await.is_some());
    }

    #[tokio::test]
    async fn test_hash_mismatch_lenient_vs_strict() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("checkpoints");
        let script = artifact_file(dir.path(), "script.txt", "draft one").await;

        let lenient = CheckpointStore::open(&base, "demo").await;
        lenient
            .save(
                1,
                serde_json::json!({}),
                BTreeMap::from([("script".to_string(), script.clone())]),
            )
            .await
            .unwrap();

        tokio::fs::write(&script, "draft two").await.unwrap();
        assert!(lenient.verify_integrity(1).await);
        assert!(lenient.load(1).await.is_some());

        let strict = CheckpointStore::open_with_mode(&base, "demo", IntegrityMode::Strict).await;
        assert!(!strict.verify_integrity(1).await);
        assert!(strict.load(1).await.is_none());
    }

    #[tokio::test]
    async fn test_partial_save_when_artifact_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("checkpoints"), "demo").await;
        let ghost = dir.path().join("never-written.json");

        store
            .save(
                1,
                serde_json::json!({}),
                BTreeMap::from([("ghost".to_string(), ghost)]),
            )
            .await
            .unwrap();

        let record = store.record(1).await.unwrap();
        assert_eq!(record.status, LevelStatus::Partial);
        assert!(record.artifact_hashes.is_empty());
        assert_eq!(store.resume_level().await, 0);
        assert!(store.load(1).await.is_none());
    }

    #[tokio::test]
    async fn test_strict_save_rejects_unreadable_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open_with_mode(
            dir.path().join("checkpoints"),
            "demo",
            IntegrityMode::Strict,
        )
        .await;
        let ghost = dir.path().join("never-written.json");

        let saved = store
            .save(
                1,
                serde_json::json!({}),
                BTreeMap::from([("ghost".to_string(), ghost)]),
            )
            .await;
        assert!(matches!(
            saved,
            Err(StagekeepError::Checkpoint(CheckpointError::Integrity { .. }))
        ));
        assert!(store.record(1).await.is_none());
    }

    #[tokio::test]
    async fn test_level_zero_rejected() {
        let store = CheckpointStore::with_backend(
            "demo",
            IntegrityMode::default(),
            Arc::new(MemoryBackend::new()),
        )
        .await;

        let saved = store.save(0, serde_json::json!({}), BTreeMap::new()).await;
        assert!(matches!(
            saved,
            Err(StagekeepError::Checkpoint(CheckpointError::InvalidLevel { .. }))
        ));
        assert!(store.invalidate(0).await.is_err());
    }

    #[tokio::test]
    async fn test_clear_all_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("checkpoints");
        let store = CheckpointStore::open(&base, "demo").await;
        store
            .save(1, serde_json::json!({}), BTreeMap::new())
            .await
            .unwrap();
        store
            .save(2, serde_json::json!({}), BTreeMap::new())
            .await
            .unwrap();

        store.clear_all().await.unwrap();
        assert_eq!(store.resume_level().await, 0);
        assert!(!base.join("demo").join("checkpoint_manifest.json").exists());

        let reopened = CheckpointStore::open(&base, "demo").await;
        assert_eq!(reopened.resume_level().await, 0);
    }

    #[tokio::test]
    async fn test_resave_restores_invalidated_level() {
        let store = CheckpointStore::with_backend(
            "demo",
            IntegrityMode::default(),
            Arc::new(MemoryBackend::new()),
        )
        .await;

        store
            .save(1, serde_json::json!({ "pass": 1 }), BTreeMap::new())
            .await
            .unwrap();
        store.invalidate(1).await.unwrap();
        assert_eq!(store.resume_level().await, 0);
        assert!(store.load(1).await.is_none());

        store
            .save(1, serde_json::json!({ "pass": 2 }), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(store.resume_level().await, 1);
        let record = store.load(1).await.unwrap();
        assert_eq!(record.state, serde_json::json!({ "pass": 2 }));
    }
}
