//! Durable checkpoint store and per-item artifact files.
//!
//! The store is one JSON document mapping item identity to the record of its
//! last successful processing. It is read once at startup and rewritten
//! atomically (temp file + rename) after every item, so a crash at any point
//! leaves either the previous or the next complete store on disk, never a
//! torn one. The total I/O is O(n²) over a run, trading write amplification
//! for crash safety at any point.
//!
//! A missing or corrupt store is "start fresh", never a fatal error: the
//! worst outcome of losing the store is re-downloading work, not losing it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Errors raised by checkpoint or artifact persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem write/rename failed.
    #[error("failed to write {path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Store serialization failed.
    #[error("failed to serialize checkpoint store: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result payload of one successfully processed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultPayload {
    /// A synced source document; the text lives in the artifact file.
    Document,
    /// A conversational answer with its source attributions.
    Answer {
        /// The prompt as submitted.
        question: String,
        /// Cleaned answer text.
        answer: String,
        /// De-duplicated source names, first-seen order.
        sources: Vec<String>,
    },
}

/// Durable evidence that one item was processed successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// What was produced.
    pub payload: ResultPayload,
    /// Artifact size in bytes at save time; the skip check compares this.
    pub bytes: u64,
    /// SHA-256 hex digest of the artifact at save time.
    pub fingerprint: String,
    /// When the record was committed.
    pub saved_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Builds a record stamped with the current time.
    #[must_use]
    pub fn new(payload: ResultPayload, bytes: u64, fingerprint: String) -> Self {
        Self {
            payload,
            bytes,
            fingerprint,
            saved_at: Utc::now(),
        }
    }
}

/// The single-document checkpoint store.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    records: BTreeMap<String, CheckpointRecord>,
}

impl CheckpointStore {
    /// Loads the store from `path`.
    ///
    /// A missing file yields an empty store; a corrupt file is logged and
    /// also yields an empty store; the artifacts on disk are untouched and
    /// the run simply reprocesses.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let records = match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<BTreeMap<String, CheckpointRecord>>(&text) {
                Ok(records) => {
                    debug!(path = %path.display(), records = records.len(), "loaded checkpoint store");
                    records
                }
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        error = %error,
                        "checkpoint store is corrupt; starting fresh"
                    );
                    BTreeMap::new()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no checkpoint store yet; starting fresh");
                BTreeMap::new()
            }
            Err(error) => {
                warn!(
                    path = %path.display(),
                    error = %error,
                    "checkpoint store unreadable; starting fresh"
                );
                BTreeMap::new()
            }
        };
        Self {
            path: path.to_path_buf(),
            records,
        }
    }

    /// Returns the record for `identity`, if one exists.
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<&CheckpointRecord> {
        self.records.get(identity)
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true when no records exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates records in identity order.
    pub fn records(&self) -> impl Iterator<Item = (&String, &CheckpointRecord)> {
        self.records.iter()
    }

    /// Returns true iff `identity` can be skipped: a record exists AND its
    /// backing artifact is still present with the size recorded at save time.
    ///
    /// A record whose artifact has gone missing (or changed size) is stale
    /// and the item is reprocessed. Remote-side freshness is deliberately
    /// not consulted; delete the artifact to force a re-sync.
    #[must_use]
    pub fn should_skip(&self, identity: &str, artifacts: &ArtifactStore) -> bool {
        let Some(record) = self.records.get(identity) else {
            return false;
        };
        match artifacts.size_of(identity) {
            Some(size) if size == record.bytes => true,
            Some(size) => {
                debug!(
                    identity,
                    recorded = record.bytes,
                    actual = size,
                    "artifact size changed; reprocessing"
                );
                false
            }
            None => {
                debug!(identity, "artifact missing despite record; reprocessing");
                false
            }
        }
    }

    /// Upserts `record` and rewrites the whole store atomically.
    ///
    /// The in-memory map is only updated once the rename lands, so a write
    /// failure leaves both the file and this store exactly as they were.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when serialization or the write/rename fails.
    pub fn save(&mut self, identity: &str, record: CheckpointRecord) -> Result<(), StoreError> {
        let mut next = self.records.clone();
        next.insert(identity.to_string(), record);

        let serialized = serde_json::to_string_pretty(&next)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serialized).map_err(|source| StoreError::Io {
            path: tmp_path.display().to_string(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| StoreError::Io {
            path: self.path.display().to_string(),
            source,
        })?;

        self.records = next;
        debug!(identity, path = %self.path.display(), "checkpoint committed");
        Ok(())
    }
}

/// Per-item artifact files, addressed by item identity.
///
/// Holds the primary extracted output and doubles as the staleness signal
/// for the skip check.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Creates an artifact store rooted at `dir` (created lazily on write).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the artifact path for `identity`.
    #[must_use]
    pub fn path_for(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{identity}.md"))
    }

    /// Returns the current artifact size for `identity`, if the file exists.
    #[must_use]
    pub fn size_of(&self, identity: &str) -> Option<u64> {
        fs::metadata(self.path_for(identity)).ok().map(|m| m.len())
    }

    /// Writes the artifact for `identity`, returning its size and SHA-256
    /// hex fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory or file cannot be
    /// written.
    pub fn write(&self, identity: &str, text: &str) -> Result<(u64, String), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;
        let path = self.path_for(identity);
        fs::write(&path, text).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let digest = Sha256::digest(text.as_bytes());
        let fingerprint = digest.iter().fold(
            String::with_capacity(digest.len() * 2),
            |mut acc, byte| {
                acc.push_str(&format!("{byte:02x}"));
                acc
            },
        );
        Ok((text.len() as u64, fingerprint))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn document_record(bytes: u64) -> CheckpointRecord {
        CheckpointRecord::new(ResultPayload::Document, bytes, "ff".repeat(32))
    }

    // ==================== Load Tests ====================

    #[test]
    fn test_load_missing_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::load(&dir.path().join("checkpoints.json"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_corrupt_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoints.json");
        fs::write(&path, "{ not json").unwrap();

        let store = CheckpointStore::load(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoints.json");

        let mut store = CheckpointStore::load(&path);
        store.save("guide", document_record(12)).unwrap();
        store
            .save(
                "faq",
                CheckpointRecord::new(
                    ResultPayload::Answer {
                        question: "Q?".to_string(),
                        answer: "A.".to_string(),
                        sources: vec!["doc1.md".to_string()],
                    },
                    2,
                    "aa".repeat(32),
                ),
            )
            .unwrap();

        let reloaded = CheckpointStore::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("guide").unwrap().bytes, 12);
        assert!(matches!(
            reloaded.get("faq").unwrap().payload,
            ResultPayload::Answer { .. }
        ));
    }

    #[test]
    fn test_save_is_upsert() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoints.json");

        let mut store = CheckpointStore::load(&path);
        store.save("guide", document_record(12)).unwrap();
        store.save("guide", document_record(99)).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(CheckpointStore::load(&path).get("guide").unwrap().bytes, 99);
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoints.json");

        let mut store = CheckpointStore::load(&path);
        store.save("guide", document_record(1)).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_save_failure_leaves_memory_untouched() {
        // Point the store at a path whose parent is an existing *file*, so
        // create_dir_all fails.
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();

        let mut store = CheckpointStore::load(&blocker.join("checkpoints.json"));
        let result = store.save("guide", document_record(1));
        assert!(matches!(result, Err(StoreError::Io { .. })));
        assert!(store.is_empty());
    }

    // ==================== Skip Tests ====================

    #[test]
    fn test_should_skip_requires_record() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::load(&dir.path().join("checkpoints.json"));
        let artifacts = ArtifactStore::new(dir.path().join("out"));
        assert!(!store.should_skip("guide", &artifacts));
    }

    #[test]
    fn test_should_skip_true_when_artifact_matches() {
        let dir = TempDir::new().unwrap();
        let artifacts = ArtifactStore::new(dir.path().join("out"));
        let (bytes, fingerprint) = artifacts.write("guide", "hello world!").unwrap();

        let mut store = CheckpointStore::load(&dir.path().join("checkpoints.json"));
        store
            .save(
                "guide",
                CheckpointRecord::new(ResultPayload::Document, bytes, fingerprint),
            )
            .unwrap();

        assert!(store.should_skip("guide", &artifacts));
    }

    #[test]
    fn test_should_skip_false_when_artifact_missing() {
        let dir = TempDir::new().unwrap();
        let artifacts = ArtifactStore::new(dir.path().join("out"));

        let mut store = CheckpointStore::load(&dir.path().join("checkpoints.json"));
        store.save("x", document_record(5)).unwrap();

        assert!(!store.should_skip("x", &artifacts));
    }

    #[test]
    fn test_should_skip_false_when_size_changed() {
        let dir = TempDir::new().unwrap();
        let artifacts = ArtifactStore::new(dir.path().join("out"));
        artifacts.write("guide", "short").unwrap();

        let mut store = CheckpointStore::load(&dir.path().join("checkpoints.json"));
        store.save("guide", document_record(9999)).unwrap();

        assert!(!store.should_skip("guide", &artifacts));
    }

    // ==================== Artifact Tests ====================

    #[test]
    fn test_artifact_write_reports_size_and_fingerprint() {
        let dir = TempDir::new().unwrap();
        let artifacts = ArtifactStore::new(dir.path().join("out"));
        let (bytes, fingerprint) = artifacts.write("guide", "abc").unwrap();

        assert_eq!(bytes, 3);
        assert_eq!(fingerprint.len(), 64);
        assert_eq!(artifacts.size_of("guide"), Some(3));
    }

    #[test]
    fn test_artifact_path_is_identity_scoped() {
        let artifacts = ArtifactStore::new("/tmp/out");
        assert!(artifacts.path_for("guide").ends_with("guide.md"));
    }
}
