//! File-backed artifact store with content-hash staleness stamps.
//!
//! Each artifact key maps to a value file under the store root plus a
//! sibling `.stamp` file. The stamp is a sha256 digest of the production
//! rule's identity and the prerequisite values it consumed, so an artifact
//! is fresh exactly when the same rule would be re-run on the same inputs.
//! Content hashing sidesteps the clock-skew and partial-write hazards of
//! timestamp comparison: a torn value write leaves a stale or missing
//! stamp, which just means the artifact rebuilds.
//!
//! Writes for a given key happen from a single builder thread at a time
//! (the graph partitions keys across workers); reads of already-built
//! artifacts are safe for concurrent access.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::errors::{CompatError, Result};

const STAMP_SUFFIX: &str = ".stamp";

/// Digest of a production rule identity plus its prerequisite values.
///
/// The rule identity participates so that changing what a rule means (a
/// new `id` string) invalidates everything it produced.
pub fn stamp_of(rule: &str, inputs: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rule.as_bytes());
    for input in inputs {
        // Length-prefix each part so concatenation is unambiguous.
        hasher.update((input.len() as u64).to_le_bytes());
        hasher.update(input);
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<ArtifactStore> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| CompatError::store(&root, e))?;
        Ok(ArtifactStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn stamp_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}{STAMP_SUFFIX}"))
    }

    /// True when the persisted artifact was produced by the same rule on
    /// the same prerequisite values.
    pub fn is_fresh(&self, key: &str, stamp: &str) -> bool {
        if !self.value_path(key).is_file() {
            return false;
        }
        match fs::read_to_string(self.stamp_path(key)) {
            Ok(stored) => stored.trim() == stamp,
            Err(_) => false,
        }
    }

    /// Loads a persisted artifact value, or `None` if it was never built.
    pub fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.value_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CompatError::store(path, e)),
        }
    }

    /// Persists an artifact value and its stamp. The value lands before
    /// the stamp, so an interrupted write reads as stale, never as fresh.
    pub fn save(&self, key: &str, value: &[u8], stamp: &str) -> Result<()> {
        let path = self.value_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CompatError::store(parent, e))?;
        }
        fs::write(&path, value).map_err(|e| CompatError::store(&path, e))?;
        let stamp_path = self.stamp_path(key);
        fs::write(&stamp_path, stamp).map_err(|e| CompatError::store(stamp_path, e))?;
        Ok(())
    }

    /// Writes a side file that is not itself an artifact (raw compiler
    /// output kept next to its normalized artifact, for inspection).
    pub fn save_side(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.value_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CompatError::store(parent, e))?;
        }
        fs::write(&path, value).map_err(|e| CompatError::store(&path, e))
    }

    /// Deletes derived artifacts whose key starts with `pattern` (empty
    /// pattern removes everything). Returns the number of artifacts
    /// removed; stamps and side files do not count separately.
    pub fn clean(&self, pattern: &str) -> Result<usize> {
        let mut removed = 0;
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.starts_with(pattern) {
                continue;
            }
            fs::remove_file(entry.path()).map_err(|e| CompatError::store(entry.path(), e))?;
            if !key.ends_with(STAMP_SUFFIX) && !key.ends_with(".raw") {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
