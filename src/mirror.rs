//! Fast mirror: a synchronous, best-effort snapshot of the last known-good
//! collections, written through after every successful store mutation.
//!
//! The mirror exists so something can be rendered before the durable store
//! has finished opening, and as a degraded-mode fallback when it fails to
//! open. It is never authoritative: reads of absent or unparsable entries
//! resolve to an empty collection, and a failed mirror write never fails
//! the store operation that triggered it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Logical keys under which collections are mirrored.
pub const KEY_ACTIVITIES: &str = "activities";
pub const KEY_PERSONS: &str = "persons";
pub const KEY_ACTIVITY_TYPES: &str = "activityTypes";
pub const KEY_BACKUP_PASSWORD: &str = "backupPassword";

/// Snapshot cache keyed by logical name, one JSON file per key.
#[derive(Debug, Clone)]
pub struct Mirror {
    dir: PathBuf,
}

impl Mirror {
    /// Create a mirror rooted at `dir`. The directory is created eagerly;
    /// if that fails the mirror still constructs and every write becomes a
    /// logged no-op.
    pub fn new(dir: &Path) -> Self {
        if let Err(e) = fs::create_dir_all(dir) {
            tracing::warn!("mirror directory {:?} unavailable: {}", dir, e);
        }
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Write-through a collection snapshot. Best-effort: failures are
    /// logged, never propagated.
    pub fn write<T: Serialize>(&self, key: &str, value: &T) {
        let path = self.entry_path(key);
        let result = serde_json::to_vec(value)
            .map_err(|e| e.to_string())
            .and_then(|bytes| fs::write(&path, bytes).map_err(|e| e.to_string()));

        if let Err(e) = result {
            tracing::warn!("mirror write for '{}' failed: {}", key, e);
        }
    }

    /// Read a snapshot back. Absent or unparsable entries resolve to the
    /// type's default rather than raising.
    pub fn read<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match fs::read(self.entry_path(key)) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!("mirror entry '{}' unparsable: {}", key, e);
                T::default()
            }),
            Err(_) => T::default(),
        }
    }
}
