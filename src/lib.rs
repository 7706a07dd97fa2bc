//! dailylog - local-first data layer for a personal activity log
//!
//! Persists activity records and two small reference collections (persons,
//! activity types), keeps the reference collections consistent with the
//! records that denormalize them by name, and exports/imports the whole
//! dataset as a portable, optionally encrypted document that merges
//! non-destructively with local data.

pub mod backup;
pub mod db;
pub mod mirror;
pub mod registry;
pub mod security;
pub mod validation;

use crate::db::{Database, DbExecutor, StoreError};
use crate::mirror::Mirror;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;

/// Name of the database file inside the data directory.
pub const STORE_FILE: &str = "dailylog.db";

/// Name of the mirror directory inside the data directory.
pub const MIRROR_DIR: &str = "mirror";

/// Tracks destructive multi-step operations in flight so a second call for
/// the same target no-ops instead of double-executing a cascade.
#[derive(Debug, Default)]
pub struct OperationGuards {
    active: Mutex<HashSet<String>>,
}

impl OperationGuards {
    /// Try to mark an operation as in flight. Returns `None` when the same
    /// operation key is already active.
    pub fn try_acquire(&self, key: &str) -> Option<OperationGuard<'_>> {
        let mut active = self.active.lock();
        if !active.insert(key.to_string()) {
            return None;
        }
        Some(OperationGuard {
            owner: self,
            key: key.to_string(),
        })
    }
}

/// Releases the operation key on drop.
pub struct OperationGuard<'a> {
    owner: &'a OperationGuards,
    key: String,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.owner.active.lock().remove(&self.key);
    }
}

/// Caller-owned context bundling the durable store, the fast mirror and the
/// in-flight operation guards. Every operation in `registry` and `backup`
/// takes this explicitly; there is no global state.
pub struct AppContext {
    pub store: DbExecutor,
    pub mirror: Mirror,
    pub guards: OperationGuards,
}

impl AppContext {
    /// Open the durable store under `data_dir` and wire up the mirror.
    ///
    /// On `StoreError::Open` the caller should fall back to reading the
    /// mirror directly (`Mirror::new(data_dir.join(MIRROR_DIR))`) and
    /// surface the stale-data state.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        let mirror = Mirror::new(&data_dir.join(MIRROR_DIR));
        let db = Database::open(&data_dir.join(STORE_FILE))?;

        Ok(Self {
            store: DbExecutor::new(db),
            mirror,
            guards: OperationGuards::default(),
        })
    }

    /// Seed default reference entities when the settings document carries
    /// none, and prime the mirror with the current collections.
    pub async fn initialize(&self) -> Result<(), registry::RegistryError> {
        registry::seed_defaults(self).await?;

        let activities = self.store.run(|db| db.list_activities()).await?;
        self.mirror.write(mirror::KEY_ACTIVITIES, &activities);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_blocks_overlapping_key() {
        let guards = OperationGuards::default();

        let first = guards.try_acquire("delete-person:A");
        assert!(first.is_some());
        assert!(guards.try_acquire("delete-person:A").is_none());

        // a different target is unaffected
        assert!(guards.try_acquire("delete-person:B").is_some());

        drop(first);
        assert!(guards.try_acquire("delete-person:A").is_some());
    }
}
