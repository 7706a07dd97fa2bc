//! Durable store for dailylog
//! SQLite-backed, schema-versioned; the sole source of truth for
//! activity records and the settings document.

pub mod executor;

pub use executor::{DbExecutor, DbExecutorError};

use rusqlite::{params, Connection, Result as SqliteResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Settings row key under which the whole settings document is stored.
const CONFIG_KEY: &str = "config";

/// Attribution used when no signed-in user is known.
pub const LOCAL_USER: &str = "local-user";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store: {0}")]
    Open(String),
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("migration failed: {0}")]
    Migration(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One logged activity entry.
///
/// `person` and `activity_name` carry the referenced entity's name verbatim;
/// the registry module keeps them consistent when entities are renamed or
/// deleted. Wire names follow the backup document format (`activityName`,
/// `startTime`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivityRecord {
    pub id: String,
    pub person: String,
    pub activity_name: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub details: String,
    pub created_at: String,
    pub created_by: String,
    pub updated_at: String,
    pub updated_by: String,
}

/// Partial update for an activity record. `None` fields are left untouched;
/// the record id is never changed by a patch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivityPatch {
    pub person: Option<String>,
    pub activity_name: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub details: Option<String>,
    pub updated_at: Option<String>,
    pub updated_by: Option<String>,
}

impl ActivityPatch {
    fn apply(&self, record: &mut ActivityRecord) {
        if let Some(v) = &self.person {
            record.person = v.clone();
        }
        if let Some(v) = &self.activity_name {
            record.activity_name = v.clone();
        }
        if let Some(v) = &self.date {
            record.date = v.clone();
        }
        if let Some(v) = &self.start_time {
            record.start_time = v.clone();
        }
        if let Some(v) = &self.end_time {
            record.end_time = v.clone();
        }
        if let Some(v) = &self.details {
            record.details = v.clone();
        }
        if let Some(v) = &self.updated_at {
            record.updated_at = v.clone();
        }
        if let Some(v) = &self.updated_by {
            record.updated_by = v.clone();
        }
    }
}

/// A named person entry. The name is the key; there is no separate id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
}

/// A named activity type entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityType {
    pub name: String,
}

/// The settings singleton, read and written as a whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsDocument {
    pub persons: Vec<Person>,
    pub activity_types: Vec<ActivityType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_password: Option<String>,
}

/// Durable store over a single SQLite database file.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

const ACTIVITY_COLUMNS: &str = "id, person, activity_name, date, start_time, end_time, \
     details, created_at, created_by, updated_at, updated_by";

fn map_activity_row(row: &rusqlite::Row<'_>) -> SqliteResult<ActivityRecord> {
    Ok(ActivityRecord {
        id: row.get(0)?,
        person: row.get(1)?,
        activity_name: row.get(2)?,
        date: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        details: row.get(6)?,
        created_at: row.get(7)?,
        created_by: row.get(8)?,
        updated_at: row.get(9)?,
        updated_by: row.get(10)?,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl Database {
    /// Open or create the store. Idempotent: the schema is created on first
    /// open and left alone afterwards. Any failure here is an open failure;
    /// callers fall back to the fast mirror.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Open(e.to_string()))?;

        let db = Self {
            conn,
            path: path.to_path_buf(),
        };

        db.initialize().map_err(|e| StoreError::Open(e.to_string()))?;

        tracing::info!("store opened at {:?}", db.path);
        Ok(db)
    }

    /// Initialize database schema, running migrations as needed.
    fn initialize(&self) -> Result<(), StoreError> {
        let version = self.get_schema_version()?;
        if version < CURRENT_SCHEMA_VERSION {
            self.run_migrations(version)?;
        }
        Ok(())
    }

    fn get_schema_version(&self) -> Result<i32, StoreError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        let version: SqliteResult<String> = self.conn.query_row(
            "SELECT value FROM settings WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        );

        match version {
            Ok(v) => v
                .parse()
                .map_err(|_| StoreError::Migration("Invalid schema version".into())),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    fn set_schema_version(&self, version: i32) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES ('schema_version', ?)",
            params![version.to_string()],
        )?;
        Ok(())
    }

    fn run_migrations(&self, from_version: i32) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;

        if from_version < 1 {
            self.migrate_v1()?;
        }

        tx.commit()?;
        self.set_schema_version(CURRENT_SCHEMA_VERSION)?;

        tracing::info!(
            "migrated schema from v{} to v{}",
            from_version,
            CURRENT_SCHEMA_VERSION
        );
        Ok(())
    }

    /// Migration to v1: Initial schema
    fn migrate_v1(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            -- Core settings (whole settings document under key 'config')
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Activity records
            CREATE TABLE IF NOT EXISTS activities (
                id TEXT PRIMARY KEY,
                person TEXT NOT NULL DEFAULT '',
                activity_name TEXT NOT NULL DEFAULT '',
                date TEXT NOT NULL DEFAULT '',
                start_time TEXT NOT NULL DEFAULT '',
                end_time TEXT NOT NULL DEFAULT '',
                details TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT '',
                created_by TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL DEFAULT '',
                updated_by TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_activities_person ON activities(person);
            CREATE INDEX IF NOT EXISTS idx_activities_name ON activities(activity_name);
            CREATE INDEX IF NOT EXISTS idx_activities_date ON activities(date);
            "#,
        )?;

        Ok(())
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// List all activity records. No ordering guarantee.
    pub fn list_activities(&self) -> Result<Vec<ActivityRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ACTIVITY_COLUMNS} FROM activities"))?;

        let records = stmt
            .query_map([], map_activity_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Get a single activity record by id.
    pub fn get_activity(&self, id: &str) -> Result<Option<ActivityRecord>, StoreError> {
        use rusqlite::OptionalExtension;

        let record = self
            .conn
            .query_row(
                &format!("SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = ?"),
                [id],
                map_activity_row,
            )
            .optional()?;

        Ok(record)
    }

    /// Insert a new activity record, assigning a fresh id when the record
    /// carries none. Returns the id under which the record was stored.
    pub fn add_activity(&self, record: &ActivityRecord) -> Result<String, StoreError> {
        let mut record = record.clone();
        if record.id.is_empty() {
            record.id = Uuid::new_v4().to_string();
        }

        let result = self.conn.execute(
            "INSERT INTO activities
             (id, person, activity_name, date, start_time, end_time,
              details, created_at, created_by, updated_at, updated_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                &record.id,
                &record.person,
                &record.activity_name,
                &record.date,
                &record.start_time,
                &record.end_time,
                &record.details,
                &record.created_at,
                &record.created_by,
                &record.updated_at,
                &record.updated_by,
            ],
        );

        match result {
            Ok(_) => Ok(record.id),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::DuplicateKey(record.id)),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Merge a patch onto an existing record, preserving its id. When no
    /// record with the id exists, the patch is upserted as a new record
    /// instead of failing, so an edit to a record the caller believes exists
    /// is never silently dropped.
    pub fn update_activity(&self, id: &str, patch: &ActivityPatch) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;

        let mut record = match self.get_activity(id)? {
            Some(existing) => existing,
            None => ActivityRecord {
                id: id.to_string(),
                ..Default::default()
            },
        };
        patch.apply(&mut record);
        record.id = id.to_string();

        self.conn.execute(
            "INSERT OR REPLACE INTO activities
             (id, person, activity_name, date, start_time, end_time,
              details, created_at, created_by, updated_at, updated_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                &record.id,
                &record.person,
                &record.activity_name,
                &record.date,
                &record.start_time,
                &record.end_time,
                &record.details,
                &record.created_at,
                &record.created_by,
                &record.updated_at,
                &record.updated_by,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Delete an activity record. No-op when absent.
    pub fn delete_activity(&self, id: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM activities WHERE id = ?", [id])?;
        Ok(())
    }

    /// Replace the whole activity collection in a single transaction.
    ///
    /// Used by the backup merge commit: the fully merged set is staged in
    /// memory first and swapped in here, so an interruption can never leave
    /// the store empty or half-written.
    pub fn replace_activities(&self, records: &[ActivityRecord]) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;

        self.conn.execute("DELETE FROM activities", [])?;

        {
            let mut stmt = self.conn.prepare(
                "INSERT INTO activities
                 (id, person, activity_name, date, start_time, end_time,
                  details, created_at, created_by, updated_at, updated_by)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for record in records {
                stmt.execute(params![
                    &record.id,
                    &record.person,
                    &record.activity_name,
                    &record.date,
                    &record.start_time,
                    &record.end_time,
                    &record.details,
                    &record.created_at,
                    &record.created_by,
                    &record.updated_at,
                    &record.updated_by,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Delete all activity records on a given date. Returns the count removed.
    pub fn delete_activities_by_date(&self, date: &str) -> Result<usize, StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM activities WHERE date = ?", [date])?;
        Ok(deleted)
    }

    /// Remove duplicate activity records, keeping the first of each group.
    /// Two records are duplicates when person, activity name, date and both
    /// times all match. Returns the count removed.
    pub fn cleanup_duplicate_activities(&self) -> Result<usize, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM activities WHERE rowid NOT IN (
                SELECT MIN(rowid) FROM activities
                GROUP BY person, activity_name, date, start_time, end_time
            )",
            [],
        )?;
        Ok(deleted)
    }

    /// Load the settings document. Absent config loads as the default.
    pub fn load_config(&self) -> Result<SettingsDocument, StoreError> {
        use rusqlite::OptionalExtension;

        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                [CONFIG_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(SettingsDocument::default()),
        }
    }

    /// Save the settings document, replacing it as a whole.
    pub fn save_config(&self, config: &SettingsDocument) -> Result<(), StoreError> {
        let json = serde_json::to_string(config)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
            params![CONFIG_KEY, json],
        )?;
        Ok(())
    }
}
