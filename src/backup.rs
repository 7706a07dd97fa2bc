//! Backup codec for dailylog
//!
//! Serializes the full dataset as a portable JSON document, optionally
//! encrypted with the configured backup password, and restores such
//! documents by merging them into the local store without destroying
//! existing records.

use crate::db::{ActivityRecord, ActivityType, DbExecutorError, Person, SettingsDocument};
use crate::mirror::{KEY_ACTIVITIES, KEY_ACTIVITY_TYPES, KEY_BACKUP_PASSWORD, KEY_PERSONS};
use crate::security::{self, CryptoError, EncryptedParts};
use crate::validation::{self, ValidationError};
use crate::AppContext;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// Marker identifying backup documents produced by this application.
pub const APP_MARKER: &str = "daily-activity-log";

/// Version of the plaintext backup document format.
pub const BACKUP_VERSION: &str = "2.0";

/// Version of the encrypted wrapper format.
pub const ENCRYPTED_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("invalid backup format: {0}")]
    InvalidFormat(String),
    #[error("decryption failed: wrong password or corrupted data")]
    Decryption,
    #[error("a password is required to decrypt this backup")]
    PasswordRequired,
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("store error: {0}")]
    Store(#[from] DbExecutorError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// The plaintext backup document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupDocument {
    pub activities: Vec<ActivityRecord>,
    pub persons: Vec<Person>,
    pub activity_types: Vec<ActivityType>,
    pub backup_password: Option<String>,
    pub backup_date: String,
    pub version: String,
    pub app_name: String,
}

/// The encrypted wrapper around a serialized backup document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBackup {
    pub is_encrypted: bool,
    pub encrypted_version: String,
    pub salt: String,
    pub iv: String,
    pub encrypted_data: String,
    pub backup_date: String,
    pub app_name: String,
}

impl EncryptedBackup {
    fn to_parts(&self) -> Result<EncryptedParts, BackupError> {
        let decode = |label: &str, b64: &str| {
            general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| BackupError::InvalidFormat(format!("bad base64 in {label}: {e}")))
        };
        Ok(EncryptedParts {
            salt: decode("salt", &self.salt)?,
            nonce: decode("iv", &self.iv)?,
            ciphertext: decode("encryptedData", &self.encrypted_data)?,
        })
    }
}

/// Closed classification of everything `restore` accepts as input.
#[derive(Debug, Clone)]
pub enum BackupPayload {
    /// Outer encrypted wrapper; must be decrypted and re-classified.
    Encrypted(EncryptedBackup),
    /// A full (or partial) plaintext backup document.
    Document(BackupDocument),
    /// Legacy format: a bare array of activity-shaped objects.
    LegacyActivities(Vec<ActivityRecord>),
}

/// What a restore changed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreSummary {
    pub new_activities: usize,
    pub persons_added: usize,
    pub activity_types_added: usize,
}

/// Classify a parsed JSON value against the closed set of recognized backup
/// shapes. Anything else is `InvalidFormat` and no merge is attempted.
pub fn classify(value: &Value) -> Result<BackupPayload, BackupError> {
    if let Some(items) = value.as_array() {
        // Legacy format: non-empty array whose first element looks like an
        // activity record.
        let looks_like_activity = items
            .first()
            .and_then(|v| v.get("activityName"))
            .is_some();
        if !looks_like_activity {
            return Err(BackupError::InvalidFormat(
                "array input is not a list of activity records".into(),
            ));
        }
        let records: Vec<ActivityRecord> = serde_json::from_value(value.clone())
            .map_err(|e| BackupError::InvalidFormat(format!("bad activity array: {e}")))?;
        return Ok(BackupPayload::LegacyActivities(records));
    }

    let obj = match value.as_object() {
        Some(obj) => obj,
        None => {
            return Err(BackupError::InvalidFormat(
                "backup must be a JSON object or array".into(),
            ))
        }
    };

    if obj.get("isEncrypted") == Some(&Value::Bool(true)) && obj.contains_key("encryptedData") {
        let wrapper: EncryptedBackup = serde_json::from_value(value.clone())
            .map_err(|e| BackupError::InvalidFormat(format!("bad encrypted wrapper: {e}")))?;
        return Ok(BackupPayload::Encrypted(wrapper));
    }

    let recognized = obj.get("activities").map(Value::is_array) == Some(true)
        || (obj.contains_key("persons") && obj.contains_key("activityTypes"))
        || obj.get("appName").and_then(Value::as_str) == Some(APP_MARKER)
        || obj.contains_key("backupDate");

    if !recognized {
        return Err(BackupError::InvalidFormat(
            "not a recognized backup document".into(),
        ));
    }

    let document: BackupDocument = serde_json::from_value(value.clone())
        .map_err(|e| BackupError::InvalidFormat(format!("bad backup document: {e}")))?;
    Ok(BackupPayload::Document(document))
}

/// Export the full dataset as a JSON string.
///
/// When a backup password is configured the document is serialized and then
/// encrypted with a fresh salt and nonce, so re-exporting identical content
/// produces different ciphertext every time.
pub async fn export(ctx: &AppContext) -> Result<String, BackupError> {
    let activities = ctx.store.run(|db| db.list_activities()).await?;
    let config = ctx.store.run(|db| db.load_config()).await?;

    let backup_date = chrono::Utc::now().to_rfc3339();
    let password = config.backup_password.clone();

    let document = BackupDocument {
        activities,
        persons: config.persons,
        activity_types: config.activity_types,
        backup_password: config.backup_password,
        backup_date: backup_date.clone(),
        version: BACKUP_VERSION.to_string(),
        app_name: APP_MARKER.to_string(),
    };
    let plaintext = serde_json::to_string_pretty(&document)?;

    let password = match password.filter(|p| !p.is_empty()) {
        Some(password) => password,
        None => {
            tracing::info!("exported {} activity records", document.activities.len());
            return Ok(plaintext);
        }
    };

    let parts = security::encrypt_backup(plaintext.as_bytes(), &password)
        .map_err(|e| BackupError::Encryption(e.to_string()))?;

    let wrapper = EncryptedBackup {
        is_encrypted: true,
        encrypted_version: ENCRYPTED_VERSION.to_string(),
        salt: general_purpose::STANDARD.encode(&parts.salt),
        iv: general_purpose::STANDARD.encode(&parts.nonce),
        encrypted_data: general_purpose::STANDARD.encode(&parts.ciphertext),
        backup_date,
        app_name: APP_MARKER.to_string(),
    };

    tracing::info!(
        "exported {} activity records (encrypted)",
        document.activities.len()
    );
    Ok(serde_json::to_string_pretty(&wrapper)?)
}

/// Parse, validate, decrypt and merge a backup document into the local
/// store. Strictly additive: existing local data is never overwritten or
/// deleted. Settings are committed first, then the merged activity set is
/// swapped in as one transaction.
pub async fn restore(
    ctx: &AppContext,
    input: &str,
    password: Option<&str>,
) -> Result<RestoreSummary, BackupError> {
    validation::validate_backup_size(input.len())?;

    let value: Value = serde_json::from_str(input)
        .map_err(|e| BackupError::InvalidFormat(format!("not valid JSON: {e}")))?;

    let payload = match classify(&value)? {
        BackupPayload::Encrypted(wrapper) => decrypt_payload(&wrapper, password)?,
        other => other,
    };

    let (incoming_activities, incoming_persons, incoming_types, incoming_password) = match payload {
        BackupPayload::Document(doc) => (
            doc.activities,
            doc.persons,
            doc.activity_types,
            doc.backup_password,
        ),
        BackupPayload::LegacyActivities(records) => (records, Vec::new(), Vec::new(), None),
        BackupPayload::Encrypted(_) => {
            return Err(BackupError::InvalidFormat(
                "nested encrypted wrapper".into(),
            ))
        }
    };

    let current_config = ctx.store.run(|db| db.load_config()).await?;
    let current_activities = ctx.store.run(|db| db.list_activities()).await?;

    let (merged_persons, persons_added) = merge_persons(&current_config.persons, incoming_persons);
    let (merged_types, activity_types_added) =
        merge_activity_types(&current_config.activity_types, incoming_types);
    let (merged_activities, new_activities) =
        merge_activities(&current_activities, incoming_activities);

    // Settings first, then the activity swap.
    let new_config = SettingsDocument {
        persons: merged_persons.clone(),
        activity_types: merged_types.clone(),
        backup_password: incoming_password
            .filter(|p| !p.is_empty())
            .or(current_config.backup_password),
    };
    let config_for_store = new_config.clone();
    ctx.store
        .run(move |db| db.save_config(&config_for_store))
        .await?;

    let activities_for_store = merged_activities.clone();
    ctx.store
        .run(move |db| db.replace_activities(&activities_for_store))
        .await?;

    ctx.mirror.write(KEY_ACTIVITIES, &merged_activities);
    ctx.mirror.write(KEY_PERSONS, &new_config.persons);
    ctx.mirror.write(KEY_ACTIVITY_TYPES, &new_config.activity_types);
    ctx.mirror
        .write(KEY_BACKUP_PASSWORD, &new_config.backup_password);

    tracing::info!(
        "restore merged {} new activities, {} persons, {} activity types",
        new_activities,
        persons_added,
        activity_types_added
    );
    Ok(RestoreSummary {
        new_activities,
        persons_added,
        activity_types_added,
    })
}

fn decrypt_payload(
    wrapper: &EncryptedBackup,
    password: Option<&str>,
) -> Result<BackupPayload, BackupError> {
    let password = password.ok_or(BackupError::PasswordRequired)?;
    let parts = wrapper.to_parts()?;

    let plaintext = match security::decrypt_backup(&parts, password) {
        Ok(plaintext) => plaintext,
        Err(CryptoError::InvalidNonce(n)) => {
            return Err(BackupError::InvalidFormat(format!(
                "bad nonce length: {n} bytes"
            )))
        }
        Err(_) => return Err(BackupError::Decryption),
    };

    let text = String::from_utf8(plaintext)
        .map_err(|_| BackupError::InvalidFormat("decrypted payload is not UTF-8".into()))?;
    let inner: Value = serde_json::from_str(&text)
        .map_err(|e| BackupError::InvalidFormat(format!("decrypted payload is not JSON: {e}")))?;

    classify(&inner)
}

/// Union of activity records by id.
///
/// A non-colliding incoming record is appended unchanged. An incoming record
/// is dropped only when a LOCAL record with the same id and the same
/// `person` exists (a true duplicate). Any other id collision is treated as
/// coincidental and the incoming record is kept under a fresh id, whether
/// the id belongs to a local record with a different person or was already
/// claimed by an earlier record of the same backup.
fn merge_activities(
    current: &[ActivityRecord],
    incoming: Vec<ActivityRecord>,
) -> (Vec<ActivityRecord>, usize) {
    let mut merged = current.to_vec();
    let mut ids: HashSet<String> = current.iter().map(|r| r.id.clone()).collect();
    let mut added = 0;

    for mut record in incoming {
        if record.id.is_empty() {
            record.id = Uuid::new_v4().to_string();
        }

        if ids.insert(record.id.clone()) {
            merged.push(record);
            added += 1;
            continue;
        }

        let duplicate_of_local = current
            .iter()
            .any(|r| r.id == record.id && r.person == record.person);
        if duplicate_of_local {
            continue;
        }

        record.id = Uuid::new_v4().to_string();
        ids.insert(record.id.clone());
        merged.push(record);
        added += 1;
    }

    (merged, added)
}

/// Union of persons by name; an incoming name that already exists locally
/// is dropped.
fn merge_persons(current: &[Person], incoming: Vec<Person>) -> (Vec<Person>, usize) {
    let mut merged = current.to_vec();
    let mut names: HashSet<String> = current.iter().map(|p| p.name.clone()).collect();
    let mut added = 0;

    for person in incoming {
        if names.insert(person.name.clone()) {
            merged.push(person);
            added += 1;
        }
    }

    (merged, added)
}

/// Union of activity types by name.
fn merge_activity_types(
    current: &[ActivityType],
    incoming: Vec<ActivityType>,
) -> (Vec<ActivityType>, usize) {
    let mut merged = current.to_vec();
    let mut names: HashSet<String> = current.iter().map(|t| t.name.clone()).collect();
    let mut added = 0;

    for entry in incoming {
        if names.insert(entry.name.clone()) {
            merged.push(entry);
            added += 1;
        }
    }

    (merged, added)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, person: &str) -> ActivityRecord {
        ActivityRecord {
            id: id.into(),
            person: person.into(),
            activity_name: "Chanting".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_appends_new_ids() {
        let local = vec![record("1", "A")];
        let (merged, added) = merge_activities(&local, vec![record("2", "B")]);
        assert_eq!(merged.len(), 2);
        assert_eq!(added, 1);
    }

    #[test]
    fn test_merge_drops_exact_duplicate() {
        let local = vec![record("1", "A")];
        let (merged, added) = merge_activities(&local, vec![record("1", "A")]);
        assert_eq!(merged.len(), 1);
        assert_eq!(added, 0);
    }

    #[test]
    fn test_merge_reassigns_id_on_coincidental_collision() {
        let local = vec![record("1", "A")];
        let (merged, added) = merge_activities(&local, vec![record("1", "B")]);
        assert_eq!(merged.len(), 2);
        assert_eq!(added, 1);
        // the incoming record kept its content under a fresh id
        let kept = merged.iter().find(|r| r.person == "B").unwrap();
        assert_ne!(kept.id, "1");
        assert!(!kept.id.is_empty());
    }

    #[test]
    fn test_merge_keeps_both_records_when_backup_reuses_an_id() {
        // two incoming records share an id but neither duplicates a local one
        let (merged, added) = merge_activities(&[], vec![record("1", "A"), record("1", "B")]);
        assert_eq!(added, 2);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().any(|r| r.person == "A"));
        assert!(merged.iter().any(|r| r.person == "B"));
        assert_ne!(merged[0].id, merged[1].id);
    }

    #[test]
    fn test_merge_self_is_idempotent() {
        let local = vec![record("1", "A"), record("2", "B")];
        let (merged, added) = merge_activities(&local, local.clone());
        assert_eq!(merged.len(), local.len());
        assert_eq!(added, 0);
    }

    #[test]
    fn test_merge_persons_union_by_name() {
        let local = vec![Person { name: "A".into() }];
        let (merged, added) = merge_persons(
            &local,
            vec![Person { name: "A".into() }, Person { name: "B".into() }],
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(added, 1);
    }

    #[test]
    fn test_classify_rejects_empty_object() {
        let err = classify(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, BackupError::InvalidFormat(_)));
    }

    #[test]
    fn test_classify_rejects_unrelated_object() {
        let err = classify(&serde_json::json!({"foo": 1})).unwrap_err();
        assert!(matches!(err, BackupError::InvalidFormat(_)));
    }

    #[test]
    fn test_classify_accepts_activities_array_field() {
        let payload = classify(&serde_json::json!({"activities": []})).unwrap();
        assert!(matches!(payload, BackupPayload::Document(_)));
    }

    #[test]
    fn test_classify_accepts_persons_and_types() {
        let payload =
            classify(&serde_json::json!({"persons": [], "activityTypes": []})).unwrap();
        assert!(matches!(payload, BackupPayload::Document(_)));
    }

    #[test]
    fn test_classify_accepts_app_marker_alone() {
        let payload = classify(&serde_json::json!({"appName": APP_MARKER})).unwrap();
        assert!(matches!(payload, BackupPayload::Document(_)));
    }

    #[test]
    fn test_classify_rejects_foreign_app_marker() {
        let err = classify(&serde_json::json!({"appName": "some-other-app"})).unwrap_err();
        assert!(matches!(err, BackupError::InvalidFormat(_)));
    }

    #[test]
    fn test_classify_accepts_backup_date_alone() {
        let payload =
            classify(&serde_json::json!({"backupDate": "2026-01-01T00:00:00Z"})).unwrap();
        assert!(matches!(payload, BackupPayload::Document(_)));
    }

    #[test]
    fn test_classify_accepts_legacy_array() {
        let payload = classify(&serde_json::json!([
            {"id": "x", "activityName": "Chanting", "person": "A"}
        ]))
        .unwrap();
        match payload {
            BackupPayload::LegacyActivities(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].activity_name, "Chanting");
            }
            other => panic!("expected legacy payload, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_rejects_empty_array() {
        let err = classify(&serde_json::json!([])).unwrap_err();
        assert!(matches!(err, BackupError::InvalidFormat(_)));
    }

    #[test]
    fn test_classify_detects_encrypted_wrapper() {
        let payload = classify(&serde_json::json!({
            "isEncrypted": true,
            "encryptedVersion": "1.0",
            "salt": "AA==",
            "iv": "AA==",
            "encryptedData": "AA==",
            "backupDate": "2026-01-01T00:00:00Z",
            "appName": APP_MARKER,
        }))
        .unwrap();
        assert!(matches!(payload, BackupPayload::Encrypted(_)));
    }
}
