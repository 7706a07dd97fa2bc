//! Reference integrity engine
//!
//! Persons and activity types are referenced from activity records by name
//! (denormalized). This module owns the settings document that holds both
//! lists and keeps the records consistent: a rename is propagated to every
//! referencing record, a delete cascades to them.
//!
//! Propagation and cascades iterate sequentially and are best-effort per
//! record: an individual failure is reported, prior updates are not rolled
//! back.

use crate::db::{
    ActivityPatch, ActivityRecord, ActivityType, DbExecutorError, Person, SettingsDocument,
    LOCAL_USER,
};
use crate::mirror::{KEY_ACTIVITIES, KEY_ACTIVITY_TYPES, KEY_BACKUP_PASSWORD, KEY_PERSONS};
use crate::validation::{self, ValidationError};
use crate::AppContext;
use thiserror::Error;

/// Reference entities seeded into an empty settings document.
pub const DEFAULT_PERSONS: &[&str] = &["Teacher", "Student", "Visitor"];
pub const DEFAULT_ACTIVITY_TYPES: &[&str] =
    &["Sitting meditation", "Walking meditation", "Chanting"];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("name already exists: {0}")]
    DuplicateName(String),
    #[error("no such entry: {0}")]
    UnknownName(String),
    #[error("operation already in flight: {0}")]
    OperationInFlight(String),
    #[error(transparent)]
    Store(#[from] DbExecutorError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Which denormalized field an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefField {
    Person,
    ActivityType,
}

impl RefField {
    fn label(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::ActivityType => "activity-type",
        }
    }

    fn of<'r>(self, record: &'r ActivityRecord) -> &'r str {
        match self {
            Self::Person => &record.person,
            Self::ActivityType => &record.activity_name,
        }
    }

    fn patch(self, value: &str, now: &str) -> ActivityPatch {
        let mut patch = ActivityPatch {
            updated_at: Some(now.to_string()),
            updated_by: Some(LOCAL_USER.to_string()),
            ..Default::default()
        };
        match self {
            Self::Person => patch.person = Some(value.to_string()),
            Self::ActivityType => patch.activity_name = Some(value.to_string()),
        }
        patch
    }

    fn names(self, config: &SettingsDocument) -> Vec<String> {
        match self {
            Self::Person => config.persons.iter().map(|p| p.name.clone()).collect(),
            Self::ActivityType => config
                .activity_types
                .iter()
                .map(|t| t.name.clone())
                .collect(),
        }
    }

    fn set_names(self, config: &mut SettingsDocument, names: Vec<String>) {
        match self {
            Self::Person => config.persons = names.into_iter().map(|name| Person { name }).collect(),
            Self::ActivityType => {
                config.activity_types =
                    names.into_iter().map(|name| ActivityType { name }).collect()
            }
        }
    }

    fn mirror_key(self) -> &'static str {
        match self {
            Self::Person => KEY_PERSONS,
            Self::ActivityType => KEY_ACTIVITY_TYPES,
        }
    }
}

/// One record that could not be updated or deleted during a cascade.
#[derive(Debug, Clone)]
pub struct CascadeFailure {
    pub id: String,
    pub message: String,
}

/// Outcome of a rename propagation or cascade delete: how many records were
/// touched and which ones failed. Failures do not roll back prior updates.
#[derive(Debug, Clone, Default)]
pub struct CascadeOutcome {
    pub affected: usize,
    pub failures: Vec<CascadeFailure>,
}

async fn save_config_and_mirror(
    ctx: &AppContext,
    config: SettingsDocument,
) -> Result<(), RegistryError> {
    let for_store = config.clone();
    ctx.store.run(move |db| db.save_config(&for_store)).await?;

    ctx.mirror.write(KEY_PERSONS, &config.persons);
    ctx.mirror.write(KEY_ACTIVITY_TYPES, &config.activity_types);
    ctx.mirror.write(KEY_BACKUP_PASSWORD, &config.backup_password);
    Ok(())
}

async fn refresh_activity_mirror(ctx: &AppContext) {
    match ctx.store.run(|db| db.list_activities()).await {
        Ok(activities) => ctx.mirror.write(KEY_ACTIVITIES, &activities),
        Err(e) => tracing::warn!("skipping activity mirror refresh: {}", e),
    }
}

async fn add_or_rename(
    ctx: &AppContext,
    field: RefField,
    name: &str,
    previous: Option<&str>,
) -> Result<CascadeOutcome, RegistryError> {
    let name = validation::validate_entity_name(name)?;

    let mut config = ctx.store.run(|db| db.load_config()).await?;
    let mut names = field.names(&config);

    match previous {
        None => {
            if names.iter().any(|n| n == &name) {
                return Err(RegistryError::DuplicateName(name));
            }
            names.push(name.clone());
            field.set_names(&mut config, names);
            save_config_and_mirror(ctx, config).await?;

            tracing::info!("added {} '{}'", field.label(), name);
            Ok(CascadeOutcome::default())
        }
        Some(previous) => {
            let index = names
                .iter()
                .position(|n| n.as_str() == previous)
                .ok_or_else(|| RegistryError::UnknownName(previous.to_string()))?;

            if name != previous && names.iter().any(|n| n == &name) {
                return Err(RegistryError::DuplicateName(name));
            }

            names[index] = name.clone();
            field.set_names(&mut config, names);
            save_config_and_mirror(ctx, config).await?;

            if name == previous {
                return Ok(CascadeOutcome::default());
            }

            let outcome = propagate_rename(ctx, field, previous, &name).await?;
            tracing::info!(
                "renamed {} '{}' -> '{}', {} records updated, {} failures",
                field.label(),
                previous,
                name,
                outcome.affected,
                outcome.failures.len()
            );
            Ok(outcome)
        }
    }
}

/// Rewrite every activity record referencing `previous` to `name`,
/// refreshing the update attribution. Sequential, best-effort per record.
async fn propagate_rename(
    ctx: &AppContext,
    field: RefField,
    previous: &str,
    name: &str,
) -> Result<CascadeOutcome, RegistryError> {
    let all = ctx.store.run(|db| db.list_activities()).await?;
    let now = chrono::Utc::now().to_rfc3339();

    let mut outcome = CascadeOutcome::default();
    for record in all.iter().filter(|r| field.of(r) == previous) {
        let id = record.id.clone();
        let patch = field.patch(name, &now);
        let update_id = id.clone();
        let result = ctx
            .store
            .run(move |db| db.update_activity(&update_id, &patch))
            .await;

        match result {
            Ok(()) => outcome.affected += 1,
            Err(e) => outcome.failures.push(CascadeFailure {
                id,
                message: e.to_string(),
            }),
        }
    }

    refresh_activity_mirror(ctx).await;
    Ok(outcome)
}

async fn delete_entity(
    ctx: &AppContext,
    field: RefField,
    name: &str,
) -> Result<CascadeOutcome, RegistryError> {
    let guard_key = format!("delete-{}:{}", field.label(), name);
    let _guard = ctx
        .guards
        .try_acquire(&guard_key)
        .ok_or_else(|| RegistryError::OperationInFlight(guard_key.clone()))?;

    let mut config = ctx.store.run(|db| db.load_config()).await?;
    let mut names = field.names(&config);
    let before = names.len();
    names.retain(|n| n.as_str() != name);
    if names.len() == before {
        return Err(RegistryError::UnknownName(name.to_string()));
    }
    field.set_names(&mut config, names);
    save_config_and_mirror(ctx, config).await?;

    // Cascade: delete every referencing record, one at a time.
    let all = ctx.store.run(|db| db.list_activities()).await?;
    let mut outcome = CascadeOutcome::default();
    for record in all.iter().filter(|r| field.of(r) == name) {
        let id = record.id.clone();
        let delete_id = id.clone();
        let result = ctx
            .store
            .run(move |db| db.delete_activity(&delete_id))
            .await;

        match result {
            Ok(()) => outcome.affected += 1,
            Err(e) => outcome.failures.push(CascadeFailure {
                id,
                message: e.to_string(),
            }),
        }
    }

    refresh_activity_mirror(ctx).await;
    tracing::info!(
        "deleted {} '{}', cascaded to {} records, {} failures",
        field.label(),
        name,
        outcome.affected,
        outcome.failures.len()
    );
    Ok(outcome)
}

/// Add a person, or rename one when `previous` is given. A rename is
/// propagated to every activity record referencing the old name.
pub async fn add_or_rename_person(
    ctx: &AppContext,
    name: &str,
    previous: Option<&str>,
) -> Result<CascadeOutcome, RegistryError> {
    add_or_rename(ctx, RefField::Person, name, previous).await
}

/// Add an activity type, or rename one when `previous` is given.
pub async fn add_or_rename_activity_type(
    ctx: &AppContext,
    name: &str,
    previous: Option<&str>,
) -> Result<CascadeOutcome, RegistryError> {
    add_or_rename(ctx, RefField::ActivityType, name, previous).await
}

/// Remove a person and cascade-delete every activity record referencing it.
/// Unconditional once invoked; any confirmation happens before the call.
pub async fn delete_person(ctx: &AppContext, name: &str) -> Result<CascadeOutcome, RegistryError> {
    delete_entity(ctx, RefField::Person, name).await
}

/// Remove an activity type and cascade-delete its referencing records.
pub async fn delete_activity_type(
    ctx: &AppContext,
    name: &str,
) -> Result<CascadeOutcome, RegistryError> {
    delete_entity(ctx, RefField::ActivityType, name).await
}

/// Count activity records referencing a person. Used by callers to build
/// a confirmation prompt before a cascade delete.
pub async fn activity_count_by_person(
    ctx: &AppContext,
    name: &str,
) -> Result<usize, RegistryError> {
    let all = ctx.store.run(|db| db.list_activities()).await?;
    Ok(all.iter().filter(|r| r.person == name).count())
}

/// Count activity records referencing an activity type.
pub async fn activity_count_by_type(
    ctx: &AppContext,
    name: &str,
) -> Result<usize, RegistryError> {
    let all = ctx.store.run(|db| db.list_activities()).await?;
    Ok(all.iter().filter(|r| r.activity_name == name).count())
}

/// Install the default reference entities into an empty settings document.
/// Lists that already have entries are left alone.
pub async fn seed_defaults(ctx: &AppContext) -> Result<(), RegistryError> {
    let mut config = ctx.store.run(|db| db.load_config()).await?;
    let mut changed = false;

    if config.persons.is_empty() {
        config.persons = DEFAULT_PERSONS
            .iter()
            .map(|&name| Person { name: name.into() })
            .collect();
        changed = true;
    }
    if config.activity_types.is_empty() {
        config.activity_types = DEFAULT_ACTIVITY_TYPES
            .iter()
            .map(|&name| ActivityType { name: name.into() })
            .collect();
        changed = true;
    }

    if changed {
        tracing::info!("seeded default reference entities");
    }
    save_config_and_mirror(ctx, config).await
}

/// Replace the person list with the defaults wholesale. Does not cascade.
pub async fn reset_persons(ctx: &AppContext) -> Result<(), RegistryError> {
    let mut config = ctx.store.run(|db| db.load_config()).await?;
    config.persons = DEFAULT_PERSONS
        .iter()
        .map(|&name| Person { name: name.into() })
        .collect();
    save_config_and_mirror(ctx, config).await
}

/// Replace the activity type list with the defaults wholesale.
pub async fn reset_activity_types(ctx: &AppContext) -> Result<(), RegistryError> {
    let mut config = ctx.store.run(|db| db.load_config()).await?;
    config.activity_types = DEFAULT_ACTIVITY_TYPES
        .iter()
        .map(|&name| ActivityType { name: name.into() })
        .collect();
    save_config_and_mirror(ctx, config).await
}

/// Set or clear the backup password on the settings document.
pub async fn set_backup_password(
    ctx: &AppContext,
    password: Option<&str>,
) -> Result<(), RegistryError> {
    if let Some(password) = password {
        validation::validate_backup_password(password)?;
    }

    let mut config = ctx.store.run(|db| db.load_config()).await?;
    config.backup_password = password.map(str::to_string);
    save_config_and_mirror(ctx, config).await?;

    tracing::info!(
        "backup password {}",
        if password.is_some() { "set" } else { "cleared" }
    );
    Ok(())
}
