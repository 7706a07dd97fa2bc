//! Input validation for dailylog
//! Small checks shared by the registry, backup codec and CLI.

use thiserror::Error;

/// Maximum length for person / activity type names.
pub const MAX_NAME_LEN: usize = 200;

/// Minimum length for the backup password.
pub const MIN_BACKUP_PASSWORD_LEN: usize = 4;

/// Maximum size for an imported backup document (32MB)
pub const MAX_BACKUP_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Empty input not allowed")]
    EmptyInput,
    #[error("Input exceeds size limit: {size} bytes (max: {max} bytes)")]
    InputTooLarge { size: usize, max: usize },
    #[error("Invalid input format: {0}")]
    InvalidFormat(String),
    #[error("Password too short (min: {min} characters)")]
    PasswordTooShort { min: usize },
}

/// Validate a person / activity type name. Returns the trimmed name.
pub fn validate_entity_name(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyInput);
    }
    if trimmed.len() > MAX_NAME_LEN {
        return Err(ValidationError::InputTooLarge {
            size: trimmed.len(),
            max: MAX_NAME_LEN,
        });
    }
    Ok(trimmed.to_string())
}

/// Validate a backup password.
pub fn validate_backup_password(password: &str) -> Result<(), ValidationError> {
    if password.len() < MIN_BACKUP_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort {
            min: MIN_BACKUP_PASSWORD_LEN,
        });
    }
    Ok(())
}

/// Validate a calendar date in `YYYY-MM-DD` form.
pub fn validate_date(date: &str) -> Result<(), ValidationError> {
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| ValidationError::InvalidFormat(format!("not a YYYY-MM-DD date: {date}")))
}

/// Validate a local time-of-day in `HH:MM` form.
pub fn validate_time_of_day(time: &str) -> Result<(), ValidationError> {
    chrono::NaiveTime::parse_from_str(time, "%H:%M")
        .map(|_| ())
        .map_err(|_| ValidationError::InvalidFormat(format!("not an HH:MM time: {time}")))
}

/// Cap the size of an imported backup document.
pub fn validate_backup_size(size: usize) -> Result<(), ValidationError> {
    if size > MAX_BACKUP_BYTES {
        return Err(ValidationError::InputTooLarge {
            size,
            max: MAX_BACKUP_BYTES,
        });
    }
    Ok(())
}
