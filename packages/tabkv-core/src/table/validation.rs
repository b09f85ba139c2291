//! Key, name, password and email checks.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::DbError;
use crate::types::{ItemKind, Schema};

const EMAIL_PATTERN: &str = r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$";

static EMAIL: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(EMAIL_PATTERN).ok());

/// Validates a Keystore key.
pub(crate) fn validate_key(key: &str) -> Result<(), DbError> {
    if key.is_empty() {
        return Err(DbError::KeyRequired);
    }
    if key.contains(['.', '*', '\t', '\n', '\r']) {
        return Err(DbError::KeyInvalid(key.to_string()));
    }
    Ok(())
}

/// Validates an AuthTable user name.
pub(crate) fn validate_name(name: &str) -> Result<(), DbError> {
    if name.is_empty() {
        return Err(DbError::KeyRequired);
    }
    if name.chars().any(char::is_whitespace) {
        return Err(DbError::NameInvalid(name.to_string()));
    }
    Ok(())
}

pub(crate) fn validate_password(password: &str, min_password: u32) -> Result<(), DbError> {
    if password.chars().count() < min_password as usize {
        return Err(DbError::PasswordLength(min_password));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<(), DbError> {
    match EMAIL.as_ref() {
        Some(re) if re.is_match(email) => Ok(()),
        Some(_) => Err(DbError::InvalidEmail),
        None => Err(DbError::Unexpected("email pattern failed to compile".to_string())),
    }
}

/// Returns the `data_index` of a top-level String item named `item`.
pub(crate) fn string_item_index(schema: &Schema, item: &str) -> Option<usize> {
    schema
        .get(item)
        .filter(|i| matches!(&i.kind, ItemKind::String(spec) if !spec.encrypted))
        .map(|i| i.data_index)
}

/// Returns the `data_index` of a valid alt-login item: a top-level, unique,
/// unencrypted String.
pub(crate) fn alt_login_index(schema: &Schema, item: &str) -> Result<usize, DbError> {
    schema
        .get(item)
        .filter(|i| matches!(&i.kind, ItemKind::String(spec) if spec.unique && !spec.encrypted))
        .map(|i| i.data_index)
        .ok_or_else(|| DbError::InvalidAltLoginItem(item.to_string()))
}
