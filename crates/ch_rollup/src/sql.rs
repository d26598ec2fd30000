//! Identifier validation and quoting.
//!
//! Identifiers cannot be bound as query parameters, so every database, table
//! and column name is checked against [`ENTITY_NAME_PATTERN`] before it is
//! interpolated into SQL text. Values always travel as bound parameters.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ConfigError;

/// Accepted shape of database, table and column names.
pub const ENTITY_NAME_PATTERN: &str = r"^[a-zA-Z_][a-zA-Z0-9_]{0,63}$";

static ENTITY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(ENTITY_NAME_PATTERN).expect("entity name pattern compiles")
});

/// Returns `true` when `name` can be safely interpolated as an identifier.
pub fn is_valid_entity_name(name: &str) -> bool {
    ENTITY_NAME.is_match(name)
}

/// Validates a database/table/column name; `what` names the entity in errors.
pub fn validate_entity_name(what: &'static str, name: &str) -> Result<(), ConfigError> {
    if is_valid_entity_name(name) {
        return Ok(());
    }
    Err(ConfigError::InvalidName {
        what,
        name: name.to_string(),
    })
}

/// Quotes a single identifier. The argument must already be validated.
pub fn quoted_entity(entity: &str) -> String {
    format!("\"{entity}\"")
}

/// Quotes a `database.entity` pair. Arguments must already be validated.
pub fn quoted_database_entity(database: &str, entity: &str) -> String {
    format!("{}.{}", quoted_entity(database), quoted_entity(entity))
}
