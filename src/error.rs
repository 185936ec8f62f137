//! Error type shared by the storage layer and the typed client.

use rusqlite::ffi;
use thiserror::Error;

/// Errors produced by SQLite operations and the client built on top of them.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique index or primary key rejected the write.
    #[error("Unique constraint failed on the fields: ({})", quote_fields(.fields))]
    UniqueViolation { fields: Vec<String> },

    /// A foreign key rejected the write or delete.
    #[error("Foreign key constraint failed")]
    ForeignKeyViolation,

    /// The record a unique operation targeted does not exist.
    #[error("{message}")]
    RecordNotFound { message: String },

    /// The request cannot be expressed against this schema.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A column held a value of an unexpected type.
    #[error("Failed to decode column `{column}`: {reason}")]
    Decode { column: String, reason: String },

    /// The service was used before `start` or after `stop`.
    #[error("Database connection is not open")]
    NotStarted,

    /// Configuration could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn not_found(message: impl Into<String>) -> Self {
        StoreError::RecordNotFound {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        StoreError::InvalidOperation(message.into())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &err {
            match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    let fields = message
                        .as_deref()
                        .map(constraint_fields)
                        .unwrap_or_default();
                    return StoreError::UniqueViolation { fields };
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => return StoreError::ForeignKeyViolation,
                ffi::SQLITE_CONSTRAINT_CHECK => {
                    let detail = message.as_deref().unwrap_or("CHECK constraint failed");
                    return StoreError::InvalidOperation(format!("value out of range ({detail})"));
                }
                _ => {}
            }
        }
        StoreError::Sqlite(err)
    }
}

/// Extracts column names from messages like
/// `UNIQUE constraint failed: User.age, User.name`.
fn constraint_fields(message: &str) -> Vec<String> {
    let Some((_, columns)) = message.split_once(": ") else {
        return Vec::new();
    };
    columns
        .split(',')
        .map(str::trim)
        .filter(|column| !column.is_empty())
        .map(|column| {
            column
                .rsplit_once('.')
                .map_or(column, |(_, name)| name)
                .to_string()
        })
        .collect()
}

fn quote_fields(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| format!("`{field}`"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_and_composite_constraint_messages() {
        assert_eq!(
            constraint_fields("UNIQUE constraint failed: User.email"),
            vec!["email"]
        );
        assert_eq!(
            constraint_fields("UNIQUE constraint failed: User.age, User.name"),
            vec!["age", "name"]
        );
        assert!(constraint_fields("constraint failed").is_empty());
    }

    #[test]
    fn unique_violation_message_lists_fields() {
        let err = StoreError::UniqueViolation {
            fields: vec!["age".into(), "name".into()],
        };
        assert_eq!(
            err.to_string(),
            "Unique constraint failed on the fields: (`age`,`name`)"
        );
    }
}
