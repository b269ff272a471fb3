//! Shared type definitions for the database layer.

use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Failed to encode column {column}: {source}")]
    Encode {
        column: &'static str,
        source: serde_json::Error,
    },
}

impl DbError {
    /// True when SQLite rejected the statement because of a UNIQUE, FOREIGN KEY,
    /// NOT NULL or CHECK constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

/// Decode a JSON text column holding a list of strings (`permissions`, `read_by`).
pub(crate) fn decode_string_list(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Vec<String>> {
    match raw {
        None => Ok(Vec::new()),
        Some(text) if text.trim().is_empty() => Ok(Vec::new()),
        Some(text) => serde_json::from_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

/// Encode a list of strings for storage in a JSON text column.
pub(crate) fn encode_string_list(column: &'static str, values: &[String]) -> Result<String, DbError> {
    serde_json::to_string(values).map_err(|source| DbError::Encode { column, source })
}
