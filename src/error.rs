//! Error types for the sync layer.
//!
//! Errors are classified by where they are raised:
//! - Validation: a required field is missing or malformed; caught before any remote call
//! - Remote: the backing store rejected the operation (constraint, I/O, connection)
//! - NotFound: the update target does not exist

use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("No {table} row with id {id}")]
    NotFound { table: &'static str, id: String },
}

impl SyncError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SyncError::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorType {
        match self {
            SyncError::Validation(_) => ErrorType::Validation,
            SyncError::Remote(_) => ErrorType::Remote,
            SyncError::NotFound { .. } => ErrorType::NotFound,
        }
    }

    /// Remote failures may succeed when the user triggers the action again.
    /// Nothing in this layer retries on its own.
    pub fn can_retry(&self) -> bool {
        matches!(self, SyncError::Remote(_))
    }

    pub fn is_user_fixable(&self) -> bool {
        matches!(self, SyncError::Validation(_))
    }

    /// Short hint a view can show next to the message.
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            SyncError::Validation(_) => "Fill in the required fields and submit again.",
            SyncError::Remote(_) => "Check your connection and try again.",
            SyncError::NotFound { .. } => "The item was removed elsewhere. Refresh the page.",
        }
    }
}

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        if err.is_constraint_violation() {
            return SyncError::Remote(format!("constraint violation: {}", err));
        }
        SyncError::Remote(err.to_string())
    }
}

/// Serializable error representation for a view layer (toast, inline banner).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreErrorView {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Validation,
    Remote,
    NotFound,
}

impl From<&SyncError> for StoreErrorView {
    fn from(err: &SyncError) -> Self {
        StoreErrorView {
            message: err.to_string(),
            error_type: err.kind(),
            can_retry: err.can_retry(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
