//! Structured error types for stores, bundles and recorded import failures.

use crate::types::EntityKind;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors
    MissingRequiredField,
    InvalidFieldType,
    InvalidFieldValue,
    DuplicateIdInBundle,
    SchemaVersion,
    MetadataMismatch,
    MalformedBundle,
    ErrorThresholdExceeded,

    // Conflict outcomes
    BlockedByConflict,
    BrokenReference,

    // Write errors
    WriteRejected,
    Unauthorized,
    Unavailable,

    // Internal errors
    BackupFailed,
    IdGenerationFailed,
    InternalError,
}

/// A failure recorded against one entity (or the run) during an import.
///
/// Recorded errors never abort the loop on their own; the executor decides
/// whether a failure is terminal.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImportError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl ImportError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind: None,
            entity_id: None,
        }
    }

    pub fn with_entity(mut self, kind: EntityKind, entity_id: impl Into<String>) -> Self {
        self.kind = Some(kind);
        self.entity_id = Some(entity_id.into());
        self
    }

    // Convenience constructors

    pub fn blocked(kind: EntityKind, entity_id: &str, reason: &str) -> Self {
        Self::new(
            ErrorCode::BlockedByConflict,
            format!("{} {} not written: {}", kind, entity_id, reason),
        )
        .with_entity(kind, entity_id)
    }

    pub fn dangling_required(kind: EntityKind, entity_id: &str, target_id: &str) -> Self {
        Self::new(
            ErrorCode::BrokenReference,
            format!(
                "{} {} requires {} which was not written",
                kind, entity_id, target_id
            ),
        )
        .with_entity(kind, entity_id)
    }

    pub fn from_store(kind: EntityKind, entity_id: &str, err: &StoreError) -> Self {
        let code = match err {
            StoreError::Unauthorized(_) => ErrorCode::Unauthorized,
            StoreError::Unavailable(_) => ErrorCode::Unavailable,
            _ => ErrorCode::WriteRejected,
        };
        Self::new(code, err.to_string()).with_entity(kind, entity_id)
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ImportError {}

/// Errors raised by an entity store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: EntityKind, id: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("store for {expected} cannot hold a {actual}")]
    WrongKind {
        expected: EntityKind,
        actual: EntityKind,
    },

    #[error("write rejected: {0}")]
    Rejected(String),

    /// Authorization was lost. Unrecoverable for the current run.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// The backing store cannot be reached or written. Unrecoverable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this failure must halt an import instead of skipping one entity.
    pub fn is_fatal(&self) -> bool {
        match self {
            StoreError::Unauthorized(_) | StoreError::Unavailable(_) => true,
            StoreError::Database(err) => matches!(
                err.sqlite_error_code(),
                Some(
                    rusqlite::ErrorCode::ReadOnly
                        | rusqlite::ErrorCode::CannotOpen
                        | rusqlite::ErrorCode::PermissionDenied
                        | rusqlite::ErrorCode::AuthorizationForStatementDenied
                        | rusqlite::ErrorCode::DiskFull
                        | rusqlite::ErrorCode::SystemIoFailure
                )
            ),
            StoreError::Io(_) => true,
            _ => false,
        }
    }
}

/// Errors reading or writing a bundle envelope.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundle is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bundle io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bundle has no `{0}` section")]
    MissingSection(&'static str),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_store_errors() {
        assert!(StoreError::Unauthorized("token expired".into()).is_fatal());
        assert!(StoreError::Unavailable("offline".into()).is_fatal());
        assert!(!StoreError::Rejected("bad field".into()).is_fatal());
        assert!(
            !StoreError::AlreadyExists {
                kind: EntityKind::Task,
                id: "t1".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_import_error_from_store_maps_code() {
        let err = ImportError::from_store(
            EntityKind::Task,
            "t1",
            &StoreError::Unauthorized("session ended".into()),
        );
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert_eq!(err.entity_id.as_deref(), Some("t1"));

        let err = ImportError::from_store(EntityKind::Mood, "m1", &StoreError::Rejected("x".into()));
        assert_eq!(err.code, ErrorCode::WriteRejected);
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::DuplicateIdInBundle).unwrap();
        assert_eq!(json, "\"DUPLICATE_ID_IN_BUNDLE\"");
    }
}
