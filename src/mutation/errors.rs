//! Document mutation errors

use thiserror::Error;

use crate::collection::{CollectionError, KeyError};
use crate::document::DocumentError;
use crate::revision::RevisionId;
use crate::store::StorageError;

/// Result type for document operations
pub type MutationResult<T> = Result<T, MutationError>;

/// Broad category of a failed operation, deciding what a caller can do
/// about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is wrong; retrying it unchanged cannot succeed.
    Validation,
    /// The request raced another writer; retrying with fresh data may succeed.
    Conflict,
    NotFound,
    Forbidden,
    /// The engine or the physical store failed.
    Internal,
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("document key is missing")]
    DocumentKeyMissing,

    #[error("document '{0}' not found")]
    NotFound(String),

    #[error("conflict on document '{key}': expected revision {expected}, found {actual}")]
    Conflict {
        key: String,
        expected: RevisionId,
        actual: RevisionId,
    },

    #[error("unique constraint violated: document '{0}' already exists")]
    UniqueConstraintViolated(String),

    #[error("must not change the value of a shard key attribute")]
    ShardingKeysMustNotChange,

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl MutationError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            MutationError::DocumentKeyMissing => "COLLDB_DOCUMENT_HANDLE_BAD",
            MutationError::NotFound(_) => "COLLDB_DOCUMENT_NOT_FOUND",
            MutationError::Conflict { .. } => "COLLDB_CONFLICT",
            MutationError::UniqueConstraintViolated(_) => "COLLDB_UNIQUE_CONSTRAINT_VIOLATED",
            MutationError::ShardingKeysMustNotChange => "COLLDB_MUST_NOT_CHANGE_SHARDING_ATTRIBUTES",
            MutationError::Document(e) => e.code(),
            MutationError::Key(e) => e.code(),
            MutationError::Collection(e) => e.code(),
            MutationError::Storage(e) => e.code().code(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MutationError::DocumentKeyMissing | MutationError::Key(_) => ErrorKind::Validation,
            MutationError::Document(DocumentError::MissingReservedAttribute(_)) => ErrorKind::Internal,
            MutationError::Document(_) => ErrorKind::Validation,
            MutationError::NotFound(_) => ErrorKind::NotFound,
            MutationError::Conflict { .. }
            | MutationError::UniqueConstraintViolated(_)
            | MutationError::ShardingKeysMustNotChange => ErrorKind::Conflict,
            MutationError::Collection(e) => match e {
                CollectionError::NotFound(_) => ErrorKind::NotFound,
                CollectionError::Forbidden(_) => ErrorKind::Forbidden,
                CollectionError::IllegalName(_)
                | CollectionError::BadParameter(_)
                | CollectionError::InvalidKeyOptions(_) => ErrorKind::Validation,
                CollectionError::Storage(e) if e.is_lock_timeout() => ErrorKind::Conflict,
                _ => ErrorKind::Internal,
            },
            MutationError::Storage(e) if e.is_lock_timeout() => ErrorKind::Conflict,
            MutationError::Storage(_) => ErrorKind::Internal,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, MutationError::Conflict { .. })
    }
}
