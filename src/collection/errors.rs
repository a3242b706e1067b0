//! Collection handle errors

use thiserror::Error;

use super::status::CollectionStatus;
use crate::store::StorageError;

/// Result type for collection-level operations
pub type CollectionResult<T> = Result<T, CollectionError>;

/// Errors raised by the collection handle, its lifecycle and its
/// configuration.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("collection '{0}' is corrupted")]
    Corrupted(String),

    #[error("collection '{0}' not found")]
    NotFound(String),

    #[error("illegal collection name '{0}'")]
    IllegalName(String),

    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("collection '{name}' has a too old version {version}")]
    TooOldVersion { name: String, version: u32 },

    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidStatusTransition {
        from: CollectionStatus,
        to: CollectionStatus,
    },

    #[error("invalid key generator options: {0}")]
    InvalidKeyOptions(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CollectionError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            CollectionError::Corrupted(_) => "COLLDB_CORRUPTED_COLLECTION",
            CollectionError::NotFound(_) => "COLLDB_DATA_SOURCE_NOT_FOUND",
            CollectionError::IllegalName(_) => "COLLDB_ILLEGAL_NAME",
            CollectionError::BadParameter(_) => "COLLDB_BAD_PARAMETER",
            CollectionError::Forbidden(_) => "COLLDB_FORBIDDEN",
            CollectionError::NotImplemented(_) => "COLLDB_NOT_IMPLEMENTED",
            CollectionError::TooOldVersion { .. } => "COLLDB_COLLECTION_TOO_OLD",
            CollectionError::InvalidStatusTransition { .. } => "COLLDB_INVALID_STATUS_TRANSITION",
            CollectionError::InvalidKeyOptions(_) => "COLLDB_INVALID_KEY_GENERATOR",
            CollectionError::Storage(e) => e.code().code(),
        }
    }
}

/// Errors raised while generating or validating document keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("illegal document key '{0}'")]
    BadKey(String),

    #[error("collection does not allow user-defined keys")]
    UnexpectedKey,

    #[error("key generator is out of keys")]
    OutOfKeys,
}

impl KeyError {
    pub fn code(&self) -> &'static str {
        match self {
            KeyError::BadKey(_) => "COLLDB_DOCUMENT_KEY_BAD",
            KeyError::UnexpectedKey => "COLLDB_DOCUMENT_KEY_UNEXPECTED",
            KeyError::OutOfKeys => "COLLDB_OUT_OF_KEYS",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_code_passes_through() {
        let err = CollectionError::from(StorageError::unavailable("gone"));
        assert_eq!(err.code(), "COLLDB_STORAGE_UNAVAILABLE");
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            CollectionError::Corrupted("c".into()).code(),
            "COLLDB_CORRUPTED_COLLECTION"
        );
        assert_eq!(KeyError::UnexpectedKey.code(), "COLLDB_DOCUMENT_KEY_UNEXPECTED");
    }
}
