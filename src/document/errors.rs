//! Document construction errors

use thiserror::Error;

/// Result type for document construction
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Errors raised while building the body that will be persisted.
///
/// All variants are validation failures: they are detected before any
/// write happens and retrying with the same input cannot succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("document must be a JSON object")]
    DocumentTypeInvalid,

    #[error("invalid edge attribute '{0}'")]
    InvalidEdgeAttribute(&'static str),

    #[error("stored document lacks reserved attribute '{0}'")]
    MissingReservedAttribute(&'static str),

    #[error("nested objects exceed the merge depth limit")]
    NestingTooDeep,

    #[error("restored revision '{0}' is out of range")]
    RevisionOutOfRange(String),
}

impl DocumentError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            DocumentError::DocumentTypeInvalid => "COLLDB_DOCUMENT_TYPE_INVALID",
            DocumentError::InvalidEdgeAttribute(_) => "COLLDB_INVALID_EDGE_ATTRIBUTE",
            DocumentError::MissingReservedAttribute(_) => "COLLDB_DOCUMENT_CORRUPTED",
            DocumentError::NestingTooDeep => "COLLDB_DOCUMENT_TOO_DEEP",
            DocumentError::RevisionOutOfRange(_) => "COLLDB_DOCUMENT_REV_BAD",
        }
    }
}
