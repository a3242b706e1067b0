//! Checksum errors

use thiserror::Error;

use crate::collection::CollectionError;
use crate::store::StorageError;

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("reported checksum must be a string")]
    WrongChecksumFormat,

    #[error("wrong checksum: local {expected}, reported {actual}")]
    WrongChecksum { expected: String, actual: String },

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ChecksumError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            ChecksumError::WrongChecksumFormat => "COLLDB_WRONG_CHECKSUM_FORMAT",
            ChecksumError::WrongChecksum { .. } => "COLLDB_WRONG_CHECKSUM",
            ChecksumError::Collection(e) => e.code(),
            ChecksumError::Storage(e) => e.code().code(),
        }
    }
}
