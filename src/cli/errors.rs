//! CLI error types
//!
//! Every failure carries a stable code. Errors raised by the engine keep
//! their own code.

use std::fmt;
use std::io;

use crate::checksum::ChecksumError;
use crate::collection::CollectionError;
use crate::config::ConfigError;
use crate::mutation::MutationError;
use crate::store::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    Config,
    /// I/O error (stdin/stdout)
    Io,
    /// Malformed request line
    BadRequest,
    AlreadyInitialized,
    NotInitialized,
    /// No collection with the given name
    UnknownCollection,
    /// Collection name already taken
    DuplicateName,
}

impl CliErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config => "COLLDB_CLI_CONFIG_ERROR",
            Self::Io => "COLLDB_CLI_IO_ERROR",
            Self::BadRequest => "COLLDB_CLI_BAD_REQUEST",
            Self::AlreadyInitialized => "COLLDB_CLI_ALREADY_INITIALIZED",
            Self::NotInitialized => "COLLDB_CLI_NOT_INITIALIZED",
            Self::UnknownCollection => "COLLDB_CLI_UNKNOWN_COLLECTION",
            Self::DuplicateName => "COLLDB_CLI_DUPLICATE_NAME",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: &'static str,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
        }
    }

    /// Wraps an engine error, keeping its code.
    fn engine(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::Config, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::Io, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BadRequest, msg)
    }

    pub fn already_initialized() -> Self {
        Self::new(
            CliErrorCode::AlreadyInitialized,
            "Data directory already initialized",
        )
    }

    pub fn not_initialized() -> Self {
        Self::new(
            CliErrorCode::NotInitialized,
            "Data directory not initialized. Run 'colldb init' first.",
        )
    }

    pub fn unknown_collection(name: &str) -> Self {
        Self::new(
            CliErrorCode::UnknownCollection,
            format!("collection '{}' not found", name),
        )
    }

    pub fn duplicate_name(name: &str) -> Self {
        Self::new(
            CliErrorCode::DuplicateName,
            format!("collection '{}' already exists", name),
        )
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::bad_request(format!("JSON error: {}", e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::engine(e.code(), e.to_string())
    }
}

impl From<CollectionError> for CliError {
    fn from(e: CollectionError) -> Self {
        Self::engine(e.code(), e.to_string())
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        Self::engine(e.code().code(), e.to_string())
    }
}

impl From<MutationError> for CliError {
    fn from(e: MutationError) -> Self {
        Self::engine(e.code(), e.to_string())
    }
}

impl From<ChecksumError> for CliError {
    fn from(e: ChecksumError) -> Self {
        Self::engine(e.code(), e.to_string())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_codes_preserved() {
        let err: CliError = MutationError::NotFound("k1".into()).into();
        assert_eq!(err.code_str(), "COLLDB_DOCUMENT_NOT_FOUND");

        let err: CliError = CollectionError::IllegalName("9bad".into()).into();
        assert_eq!(err.code_str(), "COLLDB_ILLEGAL_NAME");
    }

    #[test]
    fn test_display_includes_code() {
        let err = CliError::unknown_collection("users");
        assert_eq!(err.to_string(), "COLLDB_CLI_UNKNOWN_COLLECTION: collection 'users' not found");
    }
}
