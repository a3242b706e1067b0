//! Physical store error types
//!
//! Error codes:
//! - COLLDB_STORAGE_IO_ERROR (ERROR severity)
//! - COLLDB_STORAGE_WRITE_FAILED (ERROR severity)
//! - COLLDB_STORAGE_READ_FAILED (ERROR severity)
//! - COLLDB_STORAGE_UNAVAILABLE (ERROR severity)
//! - COLLDB_STORAGE_INVALID_PROPERTIES (ERROR severity)
//! - COLLDB_LOCK_TIMEOUT (ERROR severity)
//! - COLLDB_DATA_CORRUPTION (FATAL severity)

use std::fmt;
use std::io;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, the collection stays usable
    Error,
    /// Stored data can no longer be trusted
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorCode {
    /// Disk I/O failure
    IoError,
    /// Document or definition write failed
    WriteFailed,
    /// Document read failed
    ReadFailed,
    /// Store is unloaded, closed or destroyed
    Unavailable,
    /// Engine properties rejected
    InvalidProperties,
    /// Collection write lock not acquired in time
    LockTimeout,
    /// Record checksum failure or unreadable record
    DataCorruption,
}

impl StorageErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            StorageErrorCode::IoError => "COLLDB_STORAGE_IO_ERROR",
            StorageErrorCode::WriteFailed => "COLLDB_STORAGE_WRITE_FAILED",
            StorageErrorCode::ReadFailed => "COLLDB_STORAGE_READ_FAILED",
            StorageErrorCode::Unavailable => "COLLDB_STORAGE_UNAVAILABLE",
            StorageErrorCode::InvalidProperties => "COLLDB_STORAGE_INVALID_PROPERTIES",
            StorageErrorCode::LockTimeout => "COLLDB_LOCK_TIMEOUT",
            StorageErrorCode::DataCorruption => "COLLDB_DATA_CORRUPTION",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            StorageErrorCode::DataCorruption => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for StorageErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error raised by a physical store. `details` carries machine-readable
/// context such as the byte offset of a corrupt record.
#[derive(Debug)]
pub struct StorageError {
    code: StorageErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl StorageError {
    fn with_code(code: StorageErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::with_code(StorageErrorCode::IoError, message)
        }
    }

    pub fn write_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::with_code(StorageErrorCode::WriteFailed, message)
        }
    }

    /// Write failure raised by the store itself
    pub fn write_failed_no_source(message: impl Into<String>) -> Self {
        Self::with_code(StorageErrorCode::WriteFailed, message)
    }

    pub fn read_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::with_code(StorageErrorCode::ReadFailed, message)
        }
    }

    /// The store cannot serve requests in its current state
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with_code(StorageErrorCode::Unavailable, message)
    }

    /// Engine properties were rejected
    pub fn invalid_properties(message: impl Into<String>) -> Self {
        Self::with_code(StorageErrorCode::InvalidProperties, message)
    }

    /// The collection write lock was not acquired in time
    pub fn lock_timeout(timeout: Duration) -> Self {
        Self {
            details: Some(format!("timeout_ms: {}", timeout.as_millis())),
            ..Self::with_code(
                StorageErrorCode::LockTimeout,
                "timed out waiting for the collection write lock",
            )
        }
    }

    /// An armed fail point fired
    pub fn injected(point: &str) -> Self {
        Self {
            details: Some(format!("fail_point: {}", point)),
            ..Self::with_code(StorageErrorCode::WriteFailed, "injected failure")
        }
    }

    pub fn data_corruption(message: impl Into<String>) -> Self {
        Self::with_code(StorageErrorCode::DataCorruption, message)
    }

    /// Unreadable record at `offset` in the document file
    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self {
            details: Some(format!("byte_offset: {}", offset)),
            ..Self::with_code(StorageErrorCode::DataCorruption, reason)
        }
    }

    /// Stored body of `key` is not valid JSON
    pub fn corruption_for_document(key: &str, reason: impl Into<String>) -> Self {
        Self {
            details: Some(format!("key: {}", key)),
            ..Self::with_code(StorageErrorCode::DataCorruption, reason)
        }
    }

    pub fn code(&self) -> StorageErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Stored data can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub fn is_lock_timeout(&self) -> bool {
        self.code == StorageErrorCode::LockTimeout
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.code, self.severity(), self.message)?;
        match self.details {
            Some(ref details) => write!(f, " ({})", details),
            None => Ok(()),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(StorageErrorCode::IoError.code(), "COLLDB_STORAGE_IO_ERROR");
        assert_eq!(StorageErrorCode::LockTimeout.code(), "COLLDB_LOCK_TIMEOUT");
        assert_eq!(StorageErrorCode::DataCorruption.code(), "COLLDB_DATA_CORRUPTION");
    }

    #[test]
    fn test_only_corruption_is_fatal() {
        assert!(StorageError::data_corruption("bad crc").is_fatal());
        assert!(!StorageError::unavailable("unloaded").is_fatal());
        assert!(!StorageError::write_failed(
            "disk full",
            io::Error::new(io::ErrorKind::Other, "disk full")
        )
        .is_fatal());
    }

    #[test]
    fn test_lock_timeout_details() {
        let err = StorageError::lock_timeout(Duration::from_millis(250));
        assert!(err.is_lock_timeout());
        let display = err.to_string();
        assert!(display.contains("COLLDB_LOCK_TIMEOUT"));
        assert!(display.contains("timeout_ms: 250"));
    }

    #[test]
    fn test_display_contains_offset() {
        let err = StorageError::corruption_at_offset(1024, "checksum mismatch");
        assert_eq!(
            err.to_string(),
            "COLLDB_DATA_CORRUPTION [FATAL] checksum mismatch (byte_offset: 1024)"
        );
    }
}
