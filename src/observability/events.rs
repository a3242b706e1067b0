//! Observable engine events
//!
//! Every structural change to a collection and every document write maps
//! to exactly one event name.

use std::fmt;

use super::logger::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Engine
    ConfigLoaded,

    // Collection lifecycle
    CollectionCreated,
    CollectionLoaded,
    CollectionLoadFailed,
    CollectionUnloaded,
    CollectionRenamed,
    CollectionRenameReverted,
    CollectionPropertiesChanged,
    CollectionPropertiesReverted,
    CollectionDropped,
    /// The physical store failed while dropping; the drop still went ahead
    CollectionDropPhysicalError,
    DeferredDropExecuted,

    // Document writes
    DocumentInserted,
    DocumentUpdated,
    DocumentUnchanged,
    DocumentReplaced,
    DocumentRemoved,

    // Rejections
    WriteConflict,
    LockTimeout,
    ShardKeyViolation,

    // Verification
    ChecksumComputed,
    ChecksumMismatch,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::CollectionCreated => "COLLECTION_CREATED",
            Event::CollectionLoaded => "COLLECTION_LOADED",
            Event::CollectionLoadFailed => "COLLECTION_LOAD_FAILED",
            Event::CollectionUnloaded => "COLLECTION_UNLOADED",
            Event::CollectionRenamed => "COLLECTION_RENAMED",
            Event::CollectionRenameReverted => "COLLECTION_RENAME_REVERTED",
            Event::CollectionPropertiesChanged => "COLLECTION_PROPERTIES_CHANGED",
            Event::CollectionPropertiesReverted => "COLLECTION_PROPERTIES_REVERTED",
            Event::CollectionDropped => "COLLECTION_DROPPED",
            Event::CollectionDropPhysicalError => "COLLECTION_DROP_PHYSICAL_ERROR",
            Event::DeferredDropExecuted => "DEFERRED_DROP_EXECUTED",

            Event::DocumentInserted => "DOCUMENT_INSERTED",
            Event::DocumentUpdated => "DOCUMENT_UPDATED",
            Event::DocumentUnchanged => "DOCUMENT_UNCHANGED",
            Event::DocumentReplaced => "DOCUMENT_REPLACED",
            Event::DocumentRemoved => "DOCUMENT_REMOVED",

            Event::WriteConflict => "WRITE_CONFLICT",
            Event::LockTimeout => "LOCK_TIMEOUT",
            Event::ShardKeyViolation => "SHARD_KEY_VIOLATION",

            Event::ChecksumComputed => "CHECKSUM_COMPUTED",
            Event::ChecksumMismatch => "CHECKSUM_MISMATCH",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::DocumentInserted
            | Event::DocumentUpdated
            | Event::DocumentUnchanged
            | Event::DocumentReplaced
            | Event::DocumentRemoved => Severity::Trace,
            Event::WriteConflict
            | Event::LockTimeout
            | Event::ShardKeyViolation
            | Event::CollectionRenameReverted
            | Event::CollectionPropertiesReverted
            | Event::CollectionDropPhysicalError
            | Event::ChecksumMismatch => Severity::Warn,
            Event::CollectionLoadFailed => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
