//! Collection status state machine
//!
//! ```text
//! NEW_BORN -> LOADING -> LOADED <-> UNLOADING -> UNLOADED -> LOADING
//!    any  -> DELETED (terminal)
//! ```
//!
//! Status codes are persisted; an unknown code reads back as CORRUPTED.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum CollectionStatus {
    Corrupted,
    NewBorn,
    Unloaded,
    Loaded,
    Unloading,
    Deleted,
    Loading,
}

impl CollectionStatus {
    /// Persisted numeric code.
    pub fn code(&self) -> i64 {
        match self {
            CollectionStatus::Corrupted => 0,
            CollectionStatus::NewBorn => 1,
            CollectionStatus::Unloaded => 2,
            CollectionStatus::Loaded => 3,
            CollectionStatus::Unloading => 4,
            CollectionStatus::Deleted => 5,
            CollectionStatus::Loading => 6,
        }
    }

    /// Decodes a persisted code; unknown codes map to `Corrupted`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => CollectionStatus::NewBorn,
            2 => CollectionStatus::Unloaded,
            3 => CollectionStatus::Loaded,
            4 => CollectionStatus::Unloading,
            5 => CollectionStatus::Deleted,
            6 => CollectionStatus::Loading,
            _ => CollectionStatus::Corrupted,
        }
    }

    /// Status string as reported to clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionStatus::Unloaded => "unloaded",
            CollectionStatus::Loaded => "loaded",
            CollectionStatus::Unloading => "unloading",
            CollectionStatus::Deleted => "deleted",
            CollectionStatus::Loading => "loading",
            CollectionStatus::Corrupted | CollectionStatus::NewBorn => "unknown",
        }
    }

    pub fn can_transition_to(&self, next: CollectionStatus) -> bool {
        use CollectionStatus::*;

        if next == Deleted {
            return *self != Deleted;
        }
        matches!(
            (*self, next),
            (NewBorn, Loading)
                | (NewBorn, Unloaded)
                | (Loading, Loaded)
                | (Loading, Corrupted)
                | (Loaded, Unloading)
                | (Unloading, Unloaded)
                | (Unloading, Loaded)
                | (Unloaded, Loading)
        )
    }

    /// Statuses from which documents can be served after an implicit load.
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            CollectionStatus::NewBorn | CollectionStatus::Unloaded | CollectionStatus::Loaded
        )
    }
}

impl From<CollectionStatus> for i64 {
    fn from(status: CollectionStatus) -> i64 {
        status.code()
    }
}

impl TryFrom<i64> for CollectionStatus {
    type Error = std::convert::Infallible;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Ok(CollectionStatus::from_code(code))
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CollectionStatus::*;

    #[test]
    fn test_codes_round_trip() {
        for status in [Corrupted, NewBorn, Unloaded, Loaded, Unloading, Deleted, Loading] {
            assert_eq!(CollectionStatus::from_code(status.code()), status);
        }
    }

    #[test]
    fn test_unknown_code_is_corrupted() {
        assert_eq!(CollectionStatus::from_code(42), Corrupted);
        assert_eq!(CollectionStatus::from_code(-1), Corrupted);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(Loaded.as_str(), "loaded");
        assert_eq!(NewBorn.as_str(), "unknown");
        assert_eq!(Corrupted.as_str(), "unknown");
    }

    #[test]
    fn test_deleted_is_terminal() {
        for status in [Corrupted, NewBorn, Unloaded, Loaded, Unloading, Deleted, Loading] {
            assert!(!Deleted.can_transition_to(status));
        }
        assert!(Corrupted.can_transition_to(Deleted));
        assert!(!Corrupted.can_transition_to(Loading));
    }

    #[test]
    fn test_load_unload_cycle() {
        assert!(Unloaded.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Loaded));
        assert!(Loaded.can_transition_to(Unloading));
        assert!(Unloading.can_transition_to(Unloaded));
        assert!(!Loaded.can_transition_to(Unloaded));
    }

    #[test]
    fn test_serde_as_number() {
        assert_eq!(serde_json::to_string(&Loaded).unwrap(), "3");
        let status: CollectionStatus = serde_json::from_str("99").unwrap();
        assert_eq!(status, Corrupted);
    }
}
