//! Persisted collection definition

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::{CollectionError, CollectionResult};
use super::key_generator::KeyOptions;
use super::sharding::ShardingInfo;
use super::status::CollectionStatus;
use crate::document::attributes;

/// Oldest definition version that can still be opened.
pub const MINIMUM_VERSION: u32 = 5;
/// First version that persists a globally unique id.
pub const VERSION_33: u32 = 7;
/// Version written for new collections.
pub const CURRENT_VERSION: u32 = 8;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CollectionType {
    #[default]
    Document,
    Edge,
}

impl CollectionType {
    pub fn code(&self) -> u8 {
        match self {
            CollectionType::Document => 2,
            CollectionType::Edge => 3,
        }
    }

    pub fn is_edge(&self) -> bool {
        *self == CollectionType::Edge
    }
}

impl From<CollectionType> for u8 {
    fn from(kind: CollectionType) -> u8 {
        kind.code()
    }
}

impl TryFrom<u8> for CollectionType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            2 => Ok(CollectionType::Document),
            3 => Ok(CollectionType::Edge),
            other => Err(format!("unknown collection type {}", other)),
        }
    }
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionType::Document => write!(f, "document"),
            CollectionType::Edge => write!(f, "edge"),
        }
    }
}

/// Returns true when `name` may name a collection. Names starting with an
/// underscore are reserved for system collections.
pub fn is_allowed_name(is_system: bool, name: &str) -> bool {
    attributes::is_valid_collection_part(name) && (is_system || !name.starts_with('_'))
}

/// Definition a collection is created or restored from.
///
/// Attributes not named here (sharding, engine properties, volatile
/// counters) are kept in `extra`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectionDefinition {
    pub id: Option<String>,
    pub cid: Option<String>,
    pub plan_id: Option<String>,
    pub globally_unique_id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub collection_type: CollectionType,
    pub status: Option<CollectionStatus>,
    pub version: Option<u32>,
    pub wait_for_sync: bool,
    pub deleted: bool,
    pub is_system: bool,
    pub is_smart: bool,
    pub is_local: bool,
    pub allow_user_keys: Option<bool>,
    pub key_options: Option<KeyOptions>,
    pub indexes: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CollectionDefinition {
    pub fn new(name: impl Into<String>, collection_type: CollectionType) -> Self {
        Self {
            name: name.into(),
            collection_type,
            ..Self::default()
        }
    }

    pub fn from_value(value: &Value) -> CollectionResult<Self> {
        if !value.is_object() {
            return Err(CollectionError::BadParameter(
                "collection definition must be an object".into(),
            ));
        }
        Self::deserialize(value)
            .map_err(|e| CollectionError::BadParameter(format!("invalid definition: {}", e)))
    }

    pub fn version(&self) -> u32 {
        self.version.unwrap_or(CURRENT_VERSION)
    }

    /// Numeric collection id from `id` or `cid`, if present.
    pub fn parsed_id(&self) -> CollectionResult<Option<u64>> {
        match self.id.as_deref().or(self.cid.as_deref()) {
            None | Some("") | Some("0") => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| CollectionError::BadParameter(format!("invalid collection id '{}'", raw))),
        }
    }

    /// Globally unique id. Definitions from before 3.3 did not persist one
    /// and use the collection name instead.
    pub fn resolved_guid(&self) -> Option<String> {
        match self.globally_unique_id.as_deref() {
            Some(guid) if !guid.is_empty() => Some(guid.to_string()),
            _ if self.version() < VERSION_33 && !self.name.is_empty() => Some(self.name.clone()),
            _ => None,
        }
    }

    pub fn sharding(&self) -> CollectionResult<ShardingInfo> {
        ShardingInfo::from_definition(&self.extra)
    }

    pub fn with_key_options(mut self, key_options: KeyOptions) -> Self {
        self.key_options = Some(key_options);
        self
    }

    pub fn with_sharding(mut self, sharding: &ShardingInfo) -> Self {
        sharding.write_definition(&mut self.extra);
        self
    }
}
