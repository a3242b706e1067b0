//! Sharding descriptor and shard-key checks
//!
//! A collection is split into `number_of_shards` shards; each document is
//! placed by hashing the values of its shard-key attributes. On shards that
//! live on a DB server those values must never change after creation, since
//! a changed value would place the document on another shard.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::errors::{CollectionError, CollectionResult};
use crate::document::attributes::KEY;
use crate::document::hash::{hash_str, normalized_equal, normalized_hash};

/// Replication factor string marking a collection replicated to every server.
pub const SATELLITE: &str = "satellite";

const MAX_REPLICATION_FACTOR: u64 = 10;
const SHARD_HASH_SEED: u64 = 0xdead_beef;

/// Shard id -> servers holding a copy, leader first.
pub type ShardMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardingInfo {
    number_of_shards: u64,
    /// Zero marks a satellite collection.
    replication_factor: u64,
    shard_keys: Vec<String>,
    shards: ShardMap,
    distribute_shards_like: Option<String>,
    avoid_servers: Vec<String>,
}

impl Default for ShardingInfo {
    fn default() -> Self {
        Self {
            number_of_shards: 1,
            replication_factor: 1,
            shard_keys: vec![KEY.to_string()],
            shards: ShardMap::new(),
            distribute_shards_like: None,
            avoid_servers: Vec::new(),
        }
    }
}

impl ShardingInfo {
    /// Reads the sharding attributes of a collection definition.
    pub fn from_definition(definition: &Map<String, Value>) -> CollectionResult<Self> {
        let mut info = Self::default();

        if let Some(value) = definition.get("numberOfShards") {
            info.number_of_shards = value
                .as_u64()
                .filter(|n| *n > 0)
                .ok_or_else(|| CollectionError::BadParameter("bad value for numberOfShards".into()))?;
        }

        if let Some(value) = definition.get("replicationFactor") {
            info.replication_factor = match value {
                Value::String(s) if s == SATELLITE => 0,
                Value::Number(n) => n
                    .as_u64()
                    .filter(|rf| (1..=MAX_REPLICATION_FACTOR).contains(rf))
                    .ok_or_else(|| {
                        CollectionError::BadParameter("bad value for replicationFactor".into())
                    })?,
                _ => {
                    return Err(CollectionError::BadParameter(
                        "bad value for replicationFactor".into(),
                    ))
                }
            };
        }

        if let Some(value) = definition.get("shardKeys") {
            let keys: Vec<String> = serde_json::from_value(value.clone())
                .map_err(|_| CollectionError::BadParameter("shardKeys must be strings".into()))?;
            if keys.is_empty() || keys.iter().any(|k| k.is_empty()) {
                return Err(CollectionError::BadParameter("invalid shardKeys".into()));
            }
            info.shard_keys = keys;
        }

        if let Some(value) = definition.get("shards") {
            info.shards = serde_json::from_value(value.clone())
                .map_err(|_| CollectionError::BadParameter("invalid shards map".into()))?;
        }

        info.distribute_shards_like = definition
            .get("distributeShardsLike")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        if let Some(value) = definition.get("avoidServers") {
            info.avoid_servers = serde_json::from_value(value.clone())
                .map_err(|_| CollectionError::BadParameter("avoidServers must be strings".into()))?;
        }

        Ok(info)
    }

    /// Appends the sharding attributes to a definition object.
    pub fn write_definition(&self, out: &mut Map<String, Value>) {
        out.insert("numberOfShards".into(), Value::from(self.number_of_shards));
        let rf = if self.is_satellite() {
            Value::from(SATELLITE)
        } else {
            Value::from(self.replication_factor)
        };
        out.insert("replicationFactor".into(), rf);
        out.insert("shardKeys".into(), Value::from(self.shard_keys.clone()));

        let shards: Map<String, Value> = self
            .shards
            .iter()
            .map(|(id, servers)| (id.clone(), Value::from(servers.clone())))
            .collect();
        out.insert("shards".into(), Value::Object(shards));

        if let Some(ref prototype) = self.distribute_shards_like {
            out.insert("distributeShardsLike".into(), Value::from(prototype.clone()));
        }
        if !self.avoid_servers.is_empty() {
            out.insert("avoidServers".into(), Value::from(self.avoid_servers.clone()));
        }
    }

    pub fn number_of_shards(&self) -> u64 {
        self.number_of_shards
    }

    pub fn replication_factor(&self) -> u64 {
        self.replication_factor
    }

    pub fn set_replication_factor(&mut self, replication_factor: u64) {
        self.replication_factor = replication_factor;
    }

    pub fn is_satellite(&self) -> bool {
        self.replication_factor == 0
    }

    pub fn shard_keys(&self) -> &[String] {
        &self.shard_keys
    }

    pub fn uses_default_shard_keys(&self) -> bool {
        self.shard_keys.len() == 1 && self.shard_keys[0] == KEY
    }

    pub fn shard_ids(&self) -> &ShardMap {
        &self.shards
    }

    pub fn set_shard_map(&mut self, shards: ShardMap) {
        self.shards = shards;
    }

    pub fn distribute_shards_like(&self) -> Option<&str> {
        self.distribute_shards_like.as_deref()
    }

    /// Co-locates with `prototype`: shard count, replication factor and
    /// shard placement follow the prototype collection.
    pub fn set_distribute_shards_like(&mut self, prototype_id: &str, prototype: &ShardingInfo) {
        self.distribute_shards_like = Some(prototype_id.to_string());
        self.number_of_shards = prototype.number_of_shards;
        self.replication_factor = prototype.replication_factor;
        self.shards = prototype.shards.clone();
    }

    pub fn avoid_servers(&self) -> &[String] {
        &self.avoid_servers
    }

    /// Validates a requested replication factor change and returns the new
    /// factor (zero for satellite).
    pub fn check_replication_factor_update(
        &self,
        requested: &Value,
        is_local: bool,
        is_smart_edge: bool,
    ) -> CollectionResult<u64> {
        match requested {
            Value::Number(n) => {
                let rf = match (n.as_i64(), n.as_u64()) {
                    (Some(v), _) if v < 0 => {
                        return Err(CollectionError::BadParameter(
                            "bad value for replicationFactor".into(),
                        ))
                    }
                    (_, Some(v)) => v,
                    _ => {
                        return Err(CollectionError::BadParameter(
                            "bad value for replicationFactor".into(),
                        ))
                    }
                };
                if (!self.is_satellite() && rf == 0) || rf > MAX_REPLICATION_FACTOR {
                    return Err(CollectionError::BadParameter(
                        "bad value for replicationFactor".into(),
                    ));
                }

                if !is_local && rf != self.replication_factor {
                    if let Some(ref prototype) = self.distribute_shards_like {
                        return Err(CollectionError::Forbidden(format!(
                            "Cannot change replicationFactor, please change {}",
                            prototype
                        )));
                    }
                    if is_smart_edge {
                        return Err(CollectionError::NotImplemented(
                            "Changing replicationFactor not supported for smart edge collections"
                                .into(),
                        ));
                    }
                    if self.is_satellite() {
                        return Err(CollectionError::Forbidden(
                            "Satellite collection, cannot change replicationFactor".into(),
                        ));
                    }
                }
                Ok(rf)
            }
            Value::String(s) if s == SATELLITE => {
                if !self.is_satellite() {
                    return Err(CollectionError::Forbidden(
                        "cannot change satellite collection status".into(),
                    ));
                }
                Ok(0)
            }
            Value::String(_) => Err(CollectionError::BadParameter(
                "bad value for satellite".into(),
            )),
            _ => Err(CollectionError::BadParameter(
                "bad value for replicationFactor".into(),
            )),
        }
    }
}

/// Returns true when any shard-key value differs between `old` and `new`.
///
/// Missing attributes compare as null. `_key` never changes, so collections
/// sharded by `_key` alone never report a change.
pub fn shard_keys_changed(sharding: &ShardingInfo, old: &Value, new: &Value) -> bool {
    if sharding.uses_default_shard_keys() {
        return false;
    }

    sharding.shard_keys().iter().any(|name| {
        let before = old.get(name).unwrap_or(&Value::Null);
        let after = new.get(name).unwrap_or(&Value::Null);
        !normalized_equal(before, after)
    })
}

/// Maps a document to the shard responsible for it.
pub trait ShardResolver: Send + Sync {
    fn responsible_shard(&self, body: &Value, sharding: &ShardingInfo) -> CollectionResult<String>;
}

/// Places documents by hashing their normalized shard-key values.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashShardResolver;

impl ShardResolver for HashShardResolver {
    fn responsible_shard(&self, body: &Value, sharding: &ShardingInfo) -> CollectionResult<String> {
        let shard_ids: Vec<&String> = sharding.shard_ids().keys().collect();
        if shard_ids.is_empty() {
            return Err(CollectionError::BadParameter("collection has no shards".into()));
        }

        let mut hash = SHARD_HASH_SEED;
        for name in sharding.shard_keys() {
            let value = body.get(name);
            if name == KEY {
                let key = value.and_then(Value::as_str).ok_or_else(|| {
                    CollectionError::BadParameter("not all sharding attributes given".into())
                })?;
                hash = hash.rotate_left(13) ^ hash_str(key, SHARD_HASH_SEED);
            } else {
                let value = value.unwrap_or(&Value::Null);
                hash = hash.rotate_left(13) ^ normalized_hash(value, SHARD_HASH_SEED);
            }
        }

        let index = (hash % shard_ids.len() as u64) as usize;
        Ok(shard_ids[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sharded_by(keys: &[&str]) -> ShardingInfo {
        let definition = json!({
            "numberOfShards": 3,
            "replicationFactor": 2,
            "shardKeys": keys,
            "shards": {"s1": ["db1"], "s2": ["db2"], "s3": ["db3"]}
        });
        ShardingInfo::from_definition(definition.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let info = ShardingInfo::default();
        assert!(info.uses_default_shard_keys());
        assert_eq!(info.number_of_shards(), 1);
        assert!(!info.is_satellite());
    }

    #[test]
    fn test_satellite_definition() {
        let definition = json!({"replicationFactor": "satellite"});
        let info = ShardingInfo::from_definition(definition.as_object().unwrap()).unwrap();
        assert!(info.is_satellite());

        let mut out = Map::new();
        info.write_definition(&mut out);
        assert_eq!(out["replicationFactor"], json!("satellite"));
    }

    #[test]
    fn test_shard_key_change_detected() {
        let info = sharded_by(&["region"]);
        let old = json!({"_key": "a", "region": "eu"});
        assert!(shard_keys_changed(&info, &old, &json!({"_key": "a", "region": "us"})));
        assert!(shard_keys_changed(&info, &old, &json!({"_key": "a"})));
        assert!(!shard_keys_changed(&info, &old, &json!({"_key": "a", "region": "eu", "x": 1})));
    }

    #[test]
    fn test_numeric_shard_key_normalized() {
        let info = sharded_by(&["n"]);
        assert!(!shard_keys_changed(&info, &json!({"n": 1}), &json!({"n": 1.0})));
    }

    #[test]
    fn test_large_integer_shard_key_change_detected() {
        let info = sharded_by(&["acct"]);
        let old: Value = serde_json::from_str(r#"{"acct": 9007199254740993}"#).unwrap();
        let new: Value = serde_json::from_str(r#"{"acct": 9007199254740992}"#).unwrap();
        assert!(shard_keys_changed(&info, &old, &new));
    }

    #[test]
    fn test_default_shard_keys_never_change() {
        let info = ShardingInfo::default();
        assert!(!shard_keys_changed(&info, &json!({"_key": "a"}), &json!({"_key": "b"})));
    }

    #[test]
    fn test_replication_factor_bounds() {
        let info = sharded_by(&["_key"]);
        assert!(info.check_replication_factor_update(&json!(-1), false, false).is_err());
        assert!(info.check_replication_factor_update(&json!(0), false, false).is_err());
        assert!(info.check_replication_factor_update(&json!(11), false, false).is_err());
        assert_eq!(info.check_replication_factor_update(&json!(3), false, false).unwrap(), 3);
    }

    #[test]
    fn test_replication_factor_forbidden_when_colocated() {
        let mut info = sharded_by(&["_key"]);
        let prototype = sharded_by(&["_key"]);
        info.set_distribute_shards_like("100", &prototype);

        let err = info.check_replication_factor_update(&json!(3), false, false).unwrap_err();
        assert!(matches!(err, CollectionError::Forbidden(_)));
        // unchanged value is fine
        assert!(info.check_replication_factor_update(&json!(2), false, false).is_ok());
    }

    #[test]
    fn test_replication_factor_on_smart_edge() {
        let info = sharded_by(&["_key"]);
        let err = info.check_replication_factor_update(&json!(3), false, true).unwrap_err();
        assert!(matches!(err, CollectionError::NotImplemented(_)));
    }

    #[test]
    fn test_satellite_string_rules() {
        let info = sharded_by(&["_key"]);
        assert!(matches!(
            info.check_replication_factor_update(&json!("satellite"), false, false),
            Err(CollectionError::Forbidden(_))
        ));
        assert!(matches!(
            info.check_replication_factor_update(&json!("many"), false, false),
            Err(CollectionError::BadParameter(_))
        ));

        let definition = json!({"replicationFactor": "satellite"});
        let satellite = ShardingInfo::from_definition(definition.as_object().unwrap()).unwrap();
        assert_eq!(
            satellite.check_replication_factor_update(&json!("satellite"), false, false).unwrap(),
            0
        );
        assert!(matches!(
            satellite.check_replication_factor_update(&json!(2), false, false),
            Err(CollectionError::Forbidden(_))
        ));
    }

    #[test]
    fn test_hash_resolver_is_stable() {
        let info = sharded_by(&["region"]);
        let resolver = HashShardResolver;
        let doc = json!({"_key": "a", "region": "eu"});
        let first = resolver.responsible_shard(&doc, &info).unwrap();
        let second = resolver
            .responsible_shard(&json!({"region": "eu", "_key": "b"}), &info)
            .unwrap();
        assert_eq!(first, second);
        assert!(info.shard_ids().contains_key(&first));
    }

    #[test]
    fn test_hash_resolver_requires_key() {
        let info = sharded_by(&["_key"]);
        assert!(HashShardResolver.responsible_shard(&json!({}), &info).is_err());
    }
}
