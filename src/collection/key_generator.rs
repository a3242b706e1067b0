//! Document key generation
//!
//! Generators are selected by the `type` of a collection's key options:
//!
//! | type          | keys                                            |
//! |---------------|-------------------------------------------------|
//! | traditional   | decimal clock ticks                             |
//! | autoincrement | `offset + n * increment`                        |
//! | padded        | 16-digit lowercase hex ticks, sortable as text |
//! | uuid          | random v4 UUIDs                                 |

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::errors::{CollectionError, CollectionResult, KeyError};
use crate::document::attributes;
use crate::revision::{HybridLogicalClock, RevisionId};

const MAX_INCREMENT: u64 = 1 << 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyGeneratorType {
    #[default]
    Traditional,
    Autoincrement,
    Padded,
    Uuid,
}

fn default_true() -> bool {
    true
}

/// Persisted key generator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyOptions {
    #[serde(rename = "type", default)]
    pub generator: KeyGeneratorType,
    #[serde(default = "default_true")]
    pub allow_user_keys: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increment: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_value: Option<u64>,
}

impl Default for KeyOptions {
    fn default() -> Self {
        Self {
            generator: KeyGeneratorType::Traditional,
            allow_user_keys: true,
            increment: None,
            offset: None,
            last_value: None,
        }
    }
}

/// Produces and validates document keys for one collection.
pub trait KeyGenerator: Send + Sync + fmt::Debug {
    /// Generates a fresh key.
    fn generate(&self) -> Result<String, KeyError>;

    /// Checks a user-supplied key.
    fn validate_key(&self, key: &str) -> Result<(), KeyError> {
        if !self.allow_user_keys() {
            return Err(KeyError::UnexpectedKey);
        }
        if !attributes::is_valid_key(key) {
            return Err(KeyError::BadKey(key.to_string()));
        }
        Ok(())
    }

    /// Checks a `<collection>/<key>` document id.
    fn validate_id(&self, id: &str) -> bool {
        attributes::is_valid_id(id)
    }

    /// Records a user-supplied key so generated keys never collide with it.
    fn track(&self, _key: &str) {}

    fn allow_user_keys(&self) -> bool;

    /// Current configuration, including the generator's progress.
    fn options(&self) -> KeyOptions;
}

/// Builds the generator described by `options`.
pub fn create_key_generator(
    options: &KeyOptions,
    clock: Arc<HybridLogicalClock>,
) -> CollectionResult<Box<dyn KeyGenerator>> {
    let allow_user_keys = options.allow_user_keys;
    let generator: Box<dyn KeyGenerator> = match options.generator {
        KeyGeneratorType::Traditional => Box::new(TraditionalKeyGenerator {
            allow_user_keys,
            clock,
        }),
        KeyGeneratorType::Autoincrement => {
            let increment = options.increment.unwrap_or(1);
            if increment == 0 || increment >= MAX_INCREMENT {
                return Err(CollectionError::InvalidKeyOptions(
                    "increment must be between 1 and 65535".to_string(),
                ));
            }
            Box::new(AutoIncrementKeyGenerator {
                allow_user_keys,
                offset: options.offset.unwrap_or(0),
                increment,
                last_value: AtomicU64::new(options.last_value.unwrap_or(0)),
            })
        }
        KeyGeneratorType::Padded => Box::new(PaddedKeyGenerator {
            allow_user_keys,
            clock,
            last_value: AtomicU64::new(options.last_value.unwrap_or(0)),
        }),
        KeyGeneratorType::Uuid => Box::new(UuidKeyGenerator { allow_user_keys }),
    };
    Ok(generator)
}

fn parse_numeric(key: &str) -> Option<u64> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

#[derive(Debug)]
struct TraditionalKeyGenerator {
    allow_user_keys: bool,
    clock: Arc<HybridLogicalClock>,
}

impl KeyGenerator for TraditionalKeyGenerator {
    fn generate(&self) -> Result<String, KeyError> {
        Ok(self.clock.new_tick().to_string())
    }

    fn track(&self, key: &str) {
        if let Some(value) = parse_numeric(key) {
            self.clock.observe(RevisionId::new(value));
        }
    }

    fn allow_user_keys(&self) -> bool {
        self.allow_user_keys
    }

    fn options(&self) -> KeyOptions {
        KeyOptions {
            generator: KeyGeneratorType::Traditional,
            allow_user_keys: self.allow_user_keys,
            ..KeyOptions::default()
        }
    }
}

#[derive(Debug)]
struct AutoIncrementKeyGenerator {
    allow_user_keys: bool,
    offset: u64,
    increment: u64,
    last_value: AtomicU64,
}

impl AutoIncrementKeyGenerator {
    fn successor(&self, last: u64) -> Option<u64> {
        if last < self.offset {
            return Some(self.offset);
        }
        let step = self.increment - ((last - self.offset) % self.increment);
        last.checked_add(step)
    }
}

impl KeyGenerator for AutoIncrementKeyGenerator {
    fn generate(&self) -> Result<String, KeyError> {
        let mut last = self.last_value.load(Ordering::Acquire);
        loop {
            let next = self.successor(last).ok_or(KeyError::OutOfKeys)?;
            match self.last_value.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(next.to_string()),
                Err(actual) => last = actual,
            }
        }
    }

    fn validate_key(&self, key: &str) -> Result<(), KeyError> {
        if !self.allow_user_keys {
            return Err(KeyError::UnexpectedKey);
        }
        if parse_numeric(key).is_none() {
            return Err(KeyError::BadKey(key.to_string()));
        }
        Ok(())
    }

    fn track(&self, key: &str) {
        if let Some(value) = parse_numeric(key) {
            self.last_value.fetch_max(value, Ordering::AcqRel);
        }
    }

    fn allow_user_keys(&self) -> bool {
        self.allow_user_keys
    }

    fn options(&self) -> KeyOptions {
        KeyOptions {
            generator: KeyGeneratorType::Autoincrement,
            allow_user_keys: self.allow_user_keys,
            increment: Some(self.increment),
            offset: Some(self.offset),
            last_value: Some(self.last_value.load(Ordering::Acquire)),
        }
    }
}

#[derive(Debug)]
struct PaddedKeyGenerator {
    allow_user_keys: bool,
    clock: Arc<HybridLogicalClock>,
    last_value: AtomicU64,
}

impl KeyGenerator for PaddedKeyGenerator {
    fn generate(&self) -> Result<String, KeyError> {
        let tick = self.clock.new_tick();
        let previous = self.last_value.fetch_max(tick, Ordering::AcqRel);
        let value = if tick > previous {
            tick
        } else {
            // A tracked user key is ahead of the clock.
            let bumped = previous.checked_add(1).ok_or(KeyError::OutOfKeys)?;
            self.last_value.fetch_max(bumped, Ordering::AcqRel);
            self.clock.observe(RevisionId::new(bumped));
            bumped
        };
        Ok(format!("{:016x}", value))
    }

    fn track(&self, key: &str) {
        if key.len() == 16 {
            if let Ok(value) = u64::from_str_radix(key, 16) {
                self.last_value.fetch_max(value, Ordering::AcqRel);
            }
        }
    }

    fn allow_user_keys(&self) -> bool {
        self.allow_user_keys
    }

    fn options(&self) -> KeyOptions {
        KeyOptions {
            generator: KeyGeneratorType::Padded,
            allow_user_keys: self.allow_user_keys,
            last_value: Some(self.last_value.load(Ordering::Acquire)),
            ..KeyOptions::default()
        }
    }
}

#[derive(Debug)]
struct UuidKeyGenerator {
    allow_user_keys: bool,
}

impl KeyGenerator for UuidKeyGenerator {
    fn generate(&self) -> Result<String, KeyError> {
        Ok(uuid::Uuid::new_v4().to_string())
    }

    fn allow_user_keys(&self) -> bool {
        self.allow_user_keys
    }

    fn options(&self) -> KeyOptions {
        KeyOptions {
            generator: KeyGeneratorType::Uuid,
            allow_user_keys: self.allow_user_keys,
            ..KeyOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn clock() -> Arc<HybridLogicalClock> {
        Arc::new(HybridLogicalClock::new())
    }

    fn generator(options: serde_json::Value) -> Box<dyn KeyGenerator> {
        let options: KeyOptions = serde_json::from_value(options).unwrap();
        create_key_generator(&options, clock()).unwrap()
    }

    #[test]
    fn test_traditional_keys_increase() {
        let keys = generator(json!({"type": "traditional"}));
        let a: u64 = keys.generate().unwrap().parse().unwrap();
        let b: u64 = keys.generate().unwrap().parse().unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_autoincrement_sequence() {
        let keys = generator(json!({"type": "autoincrement", "offset": 10, "increment": 5}));
        assert_eq!(keys.generate().unwrap(), "10");
        assert_eq!(keys.generate().unwrap(), "15");
        keys.track("42");
        assert_eq!(keys.generate().unwrap(), "45");
        assert_eq!(keys.options().last_value, Some(45));
    }

    #[test]
    fn test_autoincrement_rejects_non_numeric_keys() {
        let keys = generator(json!({"type": "autoincrement"}));
        assert_eq!(keys.validate_key("abc"), Err(KeyError::BadKey("abc".into())));
        assert!(keys.validate_key("17").is_ok());
    }

    #[test]
    fn test_autoincrement_out_of_keys() {
        let keys = generator(json!({"type": "autoincrement", "lastValue": u64::MAX}));
        assert_eq!(keys.generate(), Err(KeyError::OutOfKeys));
    }

    #[test]
    fn test_zero_increment_rejected() {
        let options: KeyOptions =
            serde_json::from_value(json!({"type": "autoincrement", "increment": 0})).unwrap();
        assert!(create_key_generator(&options, clock()).is_err());
    }

    #[test]
    fn test_padded_keys_sort_as_text() {
        let keys = generator(json!({"type": "padded"}));
        let a = keys.generate().unwrap();
        let b = keys.generate().unwrap();
        assert_eq!(a.len(), 16);
        assert!(b > a);
    }

    #[test]
    fn test_padded_stays_ahead_of_tracked_key() {
        let keys = generator(json!({"type": "padded"}));
        keys.track("ffffffffffff0000");
        assert!(keys.generate().unwrap().as_str() > "ffffffffffff0000");
    }

    #[test]
    fn test_uuid_keys_are_valid() {
        let keys = generator(json!({"type": "uuid"}));
        let key = keys.generate().unwrap();
        assert!(attributes::is_valid_key(&key));
    }

    #[test]
    fn test_user_keys_disallowed() {
        let keys = generator(json!({"type": "traditional", "allowUserKeys": false}));
        assert_eq!(keys.validate_key("mine"), Err(KeyError::UnexpectedKey));
    }

    #[test]
    fn test_bad_user_key() {
        let keys = generator(json!({}));
        assert!(matches!(keys.validate_key("a b"), Err(KeyError::BadKey(_))));
        assert!(keys.validate_id("users/abc"));
        assert!(!keys.validate_id("users"));
    }
}
