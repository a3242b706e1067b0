//! Seeded, type-normalized value hashing
//!
//! Hashes are stable across processes and platforms so that replicas can
//! compare digests. Values that are equal as JSON values hash identically
//! regardless of how they were encoded:
//!
//! - numbers hash by exact numeric value (`1`, `1.0` and `1e0` agree, large
//!   integers never collapse through a float)
//! - object members combine order-independently
//! - array elements combine in order

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_ARRAY: u8 = 4;
const TAG_OBJECT: u8 = 5;

/// Hashes raw bytes with a seed.
pub fn hash_bytes(bytes: &[u8], seed: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(bytes);
    let digest = hasher.finalize();

    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

/// Hashes a string with a seed.
pub fn hash_str(value: &str, seed: u64) -> u64 {
    hash_bytes(value.as_bytes(), seed)
}

fn hash_tagged(tag: u8, payload: &[u8], seed: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update([tag]);
    hasher.update(payload);
    let digest = hasher.finalize();

    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

/// Exact comparison key of a JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberKey {
    /// Integers and floats without a fractional part.
    Integral(i128),
    /// Bit pattern of a float with a fractional part.
    Fractional(u64),
}

/// 2^127, the first float outside the i128 range.
const I128_LIMIT: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;

fn number_key(value: &serde_json::Number) -> NumberKey {
    if let Some(i) = value.as_i64() {
        return NumberKey::Integral(i128::from(i));
    }
    if let Some(u) = value.as_u64() {
        return NumberKey::Integral(i128::from(u));
    }
    let f = value.as_f64().unwrap_or(0.0);
    // Covers -0.0 as well.
    if f.fract() == 0.0 && f.abs() < I128_LIMIT {
        NumberKey::Integral(f as i128)
    } else {
        NumberKey::Fractional(f.to_bits())
    }
}

fn hash_number(value: &serde_json::Number, seed: u64) -> u64 {
    let mut payload = [0u8; 17];
    match number_key(value) {
        NumberKey::Integral(i) => payload[1..].copy_from_slice(&i.to_le_bytes()),
        NumberKey::Fractional(bits) => {
            payload[0] = 1;
            payload[1..9].copy_from_slice(&bits.to_le_bytes());
        }
    }
    hash_tagged(TAG_NUMBER, &payload, seed)
}

/// Hashes a JSON value after normalizing its type.
pub fn normalized_hash(value: &Value, seed: u64) -> u64 {
    match value {
        Value::Null => hash_tagged(TAG_NULL, &[], seed),
        Value::Bool(b) => hash_tagged(TAG_BOOL, &[*b as u8], seed),
        Value::Number(n) => hash_number(n, seed),
        Value::String(s) => hash_tagged(TAG_STRING, s.as_bytes(), seed),
        Value::Array(items) => {
            let mut acc = hash_tagged(TAG_ARRAY, &(items.len() as u64).to_le_bytes(), seed);
            for item in items {
                acc = acc.rotate_left(7) ^ normalized_hash(item, seed);
            }
            acc
        }
        Value::Object(members) => normalized_object_hash(members, seed),
    }
}

fn normalized_object_hash(members: &Map<String, Value>, seed: u64) -> u64 {
    let mut acc = hash_tagged(TAG_OBJECT, &(members.len() as u64).to_le_bytes(), seed);
    for (name, value) in members {
        let member = hash_str(name, seed).rotate_left(17) ^ normalized_hash(value, seed);
        acc = acc.wrapping_add(member);
    }
    acc
}

/// Compares two values with the same normalization the hash applies.
pub fn normalized_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => number_key(x) == number_key(y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| normalized_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(name, l)| y.get(name).map_or(false, |r| normalized_equal(l, r)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_str("abc", 1), hash_str("abc", 1));
        assert_ne!(hash_str("abc", 1), hash_str("abc", 2));
    }

    #[test]
    fn test_numbers_normalize() {
        let a: Value = serde_json::from_str("1").unwrap();
        let b: Value = serde_json::from_str("1.0").unwrap();
        let c: Value = serde_json::from_str("1e0").unwrap();
        assert_eq!(normalized_hash(&a, 9), normalized_hash(&b, 9));
        assert_eq!(normalized_hash(&a, 9), normalized_hash(&c, 9));
        assert_eq!(
            normalized_hash(&json!(0.0), 9),
            normalized_hash(&json!(-0.0), 9)
        );
    }

    #[test]
    fn test_large_integers_stay_exact() {
        let above: Value = serde_json::from_str("9007199254740993").unwrap();
        let below: Value = serde_json::from_str("9007199254740992").unwrap();
        assert!(!normalized_equal(&above, &below));
        assert_ne!(normalized_hash(&above, 4), normalized_hash(&below, 4));

        let float: Value = serde_json::from_str("9007199254740992.0").unwrap();
        assert!(normalized_equal(&below, &float));
        assert_eq!(normalized_hash(&below, 4), normalized_hash(&float, 4));

        assert!(!normalized_equal(&json!(u64::MAX), &json!(u64::MAX - 1)));
        assert!(!normalized_equal(&json!(i64::MIN), &json!(i64::MIN + 1)));
        assert!(!normalized_equal(&json!(1.5), &json!(1)));
    }

    #[test]
    fn test_types_are_distinguished() {
        assert_ne!(normalized_hash(&json!("1"), 0), normalized_hash(&json!(1), 0));
        assert_ne!(normalized_hash(&json!(null), 0), normalized_hash(&json!(false), 0));
        assert_ne!(normalized_hash(&json!([]), 0), normalized_hash(&json!({}), 0));
    }

    #[test]
    fn test_object_member_order_is_irrelevant() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":[1,2]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":[1,2],"x":1}"#).unwrap();
        assert_eq!(normalized_hash(&a, 3), normalized_hash(&b, 3));
    }

    #[test]
    fn test_array_order_matters() {
        assert_ne!(
            normalized_hash(&json!([1, 2]), 3),
            normalized_hash(&json!([2, 1]), 3)
        );
    }

    #[test]
    fn test_normalized_equal() {
        assert!(normalized_equal(&json!(1), &json!(1.0)));
        assert!(normalized_equal(&json!({"a": 1, "b": [2]}), &json!({"b": [2.0], "a": 1})));
        assert!(!normalized_equal(&json!([1, 2]), &json!([2, 1])));
        assert!(!normalized_equal(&json!("1"), &json!(1)));
    }
}
