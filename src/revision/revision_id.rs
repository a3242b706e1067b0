//! RevisionId - Opaque, recency-ordered document revision
//!
//! A revision is stamped on every successful document write and is the
//! token used for optimistic concurrency control.
//!
//! - Totally ordered by allocation time within one process
//! - Zero is reserved and never allocated ("no revision")
//! - Rendered as a compact string using a 64-character alphabet

use std::fmt;

/// Encoding alphabet, one character per 6 bits, most significant first.
const ENCODE_TABLE: &[u8; 64] =
    b"-_ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Longest encoded form of a u64 (ceil(64 / 6)).
const MAX_ENCODED_LEN: usize = 11;

/// A 64-bit document revision.
///
/// Revisions compare by their numeric value. The ordering is only meaningful
/// for revisions produced by the same clock.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RevisionId(u64);

impl RevisionId {
    /// Creates a revision from its raw value.
    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns true for the reserved "no revision" value.
    #[inline]
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Encodes the revision into its string form.
    ///
    /// Zero encodes to the empty string.
    pub fn encode(&self) -> String {
        let mut buf = [0u8; MAX_ENCODED_LEN];
        let mut pos = MAX_ENCODED_LEN;
        let mut value = self.0;

        while value > 0 {
            pos -= 1;
            buf[pos] = ENCODE_TABLE[(value & 0x3f) as usize];
            value >>= 6;
        }

        // The table is pure ASCII.
        String::from_utf8_lossy(&buf[pos..]).into_owned()
    }

    /// Parses the string form of a revision.
    ///
    /// Returns `None` for empty input, characters outside the alphabet,
    /// values that overflow 64 bits, and the reserved zero value.
    pub fn parse(encoded: &str) -> Option<Self> {
        if encoded.is_empty() || encoded.len() > MAX_ENCODED_LEN {
            return None;
        }

        let mut value: u64 = 0;
        for byte in encoded.bytes() {
            let digit = decode_char(byte)?;
            if value > (u64::MAX >> 6) {
                return None;
            }
            value = (value << 6) | digit;
        }

        if value == 0 {
            None
        } else {
            Some(Self(value))
        }
    }
}

fn decode_char(byte: u8) -> Option<u64> {
    let digit = match byte {
        b'-' => 0,
        b'_' => 1,
        b'A'..=b'Z' => 2 + (byte - b'A') as u64,
        b'a'..=b'z' => 28 + (byte - b'a') as u64,
        b'0'..=b'9' => 54 + (byte - b'0') as u64,
        _ => return None,
    };
    Some(digit)
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_parse_known_values() {
        assert_eq!(RevisionId::new(1).encode(), "_");
        assert_eq!(RevisionId::new(2).encode(), "A");
        assert_eq!(RevisionId::new(64).encode(), "_-");
        assert_eq!(RevisionId::parse("_-"), Some(RevisionId::new(64)));
    }

    #[test]
    fn test_zero_is_none() {
        assert!(RevisionId::new(0).is_none());
        assert_eq!(RevisionId::new(0).encode(), "");
        assert_eq!(RevisionId::parse(""), None);
        assert_eq!(RevisionId::parse("-"), None);
    }

    #[test]
    fn test_parse_rejects_foreign_characters() {
        assert_eq!(RevisionId::parse("abc!"), None);
        assert_eq!(RevisionId::parse("12 3"), None);
    }

    #[test]
    fn test_parse_rejects_overflow() {
        // Eleven '9' characters exceed 64 bits.
        assert_eq!(RevisionId::parse("99999999999"), None);
        assert_eq!(RevisionId::parse("AAAAAAAAAAAA"), None);
    }

    #[test]
    fn test_max_value_survives_encoding() {
        let max = RevisionId::new(u64::MAX);
        assert_eq!(RevisionId::parse(&max.encode()), Some(max));
    }

    #[test]
    fn test_ordering_is_numeric() {
        assert!(RevisionId::new(10) < RevisionId::new(20));
    }
}
