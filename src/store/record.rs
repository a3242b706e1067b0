//! On-disk document record
//!
//! ```text
//! +------------------+
//! | Record Length    | (u32 LE, includes itself and the checksum)
//! +------------------+
//! | Key              | (length-prefixed string)
//! +------------------+
//! | Local Id         | (u64 LE)
//! +------------------+
//! | Revision         | (u64 LE)
//! +------------------+
//! | Tombstone Flag   | (u8: 0 = live, 1 = removed)
//! +------------------+
//! | Body             | (length-prefixed JSON bytes, empty for tombstones)
//! +------------------+
//! | Checksum         | (u32 LE)
//! +------------------+
//! ```
//!
//! The CRC32 checksum covers every byte before it.

use std::io::{self, Cursor, Read};

use super::LocalDocumentId;
use crate::revision::RevisionId;

/// len + key prefix + local id + revision + tombstone + body prefix + checksum
pub const MIN_RECORD_SIZE: usize = 4 + 4 + 8 + 8 + 1 + 4 + 4;

/// One version of a document, or the tombstone that ends its life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub key: String,
    pub local_id: LocalDocumentId,
    /// Revision stamped into the body, or the removal marker's revision
    pub revision: RevisionId,
    pub is_tombstone: bool,
    pub body: Vec<u8>,
}

impl DocumentRecord {
    pub fn live(
        key: impl Into<String>,
        local_id: LocalDocumentId,
        revision: RevisionId,
        body: Vec<u8>,
    ) -> Self {
        Self {
            key: key.into(),
            local_id,
            revision,
            is_tombstone: false,
            body,
        }
    }

    pub fn tombstone(key: impl Into<String>, local_id: LocalDocumentId, revision: RevisionId) -> Self {
        Self {
            key: key.into(),
            local_id,
            revision,
            is_tombstone: true,
            body: Vec::new(),
        }
    }

    fn serialize_body(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.key.len() + self.body.len() + 25);

        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.key.as_bytes());
        buf.extend_from_slice(&self.local_id.value().to_le_bytes());
        buf.extend_from_slice(&self.revision.value().to_le_bytes());
        buf.push(u8::from(self.is_tombstone));
        buf.extend_from_slice(&(self.body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.body);

        buf
    }

    /// Serialize the complete record, length prefix and checksum included.
    pub fn serialize(&self) -> Vec<u8> {
        let body = self.serialize_body();
        let record_length = (4 + body.len() + 4) as u32;

        let mut record = Vec::with_capacity(record_length as usize);
        record.extend_from_slice(&record_length.to_le_bytes());
        record.extend_from_slice(&body);
        let checksum = crc32fast::hash(&record);
        record.extend_from_slice(&checksum.to_le_bytes());

        record
    }

    /// Deserialize a record from the front of `data`, verifying its checksum.
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn deserialize(data: &[u8]) -> io::Result<(Self, usize)> {
        if data.len() < MIN_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Record too short",
            ));
        }

        let record_length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if record_length < MIN_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid record length: {}", record_length),
            ));
        }
        if data.len() < record_length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Record truncated: expected {} bytes, got {}",
                    record_length,
                    data.len()
                ),
            ));
        }

        let checksum_offset = record_length - 4;
        let stored_checksum = u32::from_le_bytes([
            data[checksum_offset],
            data[checksum_offset + 1],
            data[checksum_offset + 2],
            data[checksum_offset + 3],
        ]);
        let computed_checksum = crc32fast::hash(&data[..checksum_offset]);
        if computed_checksum != stored_checksum {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Checksum mismatch: computed {:08x}, stored {:08x}",
                    computed_checksum, stored_checksum
                ),
            ));
        }

        let mut cursor = Cursor::new(&data[4..checksum_offset]);

        let key_bytes = read_prefixed(&mut cursor)?;
        let key = String::from_utf8(key_bytes).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Invalid UTF-8: {}", e))
        })?;
        let local_id = LocalDocumentId::new(read_u64(&mut cursor)?);
        let revision = RevisionId::new(read_u64(&mut cursor)?);

        let mut tombstone = [0u8; 1];
        cursor.read_exact(&mut tombstone)?;

        let body = read_prefixed(&mut cursor)?;

        Ok((
            Self {
                key,
                local_id,
                revision,
                is_tombstone: tombstone[0] != 0,
                body,
            },
            record_length,
        ))
    }
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_prefixed<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DocumentRecord {
        DocumentRecord::live(
            "alice",
            LocalDocumentId::new(7),
            RevisionId::new(1 << 20),
            br#"{"_key":"alice","age":30}"#.to_vec(),
        )
    }

    #[test]
    fn test_serialized_record_reads_back() {
        let bytes = sample().serialize();
        let (record, consumed) = DocumentRecord::deserialize(&bytes).unwrap();
        assert_eq!(record, sample());
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_tombstone_has_empty_body() {
        let bytes =
            DocumentRecord::tombstone("alice", LocalDocumentId::new(7), RevisionId::new(9)).serialize();
        assert_eq!(bytes.len(), MIN_RECORD_SIZE + "alice".len());
        let (record, _) = DocumentRecord::deserialize(&bytes).unwrap();
        assert!(record.is_tombstone);
        assert!(record.body.is_empty());
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = sample().serialize();
        bytes[10] ^= 0xFF;
        let err = DocumentRecord::deserialize(&bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_record() {
        let bytes = sample().serialize();
        let err = DocumentRecord::deserialize(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
