//! Meta file entries.
//!
//! Each committed message has one fixed-size entry in its pair's meta file.
//! Entry `i` of a pair starting at id `s` describes message `s + i`, so the
//! meta offset of a message is computed, never searched.
//!
//! Layout (32 bytes, little-endian):
//! - msg_id: 8 bytes
//! - timestamp: 8 bytes
//! - data offset: 4 bytes
//! - payload length: 4 bytes
//! - uint16 payload: 2 bytes
//! - flags: 1 byte
//! - reserved: 1 byte
//! - crc32 of the preceding 28 bytes: 4 bytes

use bytes::{Buf, BufMut};

use rill_common::{RillError, RillResult, META_ENTRY_SIZE};

const FLAG_COMPRESSED: u8 = 0x01;
const CHECKED_LEN: usize = META_ENTRY_SIZE - 4;

/// One meta file entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaEntry {
    /// Message id.
    pub msg_id: u64,
    /// Message timestamp.
    pub timestamp: i64,
    /// Payload offset in the data file.
    pub offset: u32,
    /// Payload length.
    pub len: u32,
    /// Routing hash.
    pub uint16_payload: u16,
    /// True if the payload is compressed.
    pub compressed: bool,
}

impl MetaEntry {
    /// Size of an encoded entry.
    pub const SIZE: usize = META_ENTRY_SIZE;

    /// Encodes the entry.
    pub fn to_bytes(&self) -> [u8; META_ENTRY_SIZE] {
        let mut buf = [0u8; META_ENTRY_SIZE];
        {
            let mut cursor = &mut buf[..];
            cursor.put_u64_le(self.msg_id);
            cursor.put_i64_le(self.timestamp);
            cursor.put_u32_le(self.offset);
            cursor.put_u32_le(self.len);
            cursor.put_u16_le(self.uint16_payload);
            cursor.put_u8(if self.compressed { FLAG_COMPRESSED } else { 0 });
            cursor.put_u8(0);
        }
        let crc = crc32fast::hash(&buf[..CHECKED_LEN]);
        buf[CHECKED_LEN..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes and verifies an entry.
    pub fn from_bytes(bytes: &[u8]) -> RillResult<Self> {
        if bytes.len() < META_ENTRY_SIZE {
            return Err(RillError::corruption(format!(
                "meta entry needs {META_ENTRY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let computed = crc32fast::hash(&bytes[..CHECKED_LEN]);
        let mut buf = bytes;
        let msg_id = buf.get_u64_le();
        let timestamp = buf.get_i64_le();
        let offset = buf.get_u32_le();
        let len = buf.get_u32_le();
        let uint16_payload = buf.get_u16_le();
        let flags = buf.get_u8();
        let _reserved = buf.get_u8();
        let stored = buf.get_u32_le();
        if stored != computed {
            return Err(RillError::corruption(format!(
                "meta entry of message {msg_id}: checksum {stored:#010x}, computed {computed:#010x}"
            )));
        }
        Ok(Self {
            msg_id,
            timestamp,
            offset,
            len,
            uint16_payload,
            compressed: flags & FLAG_COMPRESSED != 0,
        })
    }

    /// Returns the data file offset one past the payload.
    pub fn end_offset(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.len)
    }
}
