// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! On-disk layout for a `.snap` file.
//!
//! ```text
//! snapshot := header section* body_trailer
//! header   := magic[4]="KVSS" version:u16 created_ms:i64 key_count:u64
//! section  := type_tag:u8 key_len:u32 key_bytes expire_at_ms:i64 payload_len:u32 payload_bytes
//! body_trailer := snapshot_wal_len:u64 crc32:u32
//! ```
//! `crc32` is the IEEE CRC over every preceding byte, header through
//! `snapshot_wal_len`. The section stream between the header and the
//! trailer is optionally XZ-compressed as a whole; the high bit of
//! `version` flags this so `Load` knows whether to wrap it in an
//! `xz2::read::XzDecoder` before parsing sections.

use crate::error::{EngineError, EngineResult};

pub const MAGIC: &[u8; 4] = b"KVSS";
pub const VERSION: u16 = 1;
pub const COMPRESSED_FLAG: u16 = 0x8000;
pub const HEADER_LEN: usize = 4 + 2 + 8 + 8;
pub const TRAILER_LEN: usize = 8 + 4;

pub struct Header {
    pub version: u16,
    pub created_ms: i64,
    pub key_count: u64,
}

impl Header {
    pub fn is_compressed(&self) -> bool {
        self.version & COMPRESSED_FLAG != 0
    }

    pub fn format_version(&self) -> u16 {
        self.version & !COMPRESSED_FLAG
    }
}

pub fn encode_header(created_ms: i64, key_count: u64, compressed: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN);
    buf.extend_from_slice(MAGIC);
    let version = if compressed { VERSION | COMPRESSED_FLAG } else { VERSION };
    buf.extend_from_slice(&version.to_le_bytes());
    buf.extend_from_slice(&created_ms.to_le_bytes());
    buf.extend_from_slice(&key_count.to_le_bytes());
    buf
}

pub fn decode_header(bytes: &[u8]) -> EngineResult<Header> {
    if bytes.len() < HEADER_LEN {
        return Err(EngineError::CorruptSnapshot {
            id: String::new(),
            reason: "file shorter than header".to_string(),
        });
    }
    if &bytes[0..4] != MAGIC {
        return Err(EngineError::CorruptSnapshot {
            id: String::new(),
            reason: "bad magic".to_string(),
        });
    }
    let version = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
    if version & !COMPRESSED_FLAG != VERSION {
        return Err(EngineError::CorruptSnapshot {
            id: String::new(),
            reason: format!("unsupported snapshot version {}", version & !COMPRESSED_FLAG),
        });
    }
    let created_ms = i64::from_le_bytes(bytes[6..14].try_into().unwrap());
    let key_count = u64::from_le_bytes(bytes[14..22].try_into().unwrap());
    Ok(Header { version, created_ms, key_count })
}

/// Encodes one key's section: type tag, key, expiration, payload.
pub fn encode_section(type_tag: u8, key: &[u8], expire_at_ms: i64, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 4 + key.len() + 8 + 4 + payload.len());
    buf.push(type_tag);
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(&expire_at_ms.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

pub struct DecodedSection<'a> {
    pub type_tag: u8,
    pub key: &'a [u8],
    pub expire_at_ms: i64,
    pub payload: &'a [u8],
}

/// Decodes one section starting at `bytes[0]`. Returns the section and how
/// many bytes it consumed, or `None` if `bytes` is exhausted.
pub fn decode_section(bytes: &[u8]) -> EngineResult<Option<(DecodedSection<'_>, usize)>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let err = || EngineError::CorruptSnapshot { id: String::new(), reason: "truncated section".to_string() };
    if bytes.len() < 1 + 4 {
        return Err(err());
    }
    let type_tag = bytes[0];
    let key_len = u32::from_le_bytes(bytes[1..5].try_into().unwrap()) as usize;
    let mut pos = 5;
    if bytes.len() < pos + key_len + 8 + 4 {
        return Err(err());
    }
    let key = &bytes[pos..pos + key_len];
    pos += key_len;
    let expire_at_ms = i64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
    pos += 8;
    let payload_len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
    pos += 4;
    if bytes.len() < pos + payload_len {
        return Err(err());
    }
    let payload = &bytes[pos..pos + payload_len];
    pos += payload_len;
    Ok(Some((DecodedSection { type_tag, key, expire_at_ms, payload }, pos)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_including_compressed_flag() {
        let encoded = encode_header(1234, 7, true);
        let header = decode_header(&encoded).unwrap();
        assert!(header.is_compressed());
        assert_eq!(header.created_ms, 1234);
        assert_eq!(header.key_count, 7);
    }

    #[test]
    fn decode_header_rejects_bad_magic() {
        let mut encoded = encode_header(0, 0, false);
        encoded[0] = b'X';
        assert!(decode_header(&encoded).is_err());
    }

    #[test]
    fn section_round_trips() {
        let encoded = encode_section(0, b"key", 999, b"payload");
        let (section, consumed) = decode_section(&encoded).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(section.type_tag, 0);
        assert_eq!(section.key, b"key");
        assert_eq!(section.expire_at_ms, 999);
        assert_eq!(section.payload, b"payload");
    }

    #[test]
    fn decode_section_on_empty_input_is_none() {
        assert!(decode_section(&[]).unwrap().is_none());
    }

    #[test]
    fn decode_section_rejects_truncated_input() {
        let encoded = encode_section(0, b"key", 0, b"payload");
        assert!(decode_section(&encoded[..encoded.len() - 2]).is_err());
    }
}
