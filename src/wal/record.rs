// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! WAL record encoding: op codes, the 21-byte header, and the frame-stream
//! helpers container ops use to pack multiple sub-values into one record.

use crate::error::EngineError;
use crc32fast::Hasher;

/// Header size in bytes: crc32(4) + op(1) + key_len(4) + val_len(4) + expire_at(8).
pub const HEADER_LEN: usize = 4 + 1 + 4 + 4 + 8;

/// Keys longer than this are treated as corruption during replay.
pub const MAX_KEY_LEN: u32 = 1 << 20; // 1 MiB

/// Values longer than this are treated as corruption during replay.
pub const MAX_VALUE_LEN: u32 = 1 << 30; // 1 GiB

/// Stable, on-disk WAL operation codes. Never renumber an existing variant;
/// unknown codes encountered during replay are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Set = 0x01,
    Delete = 0x02,
    SetWithTtl = 0x03,
    Expire = 0x04,
    Persist = 0x05,
    Rename = 0x06,

    ZAdd = 0x10,
    ZRem = 0x11,
    ZIncrBy = 0x12,
    ZRemRangeByRank = 0x13,
    ZRemRangeByScore = 0x14,

    HSet = 0x20,
    HDel = 0x21,

    LPush = 0x30,
    RPush = 0x31,
    LPop = 0x32,
    RPop = 0x33,
    LSet = 0x34,
    LTrim = 0x35,
    LInsert = 0x36,
    LRem = 0x37,

    SAdd = 0x40,
    SRem = 0x41,
    SPop = 0x42,

    TsAdd = 0x50,
    TsDel = 0x51,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Result<Self, EngineError> {
        Ok(match byte {
            0x01 => Self::Set,
            0x02 => Self::Delete,
            0x03 => Self::SetWithTtl,
            0x04 => Self::Expire,
            0x05 => Self::Persist,
            0x06 => Self::Rename,
            0x10 => Self::ZAdd,
            0x11 => Self::ZRem,
            0x12 => Self::ZIncrBy,
            0x13 => Self::ZRemRangeByRank,
            0x14 => Self::ZRemRangeByScore,
            0x20 => Self::HSet,
            0x21 => Self::HDel,
            0x30 => Self::LPush,
            0x31 => Self::RPush,
            0x32 => Self::LPop,
            0x33 => Self::RPop,
            0x34 => Self::LSet,
            0x35 => Self::LTrim,
            0x36 => Self::LInsert,
            0x37 => Self::LRem,
            0x40 => Self::SAdd,
            0x41 => Self::SRem,
            0x42 => Self::SPop,
            0x50 => Self::TsAdd,
            0x51 => Self::TsDel,
            other => return Err(EngineError::UnknownOpCode { code: other }),
        })
    }
}

/// A single decoded (or yet-to-be-written) WAL record.
#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    pub op: OpCode,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Absolute expiration, Unix ms. `0` means "no TTL change".
    pub expire_at_ms: i64,
}

impl WalRecord {
    pub fn new(op: OpCode, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, expire_at_ms: i64) -> Self {
        Self { op, key: key.into(), value: value.into(), expire_at_ms }
    }

    /// Encodes this record to its on-disk representation: a 21-byte header
    /// followed by `key` then `value`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.key.len() + self.value.len());
        // Reserve space for the CRC, fill it in once the rest is known.
        buf.extend_from_slice(&[0u8; 4]);
        buf.push(self.op as u8);
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.expire_at_ms.to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let mut hasher = Hasher::new();
        hasher.update(&buf[4..]);
        let crc = hasher.finalize();
        buf[0..4].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a single record from the front of `bytes`, returning the
    /// record and the number of bytes consumed.
    ///
    /// Returns `Ok(None)` if `bytes` doesn't hold a full header yet (the
    /// caller is expected to treat that as "stop, nothing more to read" at
    /// end of file, not as corruption).
    pub fn decode(bytes: &[u8]) -> Result<Option<(Self, usize)>, EngineError> {
        if bytes.len() < HEADER_LEN {
            return Ok(None);
        }

        let crc_stored = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let op_byte = bytes[4];
        let key_len = u32::from_le_bytes(bytes[5..9].try_into().unwrap());
        let val_len = u32::from_le_bytes(bytes[9..13].try_into().unwrap());
        let expire_at_ms = i64::from_le_bytes(bytes[13..21].try_into().unwrap());

        if key_len > MAX_KEY_LEN || val_len > MAX_VALUE_LEN {
            return Err(EngineError::CorruptWal {
                offset: 0,
                reason: format!("implausible lengths: key_len={key_len}, val_len={val_len}"),
            });
        }

        let body_len = key_len as usize + val_len as usize;
        if bytes.len() < HEADER_LEN + body_len {
            // Short body: either truncated-at-EOF (self-healing case) or
            // a lie in the header. The caller can't tell the difference
            // from length alone, so this is always treated as corruption.
            return Err(EngineError::CorruptWal {
                offset: 0,
                reason: "record body shorter than header claims".to_string(),
            });
        }

        let mut hasher = Hasher::new();
        hasher.update(&bytes[4..HEADER_LEN + body_len]);
        let crc_computed = hasher.finalize();
        if crc_computed != crc_stored {
            return Err(EngineError::CorruptWal {
                offset: 0,
                reason: format!("CRC mismatch: stored=0x{crc_stored:08x} computed=0x{crc_computed:08x}"),
            });
        }

        let op = OpCode::from_byte(op_byte)?;
        let key = bytes[HEADER_LEN..HEADER_LEN + key_len as usize].to_vec();
        let value = bytes[HEADER_LEN + key_len as usize..HEADER_LEN + body_len].to_vec();

        Ok(Some((Self { op, key, value, expire_at_ms }, HEADER_LEN + body_len)))
    }
}

/// Frame-stream helpers: a payload is a flat sequence of `u32 LE length`
/// prefixes followed by that many bytes, repeated until exhausted. Used by
/// every container op (`hset`, `zadd`, `sadd`, `lpush`, ...) to pack more
/// than one sub-value into a WAL record's `value` field.
pub mod frames {
    /// Encodes `parts` as a frame stream.
    pub fn encode(parts: &[&[u8]]) -> Vec<u8> {
        let mut buf = Vec::new();
        for part in parts {
            buf.extend_from_slice(&(part.len() as u32).to_le_bytes());
            buf.extend_from_slice(part);
        }
        buf
    }

    /// Decodes a frame stream back into its parts. Returns `None` if the
    /// stream is malformed (a trailing partial frame).
    pub fn decode(mut bytes: &[u8]) -> Option<Vec<Vec<u8>>> {
        let mut parts = Vec::new();
        while !bytes.is_empty() {
            if bytes.len() < 4 {
                return None;
            }
            let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
            bytes = &bytes[4..];
            if bytes.len() < len {
                return None;
            }
            parts.push(bytes[..len].to_vec());
            bytes = &bytes[len..];
        }
        Some(parts)
    }
}
