// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the storage engine.
//!
//! A single enum carries every failure mode across the WAL, keyspace,
//! snapshot manager, CDC stream and engine coordinator. `NotFound`,
//! `WrongType`, `InvalidArgument` and `IndexOutOfRange` are part of normal
//! operation and are expected to be matched on by callers; `IoError` and
//! `CorruptSnapshot` are operational failures.

use std::fmt;

/// Standard `Result` type for all engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error type for every engine operation.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// WAL or snapshot I/O failure.
    IoError { operation: String, reason: String },

    /// CRC mismatch or implausible length while replaying the WAL.
    CorruptWal { offset: u64, reason: String },

    /// Snapshot file failed to deserialize or its footer CRC did not match.
    CorruptSnapshot { id: String, reason: String },

    /// Key, hash field, list index or sorted-set member does not exist.
    NotFound { key: String },

    /// Key exists but holds a different `Value` variant than the op expects.
    WrongType { key: String, expected: &'static str, actual: &'static str },

    /// Malformed input: bad integer/float for INCR, invalid score, invalid
    /// glob pattern, negative count where one isn't allowed, etc.
    InvalidArgument { reason: String },

    /// List index outside `[0, len)` for ops that require an existing slot.
    IndexOutOfRange { index: i64, len: usize },

    /// Unknown WAL op code encountered during replay (file written by a
    /// newer engine version).
    UnknownOpCode { code: u8 },

    /// Could not acquire the WAL's cross-process write lock in time.
    LockTimeout { path: String, timeout_secs: u64 },

    /// Configuration failed validation (e.g. `shard_count` not a power of
    /// two).
    InvalidConfig { reason: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoError { operation, reason } => {
                write!(f, "I/O error during '{operation}': {reason}")
            }
            Self::CorruptWal { offset, reason } => {
                write!(f, "WAL corrupted at offset {offset}: {reason}")
            }
            Self::CorruptSnapshot { id, reason } => {
                write!(f, "snapshot '{id}' is corrupt: {reason}")
            }
            Self::NotFound { key } => write!(f, "key not found: {key}"),
            Self::WrongType { key, expected, actual } => {
                write!(f, "wrong type for key '{key}': expected {expected}, got {actual}")
            }
            Self::InvalidArgument { reason } => write!(f, "invalid argument: {reason}"),
            Self::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for length {len}")
            }
            Self::UnknownOpCode { code } => {
                write!(f, "unknown WAL op code 0x{code:02x} (file written by a newer engine?)")
            }
            Self::LockTimeout { path, timeout_secs } => {
                write!(f, "timed out after {timeout_secs}s waiting for write lock on '{path}'")
            }
            Self::InvalidConfig { reason } => write!(f, "invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Shorthand for a `NotFound` error over a byte-string key.
    pub fn not_found(key: &[u8]) -> Self {
        Self::NotFound { key: String::from_utf8_lossy(key).into_owned() }
    }

    /// Shorthand for a `WrongType` error over a byte-string key.
    pub fn wrong_type(key: &[u8], expected: &'static str, actual: &'static str) -> Self {
        Self::WrongType {
            key: String::from_utf8_lossy(key).into_owned(),
            expected,
            actual,
        }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument { reason: reason.into() }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError { operation: "io".to_string(), reason: err.to_string() }
    }
}
