// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Write-ahead log: durable, single-writer, append-only record stream.
//!
//! Every durable mutation is encoded into a [`WalRecord`] and appended
//! (`append`/`append_batch`) before the engine touches in-memory state.
//! [`Wal::read_all`] replays the log on startup and is self-healing: a
//! partial trailing record left by a crash mid-append is discarded rather
//! than treated as a fatal error.

pub mod record;
mod writer;

pub use record::{frames, OpCode, WalRecord, HEADER_LEN, MAX_KEY_LEN, MAX_VALUE_LEN};
pub use writer::Wal;
