// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! kvengine - an in-memory, Redis-wire-compatible key/value storage engine
//! core.
//!
//! This crate is the storage layer only: a write-ahead log, a sharded
//! multi-type keyspace, TTL expiration, a change-data-capture stream, a
//! hot-key tracker and a snapshot manager, coordinated by [`engine::Engine`].
//! It has no knowledge of RESP, command dispatch, connections, or
//! replication - those live above this crate.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kvengine::config::EngineConfig;
//! use kvengine::engine::Engine;
//!
//! let config = EngineConfig::new("/var/lib/kvengine/wal.log", "/var/lib/kvengine/snapshots");
//! let engine = Engine::open(config).unwrap();
//! engine.set(b"greeting", b"hello".to_vec()).unwrap();
//! assert_eq!(engine.get(b"greeting").unwrap(), b"hello".to_vec());
//! ```
//!
//! ## Architecture
//!
//! - **wal**: durable, single-writer, append-only record log
//! - **keyspace**: sharded in-memory store for strings, hashes, lists,
//!   sets, sorted sets and time series
//! - **cdc**: bounded change-data-capture stream with live subscriber fan-out
//! - **hotkey**: access-frequency tracking with periodic decay
//! - **snapshot**: full keyspace image serialization for fast recovery
//! - **engine**: the coordinator tying all of the above together

pub mod cdc;
pub mod config;
pub mod engine;
pub mod error;
pub mod hotkey;
pub mod keyspace;
pub mod snapshot;
pub mod wal;

pub use engine::Engine;
pub use error::{EngineError, EngineResult};
