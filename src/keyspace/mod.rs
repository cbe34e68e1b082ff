// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! The sharded, multi-type, in-memory keyspace.
//!
//! `Keyspace` is pure in-memory bookkeeping: it has no knowledge of the WAL
//! or the CDC stream. [`crate::engine::Engine`] is the only caller, and it
//! is responsible for WAL-logging and CDC-publishing around every mutation;
//! `Keyspace` just applies the change under the right shard lock and
//! reports typed results.
//!
//! Lazy TTL expiry is the one place `Keyspace` hands control back to its
//! caller instead of silently acting: [`Keyspace::check_and_expire`] removes
//! an expired entry and reports that it did so, so the engine can log the
//! implied delete to the WAL and CDC stream before reporting `NotFound`.

pub mod entry;
mod generic;
mod hash_ops;
mod list_ops;
pub mod scan;
mod set_ops;
mod shard;
mod string_ops;
mod timeseries_ops;
pub mod value;
mod zset_ops;

use crate::error::EngineResult;
use entry::Entry;
use shard::{shard_index, Shard};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use value::Value;

pub use generic::{ScanPage, TransactionOp};
pub use timeseries_ops::TsInfo;

/// The sharded keyspace.
pub struct Keyspace {
    shards: Vec<Shard>,
}

impl Keyspace {
    /// Creates an empty keyspace with `shard_count` partitions.
    /// `shard_count` must be a power of two (validated by `EngineConfig`
    /// before this is ever constructed).
    pub fn new(shard_count: usize) -> Self {
        debug_assert!(shard_count.is_power_of_two() && shard_count > 0);
        let shards = (0..shard_count).map(|_| RwLock::new(HashMap::new())).collect();
        Self { shards }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn idx(&self, key: &[u8]) -> usize {
        shard_index(key, self.shards.len())
    }

    fn read(&self, key: &[u8]) -> RwLockReadGuard<'_, HashMap<Vec<u8>, Entry>> {
        self.shards[self.idx(key)].read().expect("shard lock poisoned")
    }

    fn write(&self, key: &[u8]) -> RwLockWriteGuard<'_, HashMap<Vec<u8>, Entry>> {
        self.shards[self.idx(key)].write().expect("shard lock poisoned")
    }

    /// Replaces the entire keyspace with `entries` as a single critical
    /// section: every shard's write lock is taken up front, `f` runs while
    /// all of them are held (so its failure leaves the keyspace untouched),
    /// then every shard is cleared and repopulated from `entries`. Used by
    /// `FLUSHDB` (`entries` empty) and snapshot restore (`entries` the
    /// loaded image), with `f` the matching WAL truncate.
    pub fn replace_all<F>(&self, entries: Vec<(Vec<u8>, Entry)>, f: F) -> EngineResult<()>
    where
        F: FnOnce() -> EngineResult<()>,
    {
        let mut guards: Vec<RwLockWriteGuard<'_, HashMap<Vec<u8>, Entry>>> =
            self.shards.iter().map(|shard| shard.write().expect("shard lock poisoned")).collect();
        f()?;
        for guard in &mut guards {
            guard.clear();
        }
        for (key, entry) in entries {
            let idx = self.idx(&key);
            guards[idx].insert(key, entry);
        }
        Ok(())
    }

    /// Checks whether `key` is present and expired as of `now_ms`; if so,
    /// removes it and returns `true`. The caller (the engine) is
    /// responsible for logging the implied delete.
    pub fn check_and_expire(&self, key: &[u8], now_ms: i64) -> bool {
        {
            let shard = self.read(key);
            match shard.get(key) {
                Some(entry) if entry.is_expired(now_ms) => {}
                _ => return false,
            }
        }
        let mut shard = self.write(key);
        match shard.get(key) {
            Some(entry) if entry.is_expired(now_ms) => {
                shard.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Inserts `entry` directly, overwriting whatever was there. Used by
    /// WAL replay and snapshot restore, which already carry a fully formed
    /// `Entry` and don't need the narrower typed setters.
    pub fn put_entry(&self, key: Vec<u8>, entry: Entry) {
        self.write(&key).insert(key, entry);
    }

    /// Iterates every live (non-expired as of `now_ms`) entry across all
    /// shards. Used by the snapshot manager and by bulk generic ops.
    pub fn for_each_live<F: FnMut(&[u8], &Entry)>(&self, now_ms: i64, mut f: F) {
        for shard in &self.shards {
            let guard = shard.read().expect("shard lock poisoned");
            for (key, entry) in guard.iter() {
                if !entry.is_expired(now_ms) {
                    f(key, entry);
                }
            }
        }
    }

    /// Total live entry count, summed per-shard.
    pub fn dbsize(&self, now_ms: i64) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .read()
                    .expect("shard lock poisoned")
                    .values()
                    .filter(|e| !e.is_expired(now_ms))
                    .count()
            })
            .sum()
    }

    /// Up to `k` keys from exactly one shard, for the active-expiry sweep —
    /// never touches any other shard, so a sweep pass is O(sample size) and
    /// not O(keyspace size).
    pub fn sample_shard_keys(&self, shard_idx: usize, k: usize) -> Vec<Vec<u8>> {
        self.shards[shard_idx]
            .read()
            .expect("shard lock poisoned")
            .keys()
            .take(k)
            .cloned()
            .collect()
    }
}

pub use value::{Score, TimeSeries, TsPoint, ZSet};
