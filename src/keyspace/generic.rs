// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Generic, type-agnostic key operations: del, exists, type, expire,
//! persist, ttl, keys, scan, randomkey, dbsize, rename.

use crate::error::{EngineError, EngineResult};
use crate::keyspace::entry::Entry;
use crate::keyspace::scan::{glob_match, next_cursor, scan_bucket, SCAN_TABLE_BITS};
use crate::keyspace::value::Value;
use crate::keyspace::Keyspace;
use rand::Rng;
use std::collections::HashMap;
use std::sync::RwLockWriteGuard;

/// One page of a `SCAN` traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<Vec<u8>>,
}

/// One step of an atomic multi-key transaction, applied by
/// [`Keyspace::apply_transaction`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOp {
    Set { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl TransactionOp {
    fn key(&self) -> &[u8] {
        match self {
            TransactionOp::Set { key, .. } => key,
            TransactionOp::Delete { key } => key,
        }
    }
}

impl Keyspace {
    pub fn exists(&self, key: &[u8]) -> bool {
        self.read(key).contains_key(key)
    }

    /// Removes `key`. Returns whether it was present.
    pub fn del(&self, key: &[u8]) -> bool {
        self.write(key).remove(key).is_some()
    }

    pub fn type_of(&self, key: &[u8]) -> EngineResult<&'static str> {
        self.read(key).get(key).map(|e| e.value.type_name()).ok_or_else(|| EngineError::not_found(key))
    }

    /// Sets an absolute expiration. Returns whether the key existed.
    pub fn expire_at(&self, key: &[u8], at_ms: i64) -> bool {
        match self.write(key).get_mut(key) {
            Some(entry) => {
                entry.expire_at_ms = Some(at_ms);
                true
            }
            None => false,
        }
    }

    /// Removes any TTL. Returns whether the key existed.
    pub fn persist(&self, key: &[u8]) -> bool {
        match self.write(key).get_mut(key) {
            Some(entry) => {
                let had_ttl = entry.expire_at_ms.is_some();
                entry.expire_at_ms = None;
                had_ttl
            }
            None => false,
        }
    }

    /// Milliseconds until expiry, `None` if the key has no TTL, or
    /// `NotFound` if it doesn't exist.
    pub fn pttl(&self, key: &[u8], now_ms: i64) -> EngineResult<Option<i64>> {
        self.read(key)
            .get(key)
            .map(|e| e.expire_at_ms.map(|at| (at - now_ms).max(0)))
            .ok_or_else(|| EngineError::not_found(key))
    }

    pub fn ttl_secs(&self, key: &[u8], now_ms: i64) -> EngineResult<Option<i64>> {
        self.pttl(key, now_ms).map(|opt| opt.map(|ms| (ms + 999) / 1000))
    }

    /// Renames `src` to `dst`, overwriting any existing `dst`. Returns
    /// `NotFound` if `src` doesn't exist.
    pub fn rename(&self, src: &[u8], dst: &[u8]) -> EngineResult<()> {
        // Lock order: always the lower shard index first, to avoid
        // deadlocking against a concurrent reverse rename.
        let src_idx = self.idx(src);
        let dst_idx = self.idx(dst);

        if src_idx == dst_idx {
            let mut shard = self.write(src);
            let entry = shard.remove(src).ok_or_else(|| EngineError::not_found(src))?;
            shard.insert(dst.to_vec(), entry);
            return Ok(());
        }

        let (first, second) = if src_idx < dst_idx { (src_idx, dst_idx) } else { (dst_idx, src_idx) };
        let mut guard_first = self.shards[first].write().expect("shard lock poisoned");
        let mut guard_second = self.shards[second].write().expect("shard lock poisoned");

        let (src_guard, dst_guard): (&mut _, &mut _) =
            if src_idx == first { (&mut guard_first, &mut guard_second) } else { (&mut guard_second, &mut guard_first) };

        let entry = src_guard.remove(src).ok_or_else(|| EngineError::not_found(src))?;
        dst_guard.insert(dst.to_vec(), entry);
        Ok(())
    }

    /// All live keys matching `pattern`.
    pub fn keys(&self, pattern: &[u8], now_ms: i64) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        self.for_each_live(now_ms, |key, _| {
            if glob_match(pattern, key) {
                out.push(key.to_vec());
            }
        });
        out
    }

    /// One bounded `SCAN` page. `cursor == 0` starts a new traversal (and
    /// ends one); `match_pattern`/`type_filter` narrow the results without
    /// affecting cursor progression.
    pub fn scan(
        &self,
        cursor: u64,
        match_pattern: Option<&[u8]>,
        count: usize,
        type_filter: Option<&str>,
        now_ms: i64,
    ) -> ScanPage {
        let count = count.max(1);
        let mut keys = Vec::new();
        let mut bucket = cursor;

        loop {
            self.for_each_live(now_ms, |key, entry| {
                if scan_bucket(key) == bucket {
                    let pattern_ok = match_pattern.map(|p| glob_match(p, key)).unwrap_or(true);
                    let type_ok = type_filter.map(|t| entry.value.type_name() == t).unwrap_or(true);
                    if pattern_ok && type_ok {
                        keys.push(key.to_vec());
                    }
                }
            });

            bucket = next_cursor(bucket, SCAN_TABLE_BITS);
            if bucket == 0 || keys.len() >= count {
                break;
            }
        }

        ScanPage { cursor: bucket, keys }
    }

    /// Sets every `(key, value)` pair as a string, locking every distinct
    /// shard involved in ascending shard-id order first so the write is
    /// atomic with respect to any concurrent multi-key operation taking the
    /// same lock-ordering discipline.
    pub fn mset_atomic(&self, pairs: &[(Vec<u8>, Vec<u8>)]) {
        let mut guards = self.lock_shards_for(pairs.iter().map(|(k, _)| k.as_slice()));
        for (key, value) in pairs {
            let idx = self.idx(key);
            let pos = guards.binary_search_by_key(&idx, |(i, _)| *i).unwrap();
            guards[pos].1.insert(key.clone(), Entry::new(Value::String(value.clone())));
        }
    }

    /// Sets every `(key, value)` pair only if none of the keys already
    /// exist, checked and applied under one combined lock acquisition.
    ///
    /// `on_will_apply` runs after the existence check has determined the
    /// write will apply but before any shard is mutated — this is where the
    /// caller durably logs the write. Holding every shard's write lock
    /// across that callback is deliberate: it's the only way to guarantee
    /// no concurrent writer can create one of these keys between "we
    /// decided to apply" and "we logged it". If `on_will_apply` fails, no
    /// shard is mutated. Returns whether the set was applied.
    pub fn msetnx_atomic<F>(&self, pairs: &[(Vec<u8>, Vec<u8>)], on_will_apply: F) -> EngineResult<bool>
    where
        F: FnOnce() -> EngineResult<()>,
    {
        let mut guards = self.lock_shards_for(pairs.iter().map(|(k, _)| k.as_slice()));
        let any_exists = pairs.iter().any(|(key, _)| {
            let idx = self.idx(key);
            let pos = guards.binary_search_by_key(&idx, |(i, _)| *i).unwrap();
            guards[pos].1.contains_key(key.as_slice())
        });
        if any_exists {
            return Ok(false);
        }
        on_will_apply()?;
        for (key, value) in pairs {
            let idx = self.idx(key);
            let pos = guards.binary_search_by_key(&idx, |(i, _)| *i).unwrap();
            guards[pos].1.insert(key.clone(), Entry::new(Value::String(value.clone())));
        }
        Ok(true)
    }

    /// Applies every step of `ops` under one combined, ascending-shard-id
    /// lock acquisition — the same deadlock-free discipline as
    /// `mset_atomic`, generalized to a mix of sets and deletes. Returns, per
    /// op, whether the key existed beforehand (useful for `Delete`'s return
    /// value; always `true` for `Set`, which always succeeds).
    pub fn apply_transaction(&self, ops: &[TransactionOp]) -> Vec<bool> {
        let mut guards = self.lock_shards_for(ops.iter().map(|op| op.key()));
        ops.iter()
            .map(|op| {
                let idx = self.idx(op.key());
                let pos = guards.binary_search_by_key(&idx, |(i, _)| *i).unwrap();
                match op {
                    TransactionOp::Set { key, value } => {
                        guards[pos].1.insert(key.clone(), Entry::new(Value::String(value.clone())));
                        true
                    }
                    TransactionOp::Delete { key } => guards[pos].1.remove(key.as_slice()).is_some(),
                }
            })
            .collect()
    }

    /// Write-locks every distinct shard touched by `keys`, in ascending
    /// shard-id order, returning `(shard_id, guard)` pairs sorted the same
    /// way. Taking locks in a fixed global order is what makes concurrent
    /// multi-key operations deadlock-free.
    fn lock_shards_for<'a>(
        &'a self,
        keys: impl Iterator<Item = &'a [u8]>,
    ) -> Vec<(usize, RwLockWriteGuard<'a, HashMap<Vec<u8>, Entry>>)> {
        let mut idxs: Vec<usize> = keys.map(|k| self.idx(k)).collect();
        idxs.sort_unstable();
        idxs.dedup();
        idxs.into_iter().map(|i| (i, self.shards[i].write().expect("shard lock poisoned"))).collect()
    }

    /// A uniformly random live key, or `None` if the keyspace is empty.
    pub fn randomkey(&self, now_ms: i64) -> Option<Vec<u8>> {
        let mut all = Vec::new();
        self.for_each_live(now_ms, |key, _| all.push(key.to_vec()));
        if all.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..all.len());
        Some(all.swap_remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::entry::Entry;
    use crate::keyspace::value::Value;

    fn put(ks: &Keyspace, key: &str, value: &str) {
        ks.put_entry(key.as_bytes().to_vec(), Entry::new(Value::String(value.as_bytes().to_vec())));
    }

    #[test]
    fn del_and_exists_agree() {
        let ks = Keyspace::new(4);
        put(&ks, "a", "1");
        assert!(ks.exists(b"a"));
        assert!(ks.del(b"a"));
        assert!(!ks.exists(b"a"));
        assert!(!ks.del(b"a"));
    }

    #[test]
    fn expire_then_pttl_then_persist() {
        let ks = Keyspace::new(4);
        put(&ks, "a", "1");
        assert!(ks.expire_at(b"a", 1_000_000));
        assert_eq!(ks.pttl(b"a", 999_000).unwrap(), Some(1_000));
        assert!(ks.persist(b"a"));
        assert_eq!(ks.pttl(b"a", 999_000).unwrap(), None);
    }

    #[test]
    fn rename_moves_the_value() {
        let ks = Keyspace::new(4);
        put(&ks, "a", "1");
        ks.rename(b"a", b"b").unwrap();
        assert!(!ks.exists(b"a"));
        assert_eq!(ks.type_of(b"b").unwrap(), "string");
    }

    #[test]
    fn rename_missing_source_is_not_found() {
        let ks = Keyspace::new(4);
        assert!(matches!(ks.rename(b"missing", b"b"), Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn keys_filters_by_glob_pattern() {
        let ks = Keyspace::new(4);
        put(&ks, "user:1", "a");
        put(&ks, "user:2", "b");
        put(&ks, "order:1", "c");
        let mut matched = ks.keys(b"user:*", 0);
        matched.sort();
        assert_eq!(matched, vec![b"user:1".to_vec(), b"user:2".to_vec()]);
    }

    #[test]
    fn scan_eventually_covers_every_key_without_duplicates() {
        let ks = Keyspace::new(4);
        for i in 0..50 {
            put(&ks, &format!("k{i}"), "v");
        }

        let mut seen = std::collections::HashSet::new();
        let mut cursor = 0u64;
        loop {
            let page = ks.scan(cursor, None, 10, None, 0);
            for key in &page.keys {
                assert!(seen.insert(key.clone()), "key returned twice by SCAN");
            }
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 50);
    }

    #[test]
    fn msetnx_atomic_fails_wholesale_if_any_key_exists() {
        let ks = Keyspace::new(4);
        put(&ks, "a", "1");
        let applied = ks.msetnx_atomic(&[(b"a".to_vec(), b"x".to_vec()), (b"b".to_vec(), b"y".to_vec())], || Ok(())).unwrap();
        assert!(!applied);
        assert!(!ks.exists(b"b"));
    }

    #[test]
    fn msetnx_atomic_applies_when_all_keys_are_absent() {
        let ks = Keyspace::new(4);
        let applied = ks.msetnx_atomic(&[(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())], || Ok(())).unwrap();
        assert!(applied);
        assert_eq!(ks.get(b"a").unwrap(), b"1");
        assert_eq!(ks.get(b"b").unwrap(), b"2");
    }

    #[test]
    fn msetnx_atomic_does_not_apply_when_the_callback_fails() {
        let ks = Keyspace::new(4);
        let result = ks.msetnx_atomic(&[(b"a".to_vec(), b"1".to_vec())], || {
            Err(EngineError::invalid_argument("log failed"))
        });
        assert!(result.is_err());
        assert!(!ks.exists(b"a"));
    }

    #[test]
    fn apply_transaction_mixes_sets_and_deletes_atomically() {
        let ks = Keyspace::new(4);
        put(&ks, "a", "1");
        let results = ks.apply_transaction(&[
            TransactionOp::Set { key: b"b".to_vec(), value: b"2".to_vec() },
            TransactionOp::Delete { key: b"a".to_vec() },
        ]);
        assert_eq!(results, vec![true, true]);
        assert_eq!(ks.get(b"b").unwrap(), b"2");
        assert!(!ks.exists(b"a"));
    }

    #[test]
    fn dbsize_excludes_expired_entries() {
        let ks = Keyspace::new(4);
        put(&ks, "a", "1");
        ks.expire_at(b"a", 100);
        assert_eq!(ks.dbsize(200), 0);
        assert_eq!(ks.dbsize(50), 1);
    }
}
