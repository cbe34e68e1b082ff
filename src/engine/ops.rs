// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Typed engine operations: every call here follows the mandatory
//! write-path ordering (encode → append → mutate → CDC → return) and every
//! read updates the hot-key counter before returning.
//!
//! [`replay`] is the recovery-time counterpart: it applies a decoded
//! [`WalRecord`] straight to the [`Keyspace`], bypassing the WAL (the record
//! is already durable) and the CDC stream (subscribers were never live
//! during recovery).

use crate::cdc::CdcOp;
use crate::engine::{now_ms, Engine};
use crate::error::{EngineError, EngineResult};
use crate::keyspace::Keyspace;
use crate::wal::frames;
use crate::wal::{OpCode, WalRecord};
use std::collections::HashSet;

pub use crate::keyspace::TransactionOp;

const NO_TTL: i64 = 0;

fn parse_i64(bytes: &[u8], what: &str) -> EngineResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| EngineError::invalid_argument(format!("{what} is not an integer")))
}

fn parse_f64(bytes: &[u8], what: &str) -> EngineResult<f64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| EngineError::invalid_argument(format!("{what} is not a float")))
}

fn f64_bytes(v: f64) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

fn bytes_f64(b: &[u8]) -> f64 {
    f64::from_le_bytes(b.try_into().expect("malformed f64 frame in WAL"))
}

fn i64_bytes(v: i64) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

fn bytes_i64(b: &[u8]) -> i64 {
    i64::from_le_bytes(b.try_into().expect("malformed i64 frame in WAL"))
}

impl Engine {
    fn emit(&self, op: CdcOp, key: &[u8], value: Option<Vec<u8>>, field: Option<Vec<u8>>) {
        self.cdc.record(now_ms(), op, key.to_vec(), value, field);
    }

    /// Lazy TTL expiry: `Keyspace` itself only reports whether a key was
    /// expired and removed it — logging the implied delete is the engine's
    /// job, the same durability/CDC obligation as any other mutation. Every
    /// read-path method calls this before touching the key.
    fn lazy_expire(&self, key: &[u8]) {
        if self.keyspace.check_and_expire(key, now_ms()) {
            let _ = self.wal.append(&WalRecord::new(OpCode::Delete, key.to_vec(), Vec::new(), NO_TTL));
            self.emit(CdcOp::Expire, key, None, None);
        }
    }

    // ---- strings --------------------------------------------------------

    pub fn get(&self, key: &[u8]) -> EngineResult<Vec<u8>> {
        self.lazy_expire(key);
        let value = self.keyspace.get(key)?;
        self.hotkey.record(key);
        Ok(value)
    }

    pub fn mget(&self, keys: &[Vec<u8>]) -> Vec<Option<Vec<u8>>> {
        for key in keys {
            self.lazy_expire(key);
            self.hotkey.record(key);
        }
        self.keyspace.mget(keys)
    }

    pub fn set(&self, key: &[u8], value: Vec<u8>) -> EngineResult<()> {
        self.wal.append(&WalRecord::new(OpCode::Set, key.to_vec(), value.clone(), NO_TTL))?;
        self.keyspace.set(key, value.clone());
        self.emit(CdcOp::Set, key, Some(value), None);
        Ok(())
    }

    pub fn set_with_ttl(&self, key: &[u8], value: Vec<u8>, expire_at_ms: i64) -> EngineResult<()> {
        self.wal.append(&WalRecord::new(OpCode::SetWithTtl, key.to_vec(), value.clone(), expire_at_ms))?;
        self.keyspace.set_with_ttl(key, value.clone(), expire_at_ms);
        self.emit(CdcOp::Set, key, Some(value), None);
        Ok(())
    }

    pub fn mset(&self, pairs: &[(Vec<u8>, Vec<u8>)]) -> EngineResult<()> {
        let records: Vec<WalRecord> =
            pairs.iter().map(|(k, v)| WalRecord::new(OpCode::Set, k.clone(), v.clone(), NO_TTL)).collect();
        self.wal.append_batch(&records)?;
        self.keyspace.mset_atomic(pairs);
        for (key, value) in pairs {
            self.emit(CdcOp::Set, key, Some(value.clone()), None);
        }
        Ok(())
    }

    /// Sets every pair only if none of the keys already exist. Returns
    /// whether the set was applied.
    ///
    /// The existence check and the WAL append happen under the same
    /// combined shard-lock acquisition that `msetnx_atomic` takes: a
    /// cheap, unlocked pre-check here would leave a window for a
    /// concurrent writer to create one of the keys between the check and
    /// the log, so the decision to log is made *inside* the lock, via the
    /// callback `msetnx_atomic` invokes once it knows the write applies.
    pub fn msetnx(&self, pairs: &[(Vec<u8>, Vec<u8>)]) -> EngineResult<bool> {
        let records: Vec<WalRecord> =
            pairs.iter().map(|(k, v)| WalRecord::new(OpCode::Set, k.clone(), v.clone(), NO_TTL)).collect();
        let applied = self.keyspace.msetnx_atomic(pairs, || self.wal.append_batch(&records))?;
        if applied {
            for (key, value) in pairs {
                self.emit(CdcOp::Set, key, Some(value.clone()), None);
            }
        }
        Ok(applied)
    }

    pub fn incrby(&self, key: &[u8], delta: i64) -> EngineResult<i64> {
        self.lazy_expire(key);
        let current = match self.keyspace.get(key) {
            Ok(v) => parse_i64(&v, "value")?,
            Err(EngineError::NotFound { .. }) => 0,
            Err(e) => return Err(e),
        };
        let next = current.checked_add(delta).ok_or_else(|| EngineError::invalid_argument("increment would overflow"))?;
        let encoded = next.to_string().into_bytes();
        self.wal.append(&WalRecord::new(OpCode::Set, key.to_vec(), encoded.clone(), NO_TTL))?;
        self.keyspace.set(key, encoded.clone());
        self.emit(CdcOp::Set, key, Some(encoded), None);
        Ok(next)
    }

    pub fn incrbyfloat(&self, key: &[u8], delta: f64) -> EngineResult<f64> {
        self.lazy_expire(key);
        let current = match self.keyspace.get(key) {
            Ok(v) => parse_f64(&v, "value")?,
            Err(EngineError::NotFound { .. }) => 0.0,
            Err(e) => return Err(e),
        };
        let next = current + delta;
        let encoded = next.to_string().into_bytes();
        self.wal.append(&WalRecord::new(OpCode::Set, key.to_vec(), encoded.clone(), NO_TTL))?;
        self.keyspace.set(key, encoded.clone());
        self.emit(CdcOp::Set, key, Some(encoded), None);
        Ok(next)
    }

    pub fn append(&self, key: &[u8], suffix: &[u8]) -> EngineResult<usize> {
        self.lazy_expire(key);
        let mut full = match self.keyspace.get(key) {
            Ok(v) => v,
            Err(EngineError::NotFound { .. }) => Vec::new(),
            Err(e) => return Err(e),
        };
        full.extend_from_slice(suffix);
        self.wal.append(&WalRecord::new(OpCode::Set, key.to_vec(), full.clone(), NO_TTL))?;
        self.keyspace.set(key, full.clone());
        let len = full.len();
        self.emit(CdcOp::Set, key, Some(full), None);
        Ok(len)
    }

    pub fn strlen(&self, key: &[u8]) -> EngineResult<usize> {
        self.lazy_expire(key);
        self.hotkey.record(key);
        self.keyspace.strlen(key)
    }

    // ---- generic ----------------------------------------------------------

    pub fn exists(&self, key: &[u8]) -> bool {
        self.lazy_expire(key);
        self.hotkey.record(key);
        self.keyspace.exists(key)
    }

    pub fn type_of(&self, key: &[u8]) -> EngineResult<&'static str> {
        self.lazy_expire(key);
        self.keyspace.type_of(key)
    }

    pub fn del(&self, key: &[u8]) -> EngineResult<bool> {
        if !self.keyspace.exists(key) {
            return Ok(false);
        }
        self.wal.append(&WalRecord::new(OpCode::Delete, key.to_vec(), Vec::new(), NO_TTL))?;
        let removed = self.keyspace.del(key);
        if removed {
            self.emit(CdcOp::Delete, key, None, None);
        }
        Ok(removed)
    }

    pub fn expire_at(&self, key: &[u8], at_ms: i64) -> EngineResult<bool> {
        self.wal.append(&WalRecord::new(OpCode::Expire, key.to_vec(), Vec::new(), at_ms))?;
        let applied = self.keyspace.expire_at(key, at_ms);
        if applied {
            self.emit(CdcOp::Expire, key, None, None);
        }
        Ok(applied)
    }

    pub fn persist(&self, key: &[u8]) -> EngineResult<bool> {
        self.wal.append(&WalRecord::new(OpCode::Persist, key.to_vec(), Vec::new(), NO_TTL))?;
        Ok(self.keyspace.persist(key))
    }

    pub fn pttl(&self, key: &[u8]) -> EngineResult<Option<i64>> {
        self.lazy_expire(key);
        self.keyspace.pttl(key, now_ms())
    }

    pub fn ttl_secs(&self, key: &[u8]) -> EngineResult<Option<i64>> {
        self.lazy_expire(key);
        self.keyspace.ttl_secs(key, now_ms())
    }

    pub fn rename(&self, src: &[u8], dst: &[u8]) -> EngineResult<()> {
        self.lazy_expire(src);
        self.wal.append(&WalRecord::new(OpCode::Rename, src.to_vec(), dst.to_vec(), NO_TTL))?;
        self.keyspace.rename(src, dst)?;
        self.emit(CdcOp::Rename, src, Some(dst.to_vec()), None);
        Ok(())
    }

    /// Applies a batch of sets/deletes atomically, across shards, as a
    /// single WAL-append and a single combined lock acquisition.
    pub fn exec(&self, ops: Vec<TransactionOp>) -> EngineResult<()> {
        let records: Vec<WalRecord> = ops
            .iter()
            .map(|op| match op {
                TransactionOp::Set { key, value } => WalRecord::new(OpCode::Set, key.clone(), value.clone(), NO_TTL),
                TransactionOp::Delete { key } => WalRecord::new(OpCode::Delete, key.clone(), Vec::new(), NO_TTL),
            })
            .collect();
        self.wal.append_batch(&records)?;
        self.keyspace.apply_transaction(&ops);
        for op in &ops {
            match op {
                TransactionOp::Set { key, value } => self.emit(CdcOp::Set, key, Some(value.clone()), None),
                TransactionOp::Delete { key } => self.emit(CdcOp::Delete, key, None, None),
            }
        }
        Ok(())
    }

    // ---- hashes -------------------------------------------------------

    pub fn hset(&self, key: &[u8], field: Vec<u8>, value: Vec<u8>) -> EngineResult<bool> {
        self.lazy_expire(key);
        let payload = frames::encode(&[&field, &value]);
        self.wal.append(&WalRecord::new(OpCode::HSet, key.to_vec(), payload, NO_TTL))?;
        let created = self.keyspace.hset(key, field.clone(), value.clone())?;
        self.emit(CdcOp::HashSet, key, Some(value), Some(field));
        Ok(created)
    }

    pub fn hsetnx(&self, key: &[u8], field: Vec<u8>, value: Vec<u8>) -> EngineResult<bool> {
        self.lazy_expire(key);
        if self.keyspace.hexists(key, &field)? {
            return Ok(false);
        }
        let payload = frames::encode(&[&field, &value]);
        self.wal.append(&WalRecord::new(OpCode::HSet, key.to_vec(), payload, NO_TTL))?;
        let applied = self.keyspace.hsetnx(key, field.clone(), value.clone())?;
        if applied {
            self.emit(CdcOp::HashSet, key, Some(value), Some(field));
        }
        Ok(applied)
    }

    pub fn hmset(&self, key: &[u8], pairs: Vec<(Vec<u8>, Vec<u8>)>) -> EngineResult<()> {
        self.lazy_expire(key);
        let records: Vec<WalRecord> = pairs
            .iter()
            .map(|(f, v)| WalRecord::new(OpCode::HSet, key.to_vec(), frames::encode(&[f, v]), NO_TTL))
            .collect();
        self.wal.append_batch(&records)?;
        self.keyspace.hmset(key, pairs.clone())?;
        for (field, value) in pairs {
            self.emit(CdcOp::HashSet, key, Some(value), Some(field));
        }
        Ok(())
    }

    pub fn hget(&self, key: &[u8], field: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        self.lazy_expire(key);
        self.hotkey.record(key);
        self.keyspace.hget(key, field)
    }

    pub fn hmget(&self, key: &[u8], fields: &[Vec<u8>]) -> EngineResult<Vec<Option<Vec<u8>>>> {
        self.lazy_expire(key);
        self.hotkey.record(key);
        self.keyspace.hmget(key, fields)
    }

    pub fn hdel(&self, key: &[u8], field: &[u8]) -> EngineResult<bool> {
        self.wal.append(&WalRecord::new(OpCode::HDel, key.to_vec(), field.to_vec(), NO_TTL))?;
        let removed = self.keyspace.hdel(key, field)?;
        if removed {
            self.emit(CdcOp::HashDelete, key, None, Some(field.to_vec()));
        }
        Ok(removed)
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> EngineResult<bool> {
        self.lazy_expire(key);
        self.keyspace.hexists(key, field)
    }

    pub fn hlen(&self, key: &[u8]) -> EngineResult<usize> {
        self.lazy_expire(key);
        self.keyspace.hlen(key)
    }

    pub fn hgetall(&self, key: &[u8]) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.lazy_expire(key);
        self.hotkey.record(key);
        self.keyspace.hgetall(key)
    }

    pub fn hkeys(&self, key: &[u8]) -> EngineResult<Vec<Vec<u8>>> {
        self.lazy_expire(key);
        self.keyspace.hkeys(key)
    }

    pub fn hvals(&self, key: &[u8]) -> EngineResult<Vec<Vec<u8>>> {
        self.lazy_expire(key);
        self.keyspace.hvals(key)
    }

    pub fn hincrby(&self, key: &[u8], field: &[u8], delta: i64) -> EngineResult<i64> {
        self.lazy_expire(key);
        let current = match self.keyspace.hget(key, field)? {
            Some(v) => parse_i64(&v, "hash field value")?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or_else(|| EngineError::invalid_argument("increment would overflow"))?;
        let encoded = next.to_string().into_bytes();
        let payload = frames::encode(&[field, &encoded]);
        self.wal.append(&WalRecord::new(OpCode::HSet, key.to_vec(), payload, NO_TTL))?;
        self.keyspace.hset(key, field.to_vec(), encoded.clone())?;
        self.emit(CdcOp::HashSet, key, Some(encoded), Some(field.to_vec()));
        Ok(next)
    }

    pub fn hincrbyfloat(&self, key: &[u8], field: &[u8], delta: f64) -> EngineResult<f64> {
        self.lazy_expire(key);
        let current = match self.keyspace.hget(key, field)? {
            Some(v) => parse_f64(&v, "hash field value")?,
            None => 0.0,
        };
        let next = current + delta;
        let encoded = next.to_string().into_bytes();
        let payload = frames::encode(&[field, &encoded]);
        self.wal.append(&WalRecord::new(OpCode::HSet, key.to_vec(), payload, NO_TTL))?;
        self.keyspace.hset(key, field.to_vec(), encoded.clone())?;
        self.emit(CdcOp::HashSet, key, Some(encoded), Some(field.to_vec()));
        Ok(next)
    }

    // ---- lists ----------------------------------------------------------

    pub fn lpush(&self, key: &[u8], values: &[Vec<u8>]) -> EngineResult<usize> {
        self.lazy_expire(key);
        let refs: Vec<&[u8]> = values.iter().map(|v| v.as_slice()).collect();
        self.wal.append(&WalRecord::new(OpCode::LPush, key.to_vec(), frames::encode(&refs), NO_TTL))?;
        let len = self.keyspace.lpush(key, values)?;
        for value in values {
            self.emit(CdcOp::ListPush, key, Some(value.clone()), None);
        }
        Ok(len)
    }

    pub fn rpush(&self, key: &[u8], values: &[Vec<u8>]) -> EngineResult<usize> {
        self.lazy_expire(key);
        let refs: Vec<&[u8]> = values.iter().map(|v| v.as_slice()).collect();
        self.wal.append(&WalRecord::new(OpCode::RPush, key.to_vec(), frames::encode(&refs), NO_TTL))?;
        let len = self.keyspace.rpush(key, values)?;
        for value in values {
            self.emit(CdcOp::ListPush, key, Some(value.clone()), None);
        }
        Ok(len)
    }

    pub fn lpop(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        self.lazy_expire(key);
        if self.keyspace.llen(key)? == 0 {
            return Ok(None);
        }
        self.wal.append(&WalRecord::new(OpCode::LPop, key.to_vec(), Vec::new(), NO_TTL))?;
        let popped = self.keyspace.lpop(key)?;
        if let Some(value) = &popped {
            self.emit(CdcOp::ListPop, key, Some(value.clone()), None);
        }
        Ok(popped)
    }

    pub fn rpop(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        self.lazy_expire(key);
        if self.keyspace.llen(key)? == 0 {
            return Ok(None);
        }
        self.wal.append(&WalRecord::new(OpCode::RPop, key.to_vec(), Vec::new(), NO_TTL))?;
        let popped = self.keyspace.rpop(key)?;
        if let Some(value) = &popped {
            self.emit(CdcOp::ListPop, key, Some(value.clone()), None);
        }
        Ok(popped)
    }

    pub fn llen(&self, key: &[u8]) -> EngineResult<usize> {
        self.lazy_expire(key);
        self.keyspace.llen(key)
    }

    pub fn lindex(&self, key: &[u8], index: i64) -> EngineResult<Option<Vec<u8>>> {
        self.lazy_expire(key);
        self.hotkey.record(key);
        self.keyspace.lindex(key, index)
    }

    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> EngineResult<Vec<Vec<u8>>> {
        self.lazy_expire(key);
        self.hotkey.record(key);
        self.keyspace.lrange(key, start, stop)
    }

    pub fn lset(&self, key: &[u8], index: i64, value: Vec<u8>) -> EngineResult<()> {
        self.lazy_expire(key);
        if !self.keyspace.exists(key) {
            return Err(EngineError::not_found(key));
        }
        let len = self.keyspace.llen(key)?;
        let normalized = if index < 0 { index + len as i64 } else { index };
        if normalized < 0 || normalized >= len as i64 {
            return Err(EngineError::IndexOutOfRange { index, len });
        }
        let payload = frames::encode(&[&i64_bytes(index), &value]);
        self.wal.append(&WalRecord::new(OpCode::LSet, key.to_vec(), payload, NO_TTL))?;
        self.keyspace.lset(key, index, value.clone())?;
        self.emit(CdcOp::ListPush, key, Some(value), None);
        Ok(())
    }

    /// The pivot lookup below only tells us an insert will happen; it
    /// doesn't pin down *where*, so the WAL still carries `before`/`pivot`
    /// and replay re-finds the pivot itself — deterministic, since pivot
    /// lookup doesn't depend on anything but the list's own contents.
    pub fn linsert(&self, key: &[u8], before: bool, pivot: &[u8], value: Vec<u8>) -> EngineResult<Option<usize>> {
        self.lazy_expire(key);
        let items = self.keyspace.lrange(key, 0, -1)?;
        if !items.iter().any(|v| v.as_slice() == pivot) {
            return Ok(None);
        }
        let flag = vec![before as u8];
        let payload = frames::encode(&[&flag, pivot, &value]);
        self.wal.append(&WalRecord::new(OpCode::LInsert, key.to_vec(), payload, NO_TTL))?;
        let result = self.keyspace.linsert(key, before, pivot, value.clone())?;
        if result.is_some() {
            self.emit(CdcOp::ListPush, key, Some(value), None);
        }
        Ok(result)
    }

    pub fn lrem(&self, key: &[u8], count: i64, value: &[u8]) -> EngineResult<usize> {
        self.lazy_expire(key);
        let items = self.keyspace.lrange(key, 0, -1)?;
        if !items.iter().any(|v| v.as_slice() == value) {
            return Ok(0);
        }
        let payload = frames::encode(&[&i64_bytes(count), value]);
        self.wal.append(&WalRecord::new(OpCode::LRem, key.to_vec(), payload, NO_TTL))?;
        let removed = self.keyspace.lrem(key, count, value)?;
        if removed > 0 {
            self.emit(CdcOp::ListPop, key, Some(value.to_vec()), None);
        }
        Ok(removed)
    }

    pub fn ltrim(&self, key: &[u8], start: i64, stop: i64) -> EngineResult<()> {
        self.lazy_expire(key);
        if let Ok(actual) = self.keyspace.type_of(key) {
            if actual != "list" {
                return Err(EngineError::wrong_type(key, "list", actual));
            }
        }
        let payload = frames::encode(&[&i64_bytes(start), &i64_bytes(stop)]);
        self.wal.append(&WalRecord::new(OpCode::LTrim, key.to_vec(), payload, NO_TTL))?;
        self.keyspace.ltrim(key, start, stop)?;
        self.emit(CdcOp::ListPop, key, None, None);
        Ok(())
    }

    // ---- sets -----------------------------------------------------------

    pub fn sadd(&self, key: &[u8], members: Vec<Vec<u8>>) -> EngineResult<usize> {
        self.lazy_expire(key);
        let mut seen = HashSet::new();
        let mut added = 0usize;
        for m in &members {
            if seen.insert(m.clone()) && !self.keyspace.sismember(key, m)? {
                added += 1;
            }
        }
        if added > 0 {
            let refs: Vec<&[u8]> = members.iter().map(|m| m.as_slice()).collect();
            self.wal.append(&WalRecord::new(OpCode::SAdd, key.to_vec(), frames::encode(&refs), NO_TTL))?;
            self.keyspace.sadd(key, members.clone())?;
            for member in &members {
                self.emit(CdcOp::SetAdd, key, Some(member.clone()), None);
            }
        }
        Ok(added)
    }

    pub fn srem(&self, key: &[u8], members: &[Vec<u8>]) -> EngineResult<usize> {
        self.lazy_expire(key);
        let mut seen = HashSet::new();
        let mut removed = 0usize;
        for m in members {
            if seen.insert(m.clone()) && self.keyspace.sismember(key, m)? {
                removed += 1;
            }
        }
        if removed > 0 {
            let refs: Vec<&[u8]> = members.iter().map(|m| m.as_slice()).collect();
            self.wal.append(&WalRecord::new(OpCode::SRem, key.to_vec(), frames::encode(&refs), NO_TTL))?;
            self.keyspace.srem(key, members)?;
            for member in members {
                self.emit(CdcOp::SetRemove, key, Some(member.clone()), None);
            }
        }
        Ok(removed)
    }

    pub fn sismember(&self, key: &[u8], member: &[u8]) -> EngineResult<bool> {
        self.lazy_expire(key);
        self.keyspace.sismember(key, member)
    }

    pub fn scard(&self, key: &[u8]) -> EngineResult<usize> {
        self.lazy_expire(key);
        self.keyspace.scard(key)
    }

    pub fn smembers(&self, key: &[u8]) -> EngineResult<Vec<Vec<u8>>> {
        self.lazy_expire(key);
        self.hotkey.record(key);
        self.keyspace.smembers(key)
    }

    pub fn srandmember(&self, key: &[u8], count: i64) -> EngineResult<Vec<Vec<u8>>> {
        self.lazy_expire(key);
        self.keyspace.srandmember(key, count)
    }

    /// Pops up to `count` random members. The *resolved* members are what's
    /// written to the WAL (not the count), so replay is deterministic
    /// without re-rolling randomness: the random selection is made here,
    /// against the current set, logged, and then committed via `srem` —
    /// the same call replay itself uses to apply a logged `SPop`.
    pub fn spop(&self, key: &[u8], count: usize) -> EngineResult<Vec<Vec<u8>>> {
        self.lazy_expire(key);
        let selected = self.keyspace.spop_select(key, count)?;
        if selected.is_empty() {
            return Ok(selected);
        }
        let refs: Vec<&[u8]> = selected.iter().map(|m| m.as_slice()).collect();
        self.wal.append(&WalRecord::new(OpCode::SPop, key.to_vec(), frames::encode(&refs), NO_TTL))?;
        self.keyspace.srem(key, &selected)?;
        for member in &selected {
            self.emit(CdcOp::SetRemove, key, Some(member.clone()), None);
        }
        Ok(selected)
    }

    pub fn sunion(&self, keys: &[Vec<u8>]) -> EngineResult<Vec<Vec<u8>>> {
        for key in keys {
            self.lazy_expire(key);
        }
        self.keyspace.sunion(keys)
    }

    pub fn sinter(&self, keys: &[Vec<u8>]) -> EngineResult<Vec<Vec<u8>>> {
        for key in keys {
            self.lazy_expire(key);
        }
        self.keyspace.sinter(keys)
    }

    pub fn sdiff(&self, keys: &[Vec<u8>]) -> EngineResult<Vec<Vec<u8>>> {
        for key in keys {
            self.lazy_expire(key);
        }
        self.keyspace.sdiff(keys)
    }

    // ---- sorted sets ------------------------------------------------------

    pub fn zadd(&self, key: &[u8], member: Vec<u8>, score: f64) -> EngineResult<bool> {
        self.lazy_expire(key);
        let payload = frames::encode(&[&member, &f64_bytes(score)]);
        self.wal.append(&WalRecord::new(OpCode::ZAdd, key.to_vec(), payload, NO_TTL))?;
        let created = self.keyspace.zadd(key, member.clone(), score)?;
        self.emit(CdcOp::ZsetAdd, key, Some(f64_bytes(score)), Some(member));
        Ok(created)
    }

    pub fn zrem(&self, key: &[u8], member: &[u8]) -> EngineResult<bool> {
        self.wal.append(&WalRecord::new(OpCode::ZRem, key.to_vec(), member.to_vec(), NO_TTL))?;
        let removed = self.keyspace.zrem(key, member)?;
        if removed {
            self.emit(CdcOp::ZsetRemove, key, None, Some(member.to_vec()));
        }
        Ok(removed)
    }

    pub fn zscore(&self, key: &[u8], member: &[u8]) -> EngineResult<Option<f64>> {
        self.lazy_expire(key);
        self.keyspace.zscore(key, member)
    }

    pub fn zcard(&self, key: &[u8]) -> EngineResult<usize> {
        self.lazy_expire(key);
        self.keyspace.zcard(key)
    }

    pub fn zincrby(&self, key: &[u8], member: &[u8], delta: f64) -> EngineResult<f64> {
        self.lazy_expire(key);
        let current = self.keyspace.zscore(key, member)?.unwrap_or(0.0);
        let next = current + delta;
        let payload = frames::encode(&[member, &f64_bytes(next)]);
        self.wal.append(&WalRecord::new(OpCode::ZAdd, key.to_vec(), payload, NO_TTL))?;
        self.keyspace.zadd(key, member.to_vec(), next)?;
        self.emit(CdcOp::ZsetAdd, key, Some(f64_bytes(next)), Some(member.to_vec()));
        Ok(next)
    }

    pub fn zrank(&self, key: &[u8], member: &[u8]) -> EngineResult<Option<usize>> {
        self.lazy_expire(key);
        self.keyspace.zrank(key, member)
    }

    pub fn zrevrank(&self, key: &[u8], member: &[u8]) -> EngineResult<Option<usize>> {
        self.lazy_expire(key);
        self.keyspace.zrevrank(key, member)
    }

    pub fn zrange(&self, key: &[u8], start: i64, stop: i64) -> EngineResult<Vec<(Vec<u8>, f64)>> {
        self.lazy_expire(key);
        self.hotkey.record(key);
        self.keyspace.zrange(key, start, stop)
    }

    pub fn zrevrange(&self, key: &[u8], start: i64, stop: i64) -> EngineResult<Vec<(Vec<u8>, f64)>> {
        self.lazy_expire(key);
        self.hotkey.record(key);
        self.keyspace.zrevrange(key, start, stop)
    }

    pub fn zrangebyscore(
        &self,
        key: &[u8],
        min: f64,
        max: f64,
        limit: Option<(usize, usize)>,
    ) -> EngineResult<Vec<(Vec<u8>, f64)>> {
        self.lazy_expire(key);
        self.keyspace.zrangebyscore(key, min, max, limit)
    }

    pub fn zcount(&self, key: &[u8], min: f64, max: f64) -> EngineResult<usize> {
        self.lazy_expire(key);
        self.keyspace.zcount(key, min, max)
    }

    pub fn zpopmin(&self, key: &[u8]) -> EngineResult<Option<(Vec<u8>, f64)>> {
        self.lazy_expire(key);
        let top = self.keyspace.zrange(key, 0, 0)?;
        let Some((member, score)) = top.into_iter().next() else {
            return Ok(None);
        };
        self.wal.append(&WalRecord::new(OpCode::ZRem, key.to_vec(), member.clone(), NO_TTL))?;
        self.keyspace.zrem(key, &member)?;
        self.emit(CdcOp::ZsetRemove, key, Some(f64_bytes(score)), Some(member.clone()));
        Ok(Some((member, score)))
    }

    pub fn zpopmax(&self, key: &[u8]) -> EngineResult<Option<(Vec<u8>, f64)>> {
        self.lazy_expire(key);
        let top = self.keyspace.zrevrange(key, 0, 0)?;
        let Some((member, score)) = top.into_iter().next() else {
            return Ok(None);
        };
        self.wal.append(&WalRecord::new(OpCode::ZRem, key.to_vec(), member.clone(), NO_TTL))?;
        self.keyspace.zrem(key, &member)?;
        self.emit(CdcOp::ZsetRemove, key, Some(f64_bytes(score)), Some(member.clone()));
        Ok(Some((member, score)))
    }

    pub fn zremrangebyrank(&self, key: &[u8], start: i64, stop: i64) -> EngineResult<usize> {
        self.lazy_expire(key);
        let preview = self.keyspace.zrange(key, start, stop)?;
        if preview.is_empty() {
            return Ok(0);
        }
        let payload = frames::encode(&[&i64_bytes(start), &i64_bytes(stop)]);
        self.wal.append(&WalRecord::new(OpCode::ZRemRangeByRank, key.to_vec(), payload, NO_TTL))?;
        let removed = self.keyspace.zremrangebyrank(key, start, stop)?;
        for (member, score) in &removed {
            self.emit(CdcOp::ZsetRemove, key, Some(f64_bytes(*score)), Some(member.clone()));
        }
        Ok(removed.len())
    }

    pub fn zremrangebyscore(&self, key: &[u8], min: f64, max: f64) -> EngineResult<usize> {
        self.lazy_expire(key);
        let preview = self.keyspace.zrangebyscore(key, min, max, None)?;
        if preview.is_empty() {
            return Ok(0);
        }
        let payload = frames::encode(&[&f64_bytes(min), &f64_bytes(max)]);
        self.wal.append(&WalRecord::new(OpCode::ZRemRangeByScore, key.to_vec(), payload, NO_TTL))?;
        let removed = self.keyspace.zremrangebyscore(key, min, max)?;
        for (member, score) in &removed {
            self.emit(CdcOp::ZsetRemove, key, Some(f64_bytes(*score)), Some(member.clone()));
        }
        Ok(removed.len())
    }

    // ---- time series ------------------------------------------------------

    pub fn ts_add(&self, key: &[u8], timestamp_ms: i64, value: f64, retention_ms: Option<i64>) -> EngineResult<()> {
        self.lazy_expire(key);
        let retention_tag = retention_ms.unwrap_or(i64::MIN);
        let payload = frames::encode(&[&i64_bytes(timestamp_ms), &f64_bytes(value), &i64_bytes(retention_tag)]);
        self.wal.append(&WalRecord::new(OpCode::TsAdd, key.to_vec(), payload, NO_TTL))?;
        self.keyspace.ts_add(key, timestamp_ms, value, retention_ms)?;
        self.emit(CdcOp::TimeSeriesAdd, key, Some(f64_bytes(value)), None);
        Ok(())
    }

    pub fn ts_get(&self, key: &[u8]) -> EngineResult<Option<crate::keyspace::TsPoint>> {
        self.lazy_expire(key);
        self.keyspace.ts_get(key)
    }

    pub fn ts_range(&self, key: &[u8], from_ms: i64, to_ms: i64) -> EngineResult<Vec<crate::keyspace::TsPoint>> {
        self.lazy_expire(key);
        self.keyspace.ts_range(key, from_ms, to_ms)
    }

    pub fn ts_info(&self, key: &[u8]) -> EngineResult<crate::keyspace::TsInfo> {
        self.lazy_expire(key);
        self.keyspace.ts_info(key)
    }

    pub fn ts_del(&self, key: &[u8]) -> EngineResult<bool> {
        if !self.keyspace.exists(key) {
            return Ok(false);
        }
        self.wal.append(&WalRecord::new(OpCode::TsDel, key.to_vec(), Vec::new(), NO_TTL))?;
        let removed = self.keyspace.ts_del(key);
        if removed {
            self.emit(CdcOp::Delete, key, None, None);
        }
        Ok(removed)
    }
}

/// Applies a single recovered WAL record to `keyspace`, bypassing the WAL
/// (already durable) and the CDC stream (no subscribers during recovery).
/// Malformed frame payloads are a recovery-time bug, not a runtime error
/// path, so they panic rather than returning a `Result` nobody can act on.
pub fn replay(keyspace: &Keyspace, record: WalRecord) {
    let key = record.key;
    let value = record.value;

    match record.op {
        OpCode::Set => keyspace.set(&key, value),
        OpCode::SetWithTtl => keyspace.set_with_ttl(&key, value, record.expire_at_ms),
        OpCode::Delete => {
            keyspace.del(&key);
        }
        OpCode::Expire => {
            keyspace.expire_at(&key, record.expire_at_ms);
        }
        OpCode::Persist => {
            keyspace.persist(&key);
        }
        OpCode::Rename => {
            let _ = keyspace.rename(&key, &value);
        }

        OpCode::ZAdd => {
            let parts = frames::decode(&value).expect("malformed ZAdd frame in WAL");
            let _ = keyspace.zadd(&key, parts[0].clone(), bytes_f64(&parts[1]));
        }
        OpCode::ZRem => {
            let _ = keyspace.zrem(&key, &value);
        }
        OpCode::ZIncrBy => {
            let parts = frames::decode(&value).expect("malformed ZIncrBy frame in WAL");
            let _ = keyspace.zadd(&key, parts[0].clone(), bytes_f64(&parts[1]));
        }
        OpCode::ZRemRangeByRank => {
            let parts = frames::decode(&value).expect("malformed ZRemRangeByRank frame in WAL");
            let _ = keyspace.zremrangebyrank(&key, bytes_i64(&parts[0]), bytes_i64(&parts[1]));
        }
        OpCode::ZRemRangeByScore => {
            let parts = frames::decode(&value).expect("malformed ZRemRangeByScore frame in WAL");
            let _ = keyspace.zremrangebyscore(&key, bytes_f64(&parts[0]), bytes_f64(&parts[1]));
        }

        OpCode::HSet => {
            let parts = frames::decode(&value).expect("malformed HSet frame in WAL");
            let _ = keyspace.hset(&key, parts[0].clone(), parts[1].clone());
        }
        OpCode::HDel => {
            let _ = keyspace.hdel(&key, &value);
        }

        OpCode::LPush => {
            let parts = frames::decode(&value).expect("malformed LPush frame in WAL");
            let _ = keyspace.lpush(&key, &parts);
        }
        OpCode::RPush => {
            let parts = frames::decode(&value).expect("malformed RPush frame in WAL");
            let _ = keyspace.rpush(&key, &parts);
        }
        OpCode::LPop => {
            let _ = keyspace.lpop(&key);
        }
        OpCode::RPop => {
            let _ = keyspace.rpop(&key);
        }
        OpCode::LSet => {
            let parts = frames::decode(&value).expect("malformed LSet frame in WAL");
            let _ = keyspace.lset(&key, bytes_i64(&parts[0]), parts[1].clone());
        }
        OpCode::LTrim => {
            let parts = frames::decode(&value).expect("malformed LTrim frame in WAL");
            let _ = keyspace.ltrim(&key, bytes_i64(&parts[0]), bytes_i64(&parts[1]));
        }
        OpCode::LInsert => {
            let parts = frames::decode(&value).expect("malformed LInsert frame in WAL");
            let before = parts[0][0] != 0;
            let _ = keyspace.linsert(&key, before, &parts[1], parts[2].clone());
        }
        OpCode::LRem => {
            let parts = frames::decode(&value).expect("malformed LRem frame in WAL");
            let _ = keyspace.lrem(&key, bytes_i64(&parts[0]), &parts[1]);
        }

        OpCode::SAdd => {
            let parts = frames::decode(&value).expect("malformed SAdd frame in WAL");
            let _ = keyspace.sadd(&key, parts);
        }
        OpCode::SRem => {
            let parts = frames::decode(&value).expect("malformed SRem frame in WAL");
            let _ = keyspace.srem(&key, &parts);
        }
        OpCode::SPop => {
            let parts = frames::decode(&value).expect("malformed SPop frame in WAL");
            let _ = keyspace.srem(&key, &parts);
        }

        OpCode::TsAdd => {
            let parts = frames::decode(&value).expect("malformed TsAdd frame in WAL");
            let timestamp_ms = bytes_i64(&parts[0]);
            let sample = bytes_f64(&parts[1]);
            let retention_tag = bytes_i64(&parts[2]);
            let retention_ms = if retention_tag == i64::MIN { None } else { Some(retention_tag) };
            let _ = keyspace.ts_add(&key, timestamp_ms, sample, retention_ms);
        }
        OpCode::TsDel => {
            keyspace.ts_del(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;

    fn open_engine(dir: &std::path::Path) -> Engine {
        let config = EngineConfig::new(dir.join("wal.log"), dir.join("snapshots"));
        Engine::open(config).unwrap()
    }

    #[test]
    fn set_and_hash_and_list_ops_recover_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = open_engine(dir.path());
            engine.set(b"s", b"1".to_vec()).unwrap();
            engine.hset(b"h", b"f".to_vec(), b"v".to_vec()).unwrap();
            engine.rpush(b"l", &[b"a".to_vec(), b"b".to_vec()]).unwrap();
            engine.sadd(b"set", vec![b"x".to_vec()]).unwrap();
            engine.zadd(b"z", b"m".to_vec(), 1.5).unwrap();
            engine.ts_add(b"t", 100, 42.0, None).unwrap();
        }

        let engine = open_engine(dir.path());
        assert_eq!(engine.get(b"s").unwrap(), b"1");
        assert_eq!(engine.hget(b"h", b"f").unwrap(), Some(b"v".to_vec()));
        assert_eq!(engine.lrange(b"l", 0, -1).unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);
        assert!(engine.sismember(b"set", b"x").unwrap());
        assert_eq!(engine.zscore(b"z", b"m").unwrap(), Some(1.5));
        assert_eq!(engine.ts_get(b"t").unwrap().unwrap().value, 42.0);
    }

    #[test]
    fn del_then_reopen_does_not_resurrect_the_key() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = open_engine(dir.path());
            engine.set(b"a", b"1".to_vec()).unwrap();
            engine.del(b"a").unwrap();
        }
        let engine = open_engine(dir.path());
        assert!(engine.get(b"a").is_err());
    }

    #[test]
    fn cdc_emits_one_event_per_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path());
        engine.set(b"a", b"1".to_vec()).unwrap();
        engine.set(b"b", b"2".to_vec()).unwrap();
        let events = engine.cdc().latest(10);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].key, b"a".to_vec());
    }

    #[test]
    fn hotkey_tracker_observes_reads() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path());
        engine.set(b"hot", b"1".to_vec()).unwrap();
        for _ in 0..5 {
            engine.get(b"hot").unwrap();
        }
        let top = engine.hotkey().top(1);
        assert_eq!(top[0].0, b"hot".to_vec());
        assert_eq!(top[0].1, 5);
    }

    #[test]
    fn exec_applies_a_mixed_batch_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path());
        engine.set(b"a", b"1".to_vec()).unwrap();
        engine
            .exec(vec![
                TransactionOp::Delete { key: b"a".to_vec() },
                TransactionOp::Set { key: b"b".to_vec(), value: b"2".to_vec() },
            ])
            .unwrap();
        assert!(engine.get(b"a").is_err());
        assert_eq!(engine.get(b"b").unwrap(), b"2");
    }
}
