// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Set ops: sadd, srem, sismember, smembers, scard, srandmember, spop,
//! sunion/sinter/sdiff.

use crate::error::{EngineError, EngineResult};
use crate::keyspace::entry::Entry;
use crate::keyspace::value::Value;
use crate::keyspace::Keyspace;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

impl Keyspace {
    fn with_set_mut<T>(&self, key: &[u8], f: impl FnOnce(&mut HashSet<Vec<u8>>) -> T) -> EngineResult<T> {
        let mut shard = self.write(key);
        let entry = shard.entry(key.to_vec()).or_insert_with(|| Entry::new(Value::Set(HashSet::new())));
        match &mut entry.value {
            Value::Set(s) => Ok(f(s)),
            other => Err(EngineError::wrong_type(key, "set", other.type_name())),
        }
    }

    /// Returns the number of members actually added (excludes duplicates).
    pub fn sadd(&self, key: &[u8], members: Vec<Vec<u8>>) -> EngineResult<usize> {
        self.with_set_mut(key, |s| members.into_iter().filter(|m| s.insert(m.clone())).count())
    }

    /// Returns the number of members actually removed.
    pub fn srem(&self, key: &[u8], members: &[Vec<u8>]) -> EngineResult<usize> {
        self.with_set_mut(key, |s| members.iter().filter(|m| s.remove(m.as_slice())).count())
    }

    pub fn sismember(&self, key: &[u8], member: &[u8]) -> EngineResult<bool> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::Set(s) => Ok(s.contains(member)),
                other => Err(EngineError::wrong_type(key, "set", other.type_name())),
            },
            None => Ok(false),
        }
    }

    pub fn scard(&self, key: &[u8]) -> EngineResult<usize> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::Set(s) => Ok(s.len()),
                other => Err(EngineError::wrong_type(key, "set", other.type_name())),
            },
            None => Ok(0),
        }
    }

    pub fn smembers(&self, key: &[u8]) -> EngineResult<Vec<Vec<u8>>> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::Set(s) => Ok(s.iter().cloned().collect()),
                other => Err(EngineError::wrong_type(key, "set", other.type_name())),
            },
            None => Ok(Vec::new()),
        }
    }

    /// Returns `count` members. `count < 0` allows duplicates (`-count`
    /// draws); `count >= 0` returns distinct members, capped at
    /// `min(count, |set|)`.
    pub fn srandmember(&self, key: &[u8], count: i64) -> EngineResult<Vec<Vec<u8>>> {
        let shard = self.read(key);
        let members: Vec<Vec<u8>> = match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::Set(s) => s.iter().cloned().collect(),
                other => return Err(EngineError::wrong_type(key, "set", other.type_name())),
            },
            None => return Ok(Vec::new()),
        };
        drop(shard);
        if members.is_empty() {
            return Ok(Vec::new());
        }
        let mut rng = rand::thread_rng();
        if count < 0 {
            let draws = (-count) as usize;
            Ok((0..draws).map(|_| members[rng.gen_range(0..members.len())].clone()).collect())
        } else {
            let n = (count as usize).min(members.len());
            let mut pool = members;
            pool.shuffle(&mut rng);
            Ok(pool.into_iter().take(n).collect())
        }
    }

    /// Removes and returns up to `count` distinct random members.
    pub fn spop(&self, key: &[u8], count: usize) -> EngineResult<Vec<Vec<u8>>> {
        self.with_set_mut(key, |s| {
            let mut members: Vec<Vec<u8>> = s.iter().cloned().collect();
            members.shuffle(&mut rand::thread_rng());
            let n = count.min(members.len());
            let popped: Vec<Vec<u8>> = members.into_iter().take(n).collect();
            for m in &popped {
                s.remove(m);
            }
            popped
        })
    }

    /// Selects up to `count` distinct random members without removing them.
    /// Used by the engine to resolve which members a `SPOP` will remove
    /// *before* logging the op, so the WAL records the same members the
    /// subsequent `srem` actually applies.
    pub fn spop_select(&self, key: &[u8], count: usize) -> EngineResult<Vec<Vec<u8>>> {
        let shard = self.read(key);
        let mut members: Vec<Vec<u8>> = match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::Set(s) => s.iter().cloned().collect(),
                other => return Err(EngineError::wrong_type(key, "set", other.type_name())),
            },
            None => return Ok(Vec::new()),
        };
        drop(shard);
        members.shuffle(&mut rand::thread_rng());
        let n = count.min(members.len());
        Ok(members.into_iter().take(n).collect())
    }

    fn set_snapshot(&self, key: &[u8]) -> EngineResult<HashSet<Vec<u8>>> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::Set(s) => Ok(s.clone()),
                other => Err(EngineError::wrong_type(key, "set", other.type_name())),
            },
            None => Ok(HashSet::new()),
        }
    }

    pub fn sunion(&self, keys: &[Vec<u8>]) -> EngineResult<Vec<Vec<u8>>> {
        let mut out: HashSet<Vec<u8>> = HashSet::new();
        for key in keys {
            out.extend(self.set_snapshot(key)?);
        }
        Ok(out.into_iter().collect())
    }

    pub fn sinter(&self, keys: &[Vec<u8>]) -> EngineResult<Vec<Vec<u8>>> {
        let mut sets = Vec::with_capacity(keys.len());
        for key in keys {
            sets.push(self.set_snapshot(key)?);
        }
        let mut iter = sets.into_iter();
        let first = match iter.next() {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };
        let result = iter.fold(first, |acc, s| acc.intersection(&s).cloned().collect());
        Ok(result.into_iter().collect())
    }

    /// Members of `keys[0]` not present in any of `keys[1..]`.
    pub fn sdiff(&self, keys: &[Vec<u8>]) -> EngineResult<Vec<Vec<u8>>> {
        let mut iter = keys.iter();
        let first = match iter.next() {
            Some(key) => self.set_snapshot(key)?,
            None => return Ok(Vec::new()),
        };
        let mut result = first;
        for key in iter {
            let other = self.set_snapshot(key)?;
            result.retain(|m| !other.contains(m));
        }
        Ok(result.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sadd_counts_only_new_members() {
        let ks = Keyspace::new(4);
        assert_eq!(ks.sadd(b"s", vec![b"a".to_vec(), b"b".to_vec()]).unwrap(), 2);
        assert_eq!(ks.sadd(b"s", vec![b"b".to_vec(), b"c".to_vec()]).unwrap(), 1);
        assert_eq!(ks.scard(b"s").unwrap(), 3);
    }

    #[test]
    fn srem_counts_only_removed_members() {
        let ks = Keyspace::new(4);
        ks.sadd(b"s", vec![b"a".to_vec(), b"b".to_vec()]).unwrap();
        assert_eq!(ks.srem(b"s", &[b"a".to_vec(), b"z".to_vec()]).unwrap(), 1);
    }

    #[test]
    fn sunion_sinter_sdiff() {
        let ks = Keyspace::new(4);
        ks.sadd(b"a", vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]).unwrap();
        ks.sadd(b"b", vec![b"2".to_vec(), b"3".to_vec(), b"4".to_vec()]).unwrap();

        let mut union = ks.sunion(&[b"a".to_vec(), b"b".to_vec()]).unwrap();
        union.sort();
        assert_eq!(union, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec(), b"4".to_vec()]);

        let mut inter = ks.sinter(&[b"a".to_vec(), b"b".to_vec()]).unwrap();
        inter.sort();
        assert_eq!(inter, vec![b"2".to_vec(), b"3".to_vec()]);

        let diff = ks.sdiff(&[b"a".to_vec(), b"b".to_vec()]).unwrap();
        assert_eq!(diff, vec![b"1".to_vec()]);
    }

    #[test]
    fn sismember_on_missing_key_is_false() {
        let ks = Keyspace::new(4);
        assert!(!ks.sismember(b"missing", b"x").unwrap());
    }

    #[test]
    fn srandmember_positive_count_returns_distinct_members() {
        let ks = Keyspace::new(4);
        ks.sadd(b"s", vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]).unwrap();
        let picked = ks.srandmember(b"s", 5).unwrap();
        assert_eq!(picked.len(), 3);
        let unique: HashSet<_> = picked.into_iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn srandmember_negative_count_allows_duplicates() {
        let ks = Keyspace::new(4);
        ks.sadd(b"s", vec![b"a".to_vec()]).unwrap();
        let picked = ks.srandmember(b"s", -5).unwrap();
        assert_eq!(picked.len(), 5);
        assert!(picked.iter().all(|m| m == b"a"));
    }

    #[test]
    fn spop_removes_returned_members() {
        let ks = Keyspace::new(4);
        ks.sadd(b"s", vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]).unwrap();
        let popped = ks.spop(b"s", 2).unwrap();
        assert_eq!(popped.len(), 2);
        assert_eq!(ks.scard(b"s").unwrap(), 1);
    }
}
