// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Hash ops: hset, hget, hdel, hincrby, ...

use crate::error::{EngineError, EngineResult};
use crate::keyspace::entry::Entry;
use crate::keyspace::value::Value;
use crate::keyspace::Keyspace;
use std::collections::HashMap;

fn parse_i64(bytes: &[u8]) -> EngineResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| EngineError::invalid_argument("hash field value is not an integer"))
}

fn parse_f64(bytes: &[u8]) -> EngineResult<f64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| EngineError::invalid_argument("hash field value is not a float"))
}

impl Keyspace {
    fn with_hash_mut<T>(
        &self,
        key: &[u8],
        f: impl FnOnce(&mut HashMap<Vec<u8>, Vec<u8>>) -> T,
    ) -> EngineResult<T> {
        let mut shard = self.write(key);
        let entry = shard.entry(key.to_vec()).or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
        match &mut entry.value {
            Value::Hash(h) => Ok(f(h)),
            other => Err(EngineError::wrong_type(key, "hash", other.type_name())),
        }
    }

    /// Sets `field` to `value`. Returns whether the field was newly
    /// created.
    pub fn hset(&self, key: &[u8], field: Vec<u8>, value: Vec<u8>) -> EngineResult<bool> {
        self.with_hash_mut(key, |h| h.insert(field, value).is_none())
    }

    pub fn hsetnx(&self, key: &[u8], field: Vec<u8>, value: Vec<u8>) -> EngineResult<bool> {
        self.with_hash_mut(key, |h| {
            if h.contains_key(&field) {
                false
            } else {
                h.insert(field, value);
                true
            }
        })
    }

    pub fn hget(&self, key: &[u8], field: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::Hash(h) => Ok(h.get(field).cloned()),
                other => Err(EngineError::wrong_type(key, "hash", other.type_name())),
            },
            None => Ok(None),
        }
    }

    pub fn hmset(&self, key: &[u8], pairs: Vec<(Vec<u8>, Vec<u8>)>) -> EngineResult<()> {
        self.with_hash_mut(key, |h| {
            for (field, value) in pairs {
                h.insert(field, value);
            }
        })
    }

    pub fn hmget(&self, key: &[u8], fields: &[Vec<u8>]) -> EngineResult<Vec<Option<Vec<u8>>>> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::Hash(h) => Ok(fields.iter().map(|f| h.get(f.as_slice()).cloned()).collect()),
                other => Err(EngineError::wrong_type(key, "hash", other.type_name())),
            },
            None => Ok(vec![None; fields.len()]),
        }
    }

    /// Returns whether `field` was present and removed.
    pub fn hdel(&self, key: &[u8], field: &[u8]) -> EngineResult<bool> {
        self.with_hash_mut(key, |h| h.remove(field).is_some())
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> EngineResult<bool> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::Hash(h) => Ok(h.contains_key(field)),
                other => Err(EngineError::wrong_type(key, "hash", other.type_name())),
            },
            None => Ok(false),
        }
    }

    pub fn hlen(&self, key: &[u8]) -> EngineResult<usize> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::Hash(h) => Ok(h.len()),
                other => Err(EngineError::wrong_type(key, "hash", other.type_name())),
            },
            None => Ok(0),
        }
    }

    pub fn hgetall(&self, key: &[u8]) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::Hash(h) => Ok(h.iter().map(|(f, v)| (f.clone(), v.clone())).collect()),
                other => Err(EngineError::wrong_type(key, "hash", other.type_name())),
            },
            None => Ok(Vec::new()),
        }
    }

    pub fn hkeys(&self, key: &[u8]) -> EngineResult<Vec<Vec<u8>>> {
        Ok(self.hgetall(key)?.into_iter().map(|(f, _)| f).collect())
    }

    pub fn hvals(&self, key: &[u8]) -> EngineResult<Vec<Vec<u8>>> {
        Ok(self.hgetall(key)?.into_iter().map(|(_, v)| v).collect())
    }

    pub fn hincrby(&self, key: &[u8], field: &[u8], delta: i64) -> EngineResult<i64> {
        let mut shard = self.write(key);
        let entry = shard.entry(key.to_vec()).or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
        match &mut entry.value {
            Value::Hash(h) => {
                let current = match h.get(field) {
                    Some(v) => parse_i64(v)?,
                    None => 0,
                };
                let next = current.checked_add(delta).ok_or_else(|| {
                    EngineError::invalid_argument("increment would overflow i64")
                })?;
                h.insert(field.to_vec(), next.to_string().into_bytes());
                Ok(next)
            }
            other => Err(EngineError::wrong_type(key, "hash", other.type_name())),
        }
    }

    pub fn hincrbyfloat(&self, key: &[u8], field: &[u8], delta: f64) -> EngineResult<f64> {
        let mut shard = self.write(key);
        let entry = shard.entry(key.to_vec()).or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
        match &mut entry.value {
            Value::Hash(h) => {
                let current = match h.get(field) {
                    Some(v) => parse_f64(v)?,
                    None => 0.0,
                };
                let next = current + delta;
                h.insert(field.to_vec(), next.to_string().into_bytes());
                Ok(next)
            }
            other => Err(EngineError::wrong_type(key, "hash", other.type_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hset_then_hgetall_returns_every_field_once_with_last_write() {
        let ks = Keyspace::new(4);
        ks.hset(b"h", b"a".to_vec(), b"1".to_vec()).unwrap();
        ks.hset(b"h", b"b".to_vec(), b"2".to_vec()).unwrap();
        ks.hset(b"h", b"a".to_vec(), b"3".to_vec()).unwrap();

        let mut all = ks.hgetall(b"h").unwrap();
        all.sort();
        assert_eq!(all, vec![(b"a".to_vec(), b"3".to_vec()), (b"b".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn hsetnx_does_not_overwrite() {
        let ks = Keyspace::new(4);
        assert!(ks.hsetnx(b"h", b"f".to_vec(), b"1".to_vec()).unwrap());
        assert!(!ks.hsetnx(b"h", b"f".to_vec(), b"2".to_vec()).unwrap());
        assert_eq!(ks.hget(b"h", b"f").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn hdel_missing_field_returns_false() {
        let ks = Keyspace::new(4);
        ks.hset(b"h", b"f".to_vec(), b"1".to_vec()).unwrap();
        assert!(!ks.hdel(b"h", b"g").unwrap());
        assert!(ks.hdel(b"h", b"f").unwrap());
    }

    #[test]
    fn hincrby_accumulates_from_zero() {
        let ks = Keyspace::new(4);
        assert_eq!(ks.hincrby(b"h", b"n", 3).unwrap(), 3);
        assert_eq!(ks.hincrby(b"h", b"n", 4).unwrap(), 7);
    }
}
