// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! String ops: get, set, incr/decr, append, strlen.

use crate::error::{EngineError, EngineResult};
use crate::keyspace::entry::Entry;
use crate::keyspace::value::Value;
use crate::keyspace::Keyspace;

fn parse_i64(bytes: &[u8]) -> EngineResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| EngineError::invalid_argument("value is not an integer"))
}

fn parse_f64(bytes: &[u8]) -> EngineResult<f64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| EngineError::invalid_argument("value is not a float"))
}

impl Keyspace {
    pub fn get(&self, key: &[u8]) -> EngineResult<Vec<u8>> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => entry
                .value
                .as_string()
                .cloned()
                .ok_or_else(|| EngineError::wrong_type(key, "string", entry.value.type_name())),
            None => Err(EngineError::not_found(key)),
        }
    }

    pub fn set(&self, key: &[u8], value: Vec<u8>) {
        self.write(key).insert(key.to_vec(), Entry::new(Value::String(value)));
    }

    pub fn set_with_ttl(&self, key: &[u8], value: Vec<u8>, expire_at_ms: i64) {
        self.write(key).insert(key.to_vec(), Entry::with_ttl(Value::String(value), expire_at_ms));
    }

    pub fn mget(&self, keys: &[Vec<u8>]) -> Vec<Option<Vec<u8>>> {
        keys.iter().map(|k| self.get(k).ok()).collect()
    }

    pub fn mset(&self, pairs: &[(Vec<u8>, Vec<u8>)]) {
        for (key, value) in pairs {
            self.set(key, value.clone());
        }
    }

    pub fn strlen(&self, key: &[u8]) -> EngineResult<usize> {
        match self.get(key) {
            Ok(value) => Ok(value.len()),
            Err(EngineError::NotFound { .. }) => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn append(&self, key: &[u8], suffix: &[u8]) -> EngineResult<usize> {
        let mut shard = self.write(key);
        match shard.get_mut(key) {
            Some(entry) => match &mut entry.value {
                Value::String(s) => {
                    s.extend_from_slice(suffix);
                    Ok(s.len())
                }
                other => Err(EngineError::wrong_type(key, "string", other.type_name())),
            },
            None => {
                let len = suffix.len();
                shard.insert(key.to_vec(), Entry::new(Value::String(suffix.to_vec())));
                Ok(len)
            }
        }
    }

    /// Adds `delta` to the integer stored at `key` (creating it at `0`
    /// first if absent), returning the new value.
    pub fn incrby(&self, key: &[u8], delta: i64) -> EngineResult<i64> {
        let mut shard = self.write(key);
        match shard.get_mut(key) {
            Some(entry) => match &entry.value {
                Value::String(s) => {
                    let current = parse_i64(s)?;
                    let next = current.checked_add(delta).ok_or_else(|| {
                        EngineError::invalid_argument("increment would overflow i64")
                    })?;
                    entry.value = Value::String(next.to_string().into_bytes());
                    Ok(next)
                }
                other => Err(EngineError::wrong_type(key, "string", other.type_name())),
            },
            None => {
                shard.insert(key.to_vec(), Entry::new(Value::String(delta.to_string().into_bytes())));
                Ok(delta)
            }
        }
    }

    pub fn incrbyfloat(&self, key: &[u8], delta: f64) -> EngineResult<f64> {
        let mut shard = self.write(key);
        match shard.get_mut(key) {
            Some(entry) => match &entry.value {
                Value::String(s) => {
                    let current = parse_f64(s)?;
                    let next = current + delta;
                    entry.value = Value::String(next.to_string().into_bytes());
                    Ok(next)
                }
                other => Err(EngineError::wrong_type(key, "string", other.type_name())),
            },
            None => {
                shard.insert(key.to_vec(), Entry::new(Value::String(delta.to_string().into_bytes())));
                Ok(delta)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let ks = Keyspace::new(4);
        ks.set(b"a", b"hello".to_vec());
        assert_eq!(ks.get(b"a").unwrap(), b"hello".to_vec());
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let ks = Keyspace::new(4);
        assert!(matches!(ks.get(b"missing"), Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn get_on_wrong_type_fails() {
        let ks = Keyspace::new(4);
        ks.sadd(b"a", vec![b"x".to_vec()]).unwrap();
        assert!(matches!(ks.get(b"a"), Err(EngineError::WrongType { .. })));
    }

    #[test]
    fn incrby_creates_then_accumulates() {
        let ks = Keyspace::new(4);
        assert_eq!(ks.incrby(b"counter", 5).unwrap(), 5);
        assert_eq!(ks.incrby(b"counter", -2).unwrap(), 3);
    }

    #[test]
    fn incrby_on_non_integer_is_invalid_argument() {
        let ks = Keyspace::new(4);
        ks.set(b"a", b"not a number".to_vec());
        assert!(matches!(ks.incrby(b"a", 1), Err(EngineError::InvalidArgument { .. })));
    }

    #[test]
    fn append_extends_or_creates() {
        let ks = Keyspace::new(4);
        assert_eq!(ks.append(b"a", b"hello").unwrap(), 5);
        assert_eq!(ks.append(b"a", b" world").unwrap(), 11);
        assert_eq!(ks.get(b"a").unwrap(), b"hello world".to_vec());
    }

    #[test]
    fn mset_then_mget() {
        let ks = Keyspace::new(4);
        ks.mset(&[(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]);
        assert_eq!(ks.mget(&[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]), vec![
            Some(b"1".to_vec()),
            Some(b"2".to_vec()),
            None,
        ]);
    }
}
