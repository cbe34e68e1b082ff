// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Shard indexing: which of the `N` keyspace partitions a key belongs to.

use crate::keyspace::entry::Entry;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

/// One keyspace partition. Mutations to keys hashing into this shard only
/// take this lock, leaving every other shard free to proceed concurrently.
pub type Shard = RwLock<HashMap<Vec<u8>, Entry>>;

/// `hash(key) mod shard_count`. `shard_count` is always a power of two
/// (validated by `EngineConfig`), so this is a mask rather than a modulo.
pub fn shard_index(key: &[u8], shard_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) & (shard_count - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_index_is_stable_for_the_same_key() {
        let a = shard_index(b"hello", 256);
        let b = shard_index(b"hello", 256);
        assert_eq!(a, b);
    }

    #[test]
    fn shard_index_is_within_bounds() {
        for key in [b"a".as_slice(), b"bb", b"ccc", b""] {
            let idx = shard_index(key, 16);
            assert!(idx < 16);
        }
    }
}
