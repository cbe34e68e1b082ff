// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Sorted-set ops: zadd, zrem, zscore, zrank/zrevrank, zrange/zrevrange,
//! zrangebyscore, zincrby, zcard, zcount, zpopmin/zpopmax.

use crate::error::{EngineError, EngineResult};
use crate::keyspace::entry::Entry;
use crate::keyspace::value::{Value, ZSet};
use crate::keyspace::Keyspace;

impl Keyspace {
    fn with_zset_mut<T>(&self, key: &[u8], f: impl FnOnce(&mut ZSet) -> T) -> EngineResult<T> {
        let mut shard = self.write(key);
        let entry = shard.entry(key.to_vec()).or_insert_with(|| Entry::new(Value::SortedSet(ZSet::new())));
        match &mut entry.value {
            Value::SortedSet(z) => Ok(f(z)),
            other => Err(EngineError::wrong_type(key, "zset", other.type_name())),
        }
    }

    fn zset_snapshot(&self, key: &[u8]) -> EngineResult<ZSet> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::SortedSet(z) => Ok(z.clone()),
                other => Err(EngineError::wrong_type(key, "zset", other.type_name())),
            },
            None => Ok(ZSet::new()),
        }
    }

    /// Adds or updates `member`'s score. Returns whether it was newly added.
    pub fn zadd(&self, key: &[u8], member: Vec<u8>, score: f64) -> EngineResult<bool> {
        self.with_zset_mut(key, |z| z.insert(member, score).is_none())
    }

    pub fn zrem(&self, key: &[u8], member: &[u8]) -> EngineResult<bool> {
        self.with_zset_mut(key, |z| z.remove(member).is_some())
    }

    pub fn zscore(&self, key: &[u8], member: &[u8]) -> EngineResult<Option<f64>> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::SortedSet(z) => Ok(z.score(member)),
                other => Err(EngineError::wrong_type(key, "zset", other.type_name())),
            },
            None => Ok(None),
        }
    }

    pub fn zcard(&self, key: &[u8]) -> EngineResult<usize> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::SortedSet(z) => Ok(z.len()),
                other => Err(EngineError::wrong_type(key, "zset", other.type_name())),
            },
            None => Ok(0),
        }
    }

    pub fn zincrby(&self, key: &[u8], member: &[u8], delta: f64) -> EngineResult<f64> {
        self.with_zset_mut(key, |z| {
            let next = z.score(member).unwrap_or(0.0) + delta;
            z.insert(member.to_vec(), next);
            next
        })
    }

    /// 0-based rank, ascending (score, member) order.
    pub fn zrank(&self, key: &[u8], member: &[u8]) -> EngineResult<Option<usize>> {
        let z = self.zset_snapshot(key)?;
        Ok(z.iter_ordered().position(|(m, _)| m == member))
    }

    pub fn zrevrank(&self, key: &[u8], member: &[u8]) -> EngineResult<Option<usize>> {
        let z = self.zset_snapshot(key)?;
        let len = z.len();
        Ok(self.zrank(key, member)?.map(|rank| len - 1 - rank))
    }

    /// Inclusive index range in ascending order, negative indices count from
    /// the tail.
    pub fn zrange(&self, key: &[u8], start: i64, stop: i64) -> EngineResult<Vec<(Vec<u8>, f64)>> {
        let z = self.zset_snapshot(key)?;
        let all: Vec<_> = z.iter_ordered().map(|(m, s)| (m.to_vec(), s)).collect();
        Ok(slice_inclusive(&all, start, stop).to_vec())
    }

    pub fn zrevrange(&self, key: &[u8], start: i64, stop: i64) -> EngineResult<Vec<(Vec<u8>, f64)>> {
        let z = self.zset_snapshot(key)?;
        let mut all: Vec<_> = z.iter_ordered().map(|(m, s)| (m.to_vec(), s)).collect();
        all.reverse();
        Ok(slice_inclusive(&all, start, stop).to_vec())
    }

    /// Members with `min <= score <= max`, in ascending order, with an
    /// optional `(offset, count)` window applied after filtering.
    pub fn zrangebyscore(
        &self,
        key: &[u8],
        min: f64,
        max: f64,
        limit: Option<(usize, usize)>,
    ) -> EngineResult<Vec<(Vec<u8>, f64)>> {
        let z = self.zset_snapshot(key)?;
        let mut matches: Vec<_> =
            z.iter_ordered().filter(|(_, s)| *s >= min && *s <= max).map(|(m, s)| (m.to_vec(), s)).collect();
        if let Some((offset, count)) = limit {
            matches = matches.into_iter().skip(offset).take(count).collect();
        }
        Ok(matches)
    }

    pub fn zcount(&self, key: &[u8], min: f64, max: f64) -> EngineResult<usize> {
        let z = self.zset_snapshot(key)?;
        Ok(z.iter_ordered().filter(|(_, s)| *s >= min && *s <= max).count())
    }

    pub fn zpopmin(&self, key: &[u8]) -> EngineResult<Option<(Vec<u8>, f64)>> {
        self.with_zset_mut(key, |z| {
            let first = z.iter_ordered().next().map(|(m, s)| (m.to_vec(), s));
            if let Some((member, _)) = &first {
                z.remove(member);
            }
            first
        })
    }

    pub fn zpopmax(&self, key: &[u8]) -> EngineResult<Option<(Vec<u8>, f64)>> {
        self.with_zset_mut(key, |z| {
            let last = z.iter_ordered().next_back().map(|(m, s)| (m.to_vec(), s));
            if let Some((member, _)) = &last {
                z.remove(member);
            }
            last
        })
    }

    /// Removes all members whose ascending-order rank falls in `[start,
    /// stop]` (inclusive, negative indices count from the tail). Returns
    /// the removed `(member, score)` pairs.
    pub fn zremrangebyrank(&self, key: &[u8], start: i64, stop: i64) -> EngineResult<Vec<(Vec<u8>, f64)>> {
        self.with_zset_mut(key, |z| {
            let all: Vec<_> = z.iter_ordered().map(|(m, s)| (m.to_vec(), s)).collect();
            let removed = slice_inclusive(&all, start, stop);
            for (member, _) in &removed {
                z.remove(member);
            }
            removed
        })
    }

    /// Removes all members with `min <= score <= max`. Returns the removed
    /// `(member, score)` pairs.
    pub fn zremrangebyscore(&self, key: &[u8], min: f64, max: f64) -> EngineResult<Vec<(Vec<u8>, f64)>> {
        self.with_zset_mut(key, |z| {
            let removed: Vec<_> =
                z.iter_ordered().filter(|(_, s)| *s >= min && *s <= max).map(|(m, s)| (m.to_vec(), s)).collect();
            for (member, _) in &removed {
                z.remove(member);
            }
            removed
        })
    }
}

fn slice_inclusive<T: Clone>(items: &[T], start: i64, stop: i64) -> Vec<T> {
    let len = items.len() as i64;
    let start = if start < 0 { (len + start).max(0) } else { start.min(len) };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || len == 0 {
        return Vec::new();
    }
    items[start as usize..=(stop as usize)].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zadd_then_zrange_orders_by_score_with_member_tiebreak() {
        let ks = Keyspace::new(4);
        ks.zadd(b"z", b"b".to_vec(), 1.0).unwrap();
        ks.zadd(b"z", b"a".to_vec(), 1.0).unwrap();
        ks.zadd(b"z", b"c".to_vec(), 0.5).unwrap();
        let range = ks.zrange(b"z", 0, -1).unwrap();
        assert_eq!(
            range,
            vec![(b"c".to_vec(), 0.5), (b"a".to_vec(), 1.0), (b"b".to_vec(), 1.0)]
        );
    }

    #[test]
    fn zrank_and_zrevrank_are_consistent() {
        let ks = Keyspace::new(4);
        ks.zadd(b"z", b"a".to_vec(), 1.0).unwrap();
        ks.zadd(b"z", b"b".to_vec(), 2.0).unwrap();
        ks.zadd(b"z", b"c".to_vec(), 3.0).unwrap();
        assert_eq!(ks.zrank(b"z", b"a").unwrap(), Some(0));
        assert_eq!(ks.zrevrank(b"z", b"a").unwrap(), Some(2));
    }

    #[test]
    fn zrangebyscore_applies_bounds_and_limit() {
        let ks = Keyspace::new(4);
        for (m, s) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            ks.zadd(b"z", m.as_bytes().to_vec(), s).unwrap();
        }
        let all = ks.zrangebyscore(b"z", 2.0, 4.0, None).unwrap();
        assert_eq!(all, vec![(b"b".to_vec(), 2.0), (b"c".to_vec(), 3.0), (b"d".to_vec(), 4.0)]);

        let limited = ks.zrangebyscore(b"z", 2.0, 4.0, Some((1, 1))).unwrap();
        assert_eq!(limited, vec![(b"c".to_vec(), 3.0)]);
    }

    #[test]
    fn zincrby_accumulates_from_zero() {
        let ks = Keyspace::new(4);
        assert_eq!(ks.zincrby(b"z", b"m", 2.5).unwrap(), 2.5);
        assert_eq!(ks.zincrby(b"z", b"m", 1.5).unwrap(), 4.0);
    }

    #[test]
    fn zremrangebyrank_removes_the_inclusive_window() {
        let ks = Keyspace::new(4);
        for (m, s) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            ks.zadd(b"z", m.as_bytes().to_vec(), s).unwrap();
        }
        let removed = ks.zremrangebyrank(b"z", 0, 1).unwrap();
        assert_eq!(removed, vec![(b"a".to_vec(), 1.0), (b"b".to_vec(), 2.0)]);
        assert_eq!(ks.zcard(b"z").unwrap(), 2);
    }

    #[test]
    fn zremrangebyscore_removes_members_in_bounds() {
        let ks = Keyspace::new(4);
        for (m, s) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
            ks.zadd(b"z", m.as_bytes().to_vec(), s).unwrap();
        }
        let removed = ks.zremrangebyscore(b"z", 2.0, 3.0).unwrap();
        assert_eq!(removed, vec![(b"b".to_vec(), 2.0), (b"c".to_vec(), 3.0)]);
        assert_eq!(ks.zcard(b"z").unwrap(), 1);
    }

    #[test]
    fn zpopmin_and_zpopmax_remove_the_extremes() {
        let ks = Keyspace::new(4);
        ks.zadd(b"z", b"a".to_vec(), 1.0).unwrap();
        ks.zadd(b"z", b"b".to_vec(), 2.0).unwrap();
        ks.zadd(b"z", b"c".to_vec(), 3.0).unwrap();
        assert_eq!(ks.zpopmin(b"z").unwrap(), Some((b"a".to_vec(), 1.0)));
        assert_eq!(ks.zpopmax(b"z").unwrap(), Some((b"c".to_vec(), 3.0)));
        assert_eq!(ks.zcard(b"z").unwrap(), 1);
    }
}
