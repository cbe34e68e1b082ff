// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! The tagged `Value` union and its six variants.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// A single sorted-set member/score pair ordered by `(score asc, member
/// bytes asc)`. Wraps `f64` so it can live in a `BTreeSet`; scores are never
/// expected to be NaN, and `total_cmp` gives a well-defined (if unusual for
/// NaN) order even if one sneaks in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score(pub f64);

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A sorted set: a `member -> score` map plus a `(score, member)`-ordered
/// index so range/rank queries don't need a linear scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZSet {
    scores: HashMap<Vec<u8>, f64>,
    #[serde(skip)]
    ordered: BTreeSet<(OrderedScore, Vec<u8>)>,
}

/// Serde-friendly mirror of [`Score`] (derives aren't available through the
/// newtype boundary cleanly inside a `BTreeSet` key tuple once `serde(skip)`
/// is in play, so the field itself is rebuilt from `scores` on deserialize).
type OrderedScore = Score;

impl ZSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Inserts or updates `member`'s score. Returns the previous score, if
    /// any.
    pub fn insert(&mut self, member: Vec<u8>, score: f64) -> Option<f64> {
        let previous = self.scores.insert(member.clone(), score);
        if let Some(old) = previous {
            self.ordered.remove(&(Score(old), member.clone()));
        }
        self.ordered.insert((Score(score), member));
        previous
    }

    pub fn remove(&mut self, member: &[u8]) -> Option<f64> {
        let removed = self.scores.remove(member);
        if let Some(score) = removed {
            self.ordered.remove(&(Score(score), member.to_vec()));
        }
        removed
    }

    /// Iterates members in `(score asc, member asc)` order.
    pub fn iter_ordered(&self) -> impl DoubleEndedIterator<Item = (&[u8], f64)> {
        self.ordered.iter().map(|(score, member)| (member.as_slice(), score.0))
    }

    /// Rebuilds the ordered index from `scores`. Used after
    /// deserialization, since `ordered` is not itself serialized.
    pub fn rebuild_index(&mut self) {
        self.ordered = self
            .scores
            .iter()
            .map(|(member, score)| (Score(*score), member.clone()))
            .collect();
    }
}

/// A single time-series sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TsPoint {
    pub timestamp_ms: i64,
    pub value: f64,
}

/// A time series: a timestamp-ordered sequence of samples plus an optional
/// retention window in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeSeries {
    pub points: VecDeque<TsPoint>,
    pub retention_ms: Option<i64>,
}

impl TimeSeries {
    pub fn new(retention_ms: Option<i64>) -> Self {
        Self { points: VecDeque::new(), retention_ms }
    }

    /// Inserts a sample, maintaining non-decreasing timestamp order via
    /// binary-search insertion for out-of-order arrivals, then applies
    /// retention.
    pub fn insert(&mut self, timestamp_ms: i64, value: f64) {
        let pos = self.points.partition_point(|p| p.timestamp_ms <= timestamp_ms);
        self.points.insert(pos, TsPoint { timestamp_ms, value });
        self.apply_retention();
    }

    fn apply_retention(&mut self) {
        if let Some(retention) = self.retention_ms {
            if let Some(last) = self.points.back() {
                let cutoff = last.timestamp_ms - retention;
                while matches!(self.points.front(), Some(p) if p.timestamp_ms < cutoff) {
                    self.points.pop_front();
                }
            }
        }
    }
}

/// Tagged union over the six storable value types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    String(Vec<u8>),
    Hash(HashMap<Vec<u8>, Vec<u8>>),
    List(VecDeque<Vec<u8>>),
    Set(HashSet<Vec<u8>>),
    SortedSet(ZSet),
    TimeSeries(TimeSeries),
}

impl Value {
    /// Short, stable name used in `WrongType` errors and the `TYPE`
    /// command.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Hash(_) => "hash",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::SortedSet(_) => "zset",
            Value::TimeSeries(_) => "timeseries",
        }
    }

    pub fn type_tag(&self) -> u8 {
        match self {
            Value::String(_) => 0,
            Value::Hash(_) => 1,
            Value::List(_) => 2,
            Value::Set(_) => 3,
            Value::SortedSet(_) => 4,
            Value::TimeSeries(_) => 5,
        }
    }

    pub fn as_string(&self) -> Option<&Vec<u8>> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&HashMap<Vec<u8>, Vec<u8>>> {
        match self {
            Value::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&VecDeque<Vec<u8>>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&HashSet<Vec<u8>>> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_zset(&self) -> Option<&ZSet> {
        match self {
            Value::SortedSet(z) => Some(z),
            _ => None,
        }
    }

    pub fn as_timeseries(&self) -> Option<&TimeSeries> {
        match self {
            Value::TimeSeries(t) => Some(t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zset_orders_by_score_then_member() {
        let mut z = ZSet::new();
        z.insert(b"c".to_vec(), 1.0);
        z.insert(b"a".to_vec(), 1.0);
        z.insert(b"b".to_vec(), 1.0);
        let order: Vec<_> = z.iter_ordered().map(|(m, _)| m.to_vec()).collect();
        assert_eq!(order, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn zset_reinsert_moves_ordered_position() {
        let mut z = ZSet::new();
        z.insert(b"a".to_vec(), 5.0);
        z.insert(b"b".to_vec(), 1.0);
        z.insert(b"a".to_vec(), 0.0);
        let order: Vec<_> = z.iter_ordered().map(|(m, s)| (m.to_vec(), s)).collect();
        assert_eq!(order, vec![(b"a".to_vec(), 0.0), (b"b".to_vec(), 1.0)]);
    }

    #[test]
    fn timeseries_inserts_out_of_order_sample_in_sorted_position() {
        let mut ts = TimeSeries::new(None);
        ts.insert(100, 1.0);
        ts.insert(300, 3.0);
        ts.insert(200, 2.0);
        let stamps: Vec<_> = ts.points.iter().map(|p| p.timestamp_ms).collect();
        assert_eq!(stamps, vec![100, 200, 300]);
    }

    #[test]
    fn timeseries_applies_retention_on_insert() {
        let mut ts = TimeSeries::new(Some(100));
        ts.insert(0, 1.0);
        ts.insert(50, 2.0);
        ts.insert(200, 3.0);
        let stamps: Vec<_> = ts.points.iter().map(|p| p.timestamp_ms).collect();
        assert_eq!(stamps, vec![200]);
    }
}
