// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Time-series ops: ts-add, ts-get (latest sample), ts-range, ts-info,
//! ts-del.

use crate::error::{EngineError, EngineResult};
use crate::keyspace::entry::Entry;
use crate::keyspace::value::{TimeSeries, TsPoint, Value};
use crate::keyspace::Keyspace;

/// Summary statistics for `TS.INFO`.
#[derive(Debug, Clone, PartialEq)]
pub struct TsInfo {
    pub sample_count: usize,
    pub first_timestamp_ms: Option<i64>,
    pub last_timestamp_ms: Option<i64>,
    pub retention_ms: Option<i64>,
    pub memory_estimate_bytes: usize,
}

impl Keyspace {
    fn with_timeseries_mut<T>(
        &self,
        key: &[u8],
        retention_ms: Option<i64>,
        f: impl FnOnce(&mut TimeSeries) -> T,
    ) -> EngineResult<T> {
        let mut shard = self.write(key);
        let entry =
            shard.entry(key.to_vec()).or_insert_with(|| Entry::new(Value::TimeSeries(TimeSeries::new(retention_ms))));
        match &mut entry.value {
            Value::TimeSeries(ts) => Ok(f(ts)),
            other => Err(EngineError::wrong_type(key, "timeseries", other.type_name())),
        }
    }

    /// Adds a sample. `timestamp_ms == 0` means "now" and the caller is
    /// expected to have already resolved that to `now_ms` before calling.
    pub fn ts_add(&self, key: &[u8], timestamp_ms: i64, value: f64, retention_ms: Option<i64>) -> EngineResult<()> {
        self.with_timeseries_mut(key, retention_ms, |ts| ts.insert(timestamp_ms, value))
    }

    pub fn ts_get(&self, key: &[u8]) -> EngineResult<Option<TsPoint>> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::TimeSeries(ts) => Ok(ts.points.back().copied()),
                other => Err(EngineError::wrong_type(key, "timeseries", other.type_name())),
            },
            None => Ok(None),
        }
    }

    /// Inclusive `[from_ms, to_ms]` range of samples, in timestamp order.
    pub fn ts_range(&self, key: &[u8], from_ms: i64, to_ms: i64) -> EngineResult<Vec<TsPoint>> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::TimeSeries(ts) => {
                    Ok(ts.points.iter().filter(|p| p.timestamp_ms >= from_ms && p.timestamp_ms <= to_ms).copied().collect())
                }
                other => Err(EngineError::wrong_type(key, "timeseries", other.type_name())),
            },
            None => Ok(Vec::new()),
        }
    }

    pub fn ts_info(&self, key: &[u8]) -> EngineResult<TsInfo> {
        let shard = self.read(key);
        match shard.get(key) {
            Some(entry) => match &entry.value {
                Value::TimeSeries(ts) => Ok(TsInfo {
                    sample_count: ts.points.len(),
                    first_timestamp_ms: ts.points.front().map(|p| p.timestamp_ms),
                    last_timestamp_ms: ts.points.back().map(|p| p.timestamp_ms),
                    retention_ms: ts.retention_ms,
                    memory_estimate_bytes: ts.points.len() * std::mem::size_of::<TsPoint>(),
                }),
                other => Err(EngineError::wrong_type(key, "timeseries", other.type_name())),
            },
            None => Err(EngineError::not_found(key)),
        }
    }

    pub fn ts_del(&self, key: &[u8]) -> bool {
        self.write(key).remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ts_add_then_ts_get_returns_latest_by_timestamp_not_insertion_order() {
        let ks = Keyspace::new(4);
        ks.ts_add(b"t", 100, 1.0, None).unwrap();
        ks.ts_add(b"t", 300, 3.0, None).unwrap();
        ks.ts_add(b"t", 200, 2.0, None).unwrap();
        assert_eq!(ks.ts_get(b"t").unwrap(), Some(TsPoint { timestamp_ms: 300, value: 3.0 }));
    }

    #[test]
    fn ts_range_is_inclusive_both_ends() {
        let ks = Keyspace::new(4);
        for (t, v) in [(0, 0.0), (100, 1.0), (200, 2.0), (300, 3.0)] {
            ks.ts_add(b"t", t, v, None).unwrap();
        }
        let range = ks.ts_range(b"t", 100, 200).unwrap();
        assert_eq!(range, vec![TsPoint { timestamp_ms: 100, value: 1.0 }, TsPoint { timestamp_ms: 200, value: 2.0 }]);
    }

    #[test]
    fn ts_info_reports_bounds_and_retention() {
        let ks = Keyspace::new(4);
        ks.ts_add(b"t", 0, 1.0, Some(1000)).unwrap();
        ks.ts_add(b"t", 500, 2.0, Some(1000)).unwrap();
        let info = ks.ts_info(b"t").unwrap();
        assert_eq!(info.sample_count, 2);
        assert_eq!(info.first_timestamp_ms, Some(0));
        assert_eq!(info.last_timestamp_ms, Some(500));
        assert_eq!(info.retention_ms, Some(1000));
    }

    #[test]
    fn ts_info_on_missing_key_is_not_found() {
        let ks = Keyspace::new(4);
        assert!(matches!(ks.ts_info(b"missing"), Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn ts_del_removes_the_series() {
        let ks = Keyspace::new(4);
        ks.ts_add(b"t", 0, 1.0, None).unwrap();
        assert!(ks.ts_del(b"t"));
        assert!(!ks.ts_del(b"t"));
    }
}
