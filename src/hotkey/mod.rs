// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Top-N access-frequency tracking with optional periodic decay.
//!
//! `HotKeyTracker` holds a `key -> count` map behind a single mutex.
//! `record` is called on every read/write path and must stay cheap; `top`
//! is a query-time heap-select, not maintained incrementally.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::sync::Mutex;

/// Thread-safe access-frequency counter with a query-time top-N view.
pub struct HotKeyTracker {
    counts: Mutex<HashMap<Vec<u8>, u64>>,
}

impl HotKeyTracker {
    pub fn new() -> Self {
        Self { counts: Mutex::new(HashMap::new()) }
    }

    /// Increments `key`'s counter.
    pub fn record(&self, key: &[u8]) {
        let mut counts = self.counts.lock().expect("hotkey mutex poisoned");
        *counts.entry(key.to_vec()).or_insert(0) += 1;
    }

    /// The `n` keys with the highest counts, descending by count then
    /// ascending by key bytes for a stable tiebreak.
    pub fn top(&self, n: usize) -> Vec<(Vec<u8>, u64)> {
        let counts = self.counts.lock().expect("hotkey mutex poisoned");
        // Min-heap on (count, Reverse(key)) so the smallest of the current
        // top-n is always at the top and easy to evict; bounds heap size to
        // n instead of sorting the full key set.
        let mut heap: BinaryHeap<Reverse<(u64, Vec<u8>)>> = BinaryHeap::with_capacity(n + 1);
        for (key, &count) in counts.iter() {
            heap.push(Reverse((count, key.clone())));
            if heap.len() > n {
                heap.pop();
            }
        }
        let mut top: Vec<(Vec<u8>, u64)> = heap.into_iter().map(|Reverse((c, k))| (k, c)).collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top
    }

    /// Halves every counter, dropping any that reach zero. Called by the
    /// decay background task.
    pub fn decay(&self) {
        let mut counts = self.counts.lock().expect("hotkey mutex poisoned");
        counts.retain(|_, count| {
            *count /= 2;
            *count > 0
        });
    }

    pub fn len(&self) -> usize {
        self.counts.lock().expect("hotkey mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HotKeyTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_orders_by_count_descending() {
        let tracker = HotKeyTracker::new();
        for _ in 0..5 {
            tracker.record(b"hot");
        }
        for _ in 0..2 {
            tracker.record(b"warm");
        }
        tracker.record(b"cold");

        let top = tracker.top(2);
        assert_eq!(top, vec![(b"hot".to_vec(), 5), (b"warm".to_vec(), 2)]);
    }

    #[test]
    fn top_n_larger_than_population_returns_everything() {
        let tracker = HotKeyTracker::new();
        tracker.record(b"a");
        tracker.record(b"b");
        assert_eq!(tracker.top(10).len(), 2);
    }

    #[test]
    fn decay_halves_and_evicts_zeroed_counters() {
        let tracker = HotKeyTracker::new();
        tracker.record(b"a");
        tracker.record(b"a");
        tracker.record(b"a");
        tracker.record(b"b");

        tracker.decay();
        assert_eq!(tracker.top(10), vec![(b"a".to_vec(), 1)]);
    }

    #[test]
    fn ties_break_on_key_bytes_ascending() {
        let tracker = HotKeyTracker::new();
        tracker.record(b"b");
        tracker.record(b"a");
        assert_eq!(tracker.top(2), vec![(b"a".to_vec(), 1), (b"b".to_vec(), 1)]);
    }
}
