// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! The change-data-capture stream: a bounded ring buffer of [`CdcEvent`]s
//! plus a set of live subscribers.
//!
//! `record` is the only mutator. It never blocks on a slow subscriber: a
//! full subscriber channel drops the event for that subscriber only (and
//! bumps its lag counter), while the event is always appended to the ring
//! itself.

mod event;

pub use event::{CdcEvent, CdcOp};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Mutex;

/// Opaque handle returned by [`CdcStream::subscribe`].
pub type SubscriptionId = u64;

struct Subscriber {
    id: SubscriptionId,
    sender: SyncSender<CdcEvent>,
    dropped: u64,
}

struct Inner {
    buffer: VecDeque<CdcEvent>,
    capacity: usize,
    total_events: u64,
    subscribers: Vec<Subscriber>,
}

/// Point-in-time counters for the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdcStats {
    pub total_events: u64,
    pub buffered: usize,
    pub capacity: usize,
    pub subscribers: usize,
    pub lagging_subscribers: usize,
}

/// A bounded, append-only event stream with live fan-out.
pub struct CdcStream {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    next_subscription_id: AtomicU64,
}

impl CdcStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: VecDeque::with_capacity(capacity),
                capacity,
                total_events: 0,
                subscribers: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
            next_subscription_id: AtomicU64::new(1),
        }
    }

    /// Appends an event (assigning it the next monotonic id) and
    /// non-blockingly fans it out to every subscriber. Returns the assigned
    /// id.
    ///
    /// The id is assigned under the same lock acquisition as the buffer
    /// push: two threads calling `record` concurrently could otherwise
    /// grab ids in one order and push events in the other, handing
    /// subscribers an out-of-order stream.
    pub fn record(&self, ts_ms: i64, op: CdcOp, key: Vec<u8>, value: Option<Vec<u8>>, field: Option<Vec<u8>>) -> u64 {
        let mut inner = self.inner.lock().expect("cdc mutex poisoned");
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut event = CdcEvent::new(id, ts_ms, op, key);
        event.value = value;
        event.field = field;

        if inner.buffer.len() >= inner.capacity {
            inner.buffer.pop_front();
        }
        inner.buffer.push_back(event.clone());
        inner.total_events += 1;

        for subscriber in &mut inner.subscribers {
            if let Err(TrySendError::Full(_)) = subscriber.sender.try_send(event.clone()) {
                subscriber.dropped += 1;
            }
        }

        id
    }

    /// The `n` most-recent events, oldest first.
    pub fn latest(&self, n: usize) -> Vec<CdcEvent> {
        let inner = self.inner.lock().expect("cdc mutex poisoned");
        let skip = inner.buffer.len().saturating_sub(n);
        inner.buffer.iter().skip(skip).cloned().collect()
    }

    /// All buffered events with `id > since_id`, in order.
    pub fn since(&self, since_id: u64) -> Vec<CdcEvent> {
        let inner = self.inner.lock().expect("cdc mutex poisoned");
        inner.buffer.iter().filter(|e| e.id > since_id).cloned().collect()
    }

    /// Registers a new subscriber with a channel of `buf_size` capacity.
    pub fn subscribe(&self, buf_size: usize) -> (SubscriptionId, Receiver<CdcEvent>) {
        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = sync_channel(buf_size.max(1));
        let mut inner = self.inner.lock().expect("cdc mutex poisoned");
        inner.subscribers.push(Subscriber { id, sender, dropped: 0 });
        (id, receiver)
    }

    /// Removes a subscription; its channel is dropped and closes on the
    /// receiving end.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().expect("cdc mutex poisoned");
        inner.subscribers.retain(|s| s.id != id);
    }

    pub fn stats(&self) -> CdcStats {
        let inner = self.inner.lock().expect("cdc mutex poisoned");
        CdcStats {
            total_events: inner.total_events,
            buffered: inner.buffer.len(),
            capacity: inner.capacity,
            subscribers: inner.subscribers.len(),
            lagging_subscribers: inner.subscribers.iter().filter(|s| s.dropped > 0).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_assigns_strictly_monotonic_ids() {
        let stream = CdcStream::new(10);
        let a = stream.record(0, CdcOp::Set, b"a".to_vec(), None, None);
        let b = stream.record(0, CdcOp::Set, b"b".to_vec(), None, None);
        assert_eq!(b, a + 1);
    }

    #[test]
    fn ring_buffer_evicts_oldest_past_capacity() {
        let stream = CdcStream::new(2);
        stream.record(0, CdcOp::Set, b"a".to_vec(), None, None);
        stream.record(0, CdcOp::Set, b"b".to_vec(), None, None);
        stream.record(0, CdcOp::Set, b"c".to_vec(), None, None);
        let latest = stream.latest(10);
        assert_eq!(latest.iter().map(|e| e.key.clone()).collect::<Vec<_>>(), vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn since_returns_events_strictly_after_the_given_id() {
        let stream = CdcStream::new(10);
        let a = stream.record(0, CdcOp::Set, b"a".to_vec(), None, None);
        stream.record(0, CdcOp::Set, b"b".to_vec(), None, None);
        let after = stream.since(a);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].key, b"b".to_vec());
    }

    #[test]
    fn subscriber_receives_events_and_a_full_channel_only_drops_for_itself() {
        let stream = CdcStream::new(10);
        let (id, rx) = stream.subscribe(1);
        stream.record(0, CdcOp::Set, b"a".to_vec(), None, None);
        stream.record(0, CdcOp::Set, b"b".to_vec(), None, None);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "second event should have been dropped for a lagging subscriber");

        let stats = stream.stats();
        assert_eq!(stats.lagging_subscribers, 1);
        assert_eq!(stats.total_events, 2);

        stream.unsubscribe(id);
        assert_eq!(stream.stats().subscribers, 0);
    }
}
