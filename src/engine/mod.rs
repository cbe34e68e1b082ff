// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! The coordinator: the only component with write access to the WAL and
//! the single authoritative handle to the [`Keyspace`].
//!
//! Mandatory write-path ordering for every mutating operation: ① encode
//! the WAL record(s) ② lock the shard(s) involved ③ `append_batch` (fsync
//! inside) ④ mutate memory ⑤ emit a CDC event ⑥ unlock. A crash after ③
//! but before ⑤ is safe — recovery replays the WAL and reaches the same
//! state; a crash before ③ loses nothing because memory was never touched.

mod ops;

use crate::cdc::CdcStream;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::hotkey::HotKeyTracker;
use crate::keyspace::Keyspace;
use crate::snapshot::{SnapshotManager, SnapshotMeta};
use crate::wal::Wal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub use ops::TransactionOp;

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct BackgroundTask {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// The storage engine: WAL + Keyspace + CDC stream + hot-key tracker +
/// snapshot manager, wired together with the typed operations of the
/// keyspace plus engine-level lifecycle management.
pub struct Engine {
    wal: Wal,
    keyspace: Arc<Keyspace>,
    cdc: CdcStream,
    hotkey: Arc<HotKeyTracker>,
    snapshots: SnapshotManager,
    config: EngineConfig,
    active_expiry: BackgroundTask,
    hotkey_decay: BackgroundTask,
}

impl Engine {
    /// Opens (or creates) the WAL and snapshot directory, recovers state,
    /// and starts the background maintenance tasks. The sole constructor —
    /// there is no builder.
    pub fn open(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;

        let snapshots = SnapshotManager::open(&config.snapshot_dir)?;
        let keyspace = Arc::new(Keyspace::new(config.shard_count));
        let wal = Wal::open(&config.wal_path, config.sync_writes)?;

        let mut skip_len = 0u64;
        if let Some(newest) = snapshots.list()?.into_iter().next() {
            let image = snapshots.load(&newest.id)?;
            for (key, entry) in image.entries {
                keyspace.put_entry(key, entry);
            }
            skip_len = image.snapshot_wal_len;
        }

        let tail = if skip_len > 0 { wal.read_all_after(skip_len)? } else { wal.read_all()? };
        for record in tail {
            ops::replay(&keyspace, record);
        }

        let cdc = CdcStream::new(config.cdc_capacity);
        let hotkey = Arc::new(HotKeyTracker::new());

        let mut engine = Self {
            wal,
            keyspace,
            cdc,
            hotkey,
            snapshots,
            config,
            active_expiry: BackgroundTask { stop: Arc::new(AtomicBool::new(false)), handle: None },
            hotkey_decay: BackgroundTask { stop: Arc::new(AtomicBool::new(false)), handle: None },
        };
        engine.spawn_active_expiry();
        engine.spawn_hotkey_decay();
        Ok(engine)
    }

    fn spawn_active_expiry(&mut self) {
        let period = self.config.active_expiry_period();
        let sample = self.config.active_expiry_sample;
        let shard_count = self.keyspace.shard_count();
        let stop = self.active_expiry.stop.clone();
        let keyspace = self.keyspace.clone();

        let handle = std::thread::spawn(move || {
            let mut shard_cursor = 0usize;
            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(period);
                if shard_count == 0 {
                    continue;
                }
                let shard = shard_cursor % shard_count;
                shard_cursor = shard_cursor.wrapping_add(1);
                loop {
                    let now = now_ms();
                    let sampled = keyspace.sample_shard_keys(shard, sample);
                    if sampled.is_empty() {
                        break;
                    }
                    let expired = sampled.iter().filter(|k| keyspace.check_and_expire(k, now)).count();
                    let fraction = expired as f64 / sampled.len() as f64;
                    if fraction <= 0.25 {
                        break;
                    }
                }
            }
        });
        self.active_expiry.handle = Some(handle);
    }

    fn spawn_hotkey_decay(&mut self) {
        let Some(period) = self.config.hotkey_decay() else { return };
        let stop = self.hotkey_decay.stop.clone();
        let hotkey = self.hotkey.clone();
        let handle = std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(period);
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                hotkey.decay();
            }
        });
        self.hotkey_decay.handle = Some(handle);
    }

    /// Stops background tasks cooperatively, waits for them to drain, and
    /// syncs the WAL. Idempotent via `Option::take` inside
    /// `stop_and_join`.
    pub fn close(mut self) -> EngineResult<()> {
        self.shutdown_background_tasks();
        self.wal.sync()
    }

    fn shutdown_background_tasks(&mut self) {
        self.active_expiry.stop_and_join();
        self.hotkey_decay.stop_and_join();
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cdc(&self) -> &CdcStream {
        &self.cdc
    }

    pub fn hotkey(&self) -> &HotKeyTracker {
        &self.hotkey
    }

    /// Wipes the keyspace and truncates the WAL as a single critical
    /// section — every shard's write lock is held across the truncate, so
    /// no reader observes a partially flushed state and a failed truncate
    /// leaves the keyspace untouched.
    pub fn flushdb(&self) -> EngineResult<()> {
        self.keyspace.replace_all(Vec::new(), || self.wal.truncate())
    }

    pub fn dbsize(&self) -> usize {
        self.keyspace.dbsize(now_ms())
    }

    pub fn keys(&self, pattern: &[u8]) -> Vec<Vec<u8>> {
        self.keyspace.keys(pattern, now_ms())
    }

    pub fn scan(
        &self,
        cursor: u64,
        match_pattern: Option<&[u8]>,
        count: usize,
        type_filter: Option<&str>,
    ) -> crate::keyspace::ScanPage {
        self.keyspace.scan(cursor, match_pattern, count, type_filter, now_ms())
    }

    pub fn randomkey(&self) -> Option<Vec<u8>> {
        self.keyspace.randomkey(now_ms())
    }

    /// Writes a full keyspace image to `<id>.snap` (`id` defaults to the
    /// current Unix-ms timestamp), recording the WAL's current length so
    /// recovery knows which WAL bytes the snapshot already reflects.
    pub fn snapshot_create(&self, id: Option<&str>, compress: bool) -> EngineResult<SnapshotMeta> {
        let now = now_ms();
        let owned_id = id.map(|s| s.to_string()).unwrap_or_else(|| now.to_string());
        let wal_len = self.wal.len()?;
        self.snapshots.create(&owned_id, &self.keyspace, wal_len, compress, now)
    }

    pub fn snapshot_list(&self) -> EngineResult<Vec<SnapshotMeta>> {
        self.snapshots.list()
    }

    pub fn snapshot_delete(&self, id: &str) -> EngineResult<()> {
        self.snapshots.delete(id)
    }

    /// Restores from `<id>.snap`: loads into a scratch buffer first, and
    /// only wipes the WAL and live keyspace once the load has fully
    /// succeeded, so a corrupt snapshot leaves the running engine
    /// untouched. The WAL truncate and the keyspace swap happen under one
    /// combined shard lock via `replace_all`, so no reader observes a
    /// keyspace that's been cleared but not yet repopulated.
    pub fn snapshot_restore(&self, id: &str) -> EngineResult<()> {
        let image = self.snapshots.load(id)?;
        self.keyspace.replace_all(image.entries, || self.wal.truncate())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown_background_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_engine(dir: &std::path::Path) -> Engine {
        let config = EngineConfig::new(dir.join("wal.log"), dir.join("snapshots"));
        Engine::open(config).unwrap()
    }

    #[test]
    fn open_on_empty_directory_starts_with_an_empty_keyspace() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path());
        assert_eq!(engine.dbsize(), 0);
    }

    #[test]
    fn set_then_reopen_recovers_from_the_wal() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = open_engine(dir.path());
            engine.set(b"a", b"1".to_vec()).unwrap();
            engine.set(b"b", b"2".to_vec()).unwrap();
        }
        let engine = open_engine(dir.path());
        assert_eq!(engine.get(b"a").unwrap(), b"1");
        assert_eq!(engine.get(b"b").unwrap(), b"2");
    }

    #[test]
    fn flushdb_empties_keyspace_and_wal() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path());
        engine.set(b"a", b"1".to_vec()).unwrap();
        engine.flushdb().unwrap();
        assert_eq!(engine.dbsize(), 0);

        drop(engine);
        let reopened = open_engine(dir.path());
        assert_eq!(reopened.dbsize(), 0);
    }

    #[test]
    fn snapshot_create_then_restore_round_trips_after_further_writes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path());
        engine.set(b"a", b"1".to_vec()).unwrap();
        let meta = engine.snapshot_create(Some("snap1"), true).unwrap();
        assert_eq!(meta.id, "snap1");

        engine.set(b"b", b"2".to_vec()).unwrap();
        assert_eq!(engine.dbsize(), 2);

        engine.snapshot_restore("snap1").unwrap();
        assert_eq!(engine.dbsize(), 1);
        assert_eq!(engine.get(b"a").unwrap(), b"1");
        assert!(engine.get(b"b").is_err());
    }

    #[test]
    fn msetnx_is_atomic_across_keys() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(dir.path());
        engine.set(b"a", b"existing".to_vec()).unwrap();

        let applied = engine
            .msetnx(&[(b"a".to_vec(), b"x".to_vec()), (b"b".to_vec(), b"y".to_vec())])
            .unwrap();
        assert!(!applied);
        assert!(engine.get(b"b").is_err());
    }
}
