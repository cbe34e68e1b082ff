// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! The append-only log file itself: open/append/append_batch/read_all.

use crate::error::{EngineError, EngineResult};
use crate::wal::record::{WalRecord, HEADER_LEN};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable, single-writer append log.
///
/// Every caller serializes through an internal mutex, so concurrent
/// `append`/`append_batch` calls are totally ordered. An advisory
/// cross-process exclusive lock on the file additionally guards against two
/// engine processes opening the same WAL path at once.
pub struct Wal {
    path: PathBuf,
    file: Mutex<File>,
    sync_writes: bool,
}

impl Wal {
    /// Opens or creates the WAL file, ensuring its parent directory exists.
    pub fn open(path: impl AsRef<Path>, sync_writes: bool) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| EngineError::IoError {
                    operation: "create_wal_dir".to_string(),
                    reason: e.to_string(),
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| EngineError::IoError {
                operation: "open_wal".to_string(),
                reason: e.to_string(),
            })?;

        file.try_lock_exclusive().map_err(|_| EngineError::LockTimeout {
            path: path.display().to_string(),
            timeout_secs: 0,
        })?;

        Ok(Self { path, file: Mutex::new(file), sync_writes })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the WAL file in bytes.
    pub fn len(&self) -> EngineResult<u64> {
        let file = self.file.lock().expect("wal mutex poisoned");
        Ok(file.metadata().map_err(|e| EngineError::IoError {
            operation: "stat_wal".to_string(),
            reason: e.to_string(),
        })?.len())
    }

    pub fn is_empty(&self) -> EngineResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Appends a single record, fsyncing before returning (unless
    /// `sync_writes` is disabled, in which case the caller must call
    /// [`Wal::sync`] to establish a durability boundary).
    pub fn append(&self, record: &WalRecord) -> EngineResult<()> {
        self.append_batch(std::slice::from_ref(record))
    }

    /// Appends every record in `records` as a single write plus (at most)
    /// one fsync: either all of them become durable or, on a crash before
    /// the fsync completes, none of them are replayed.
    pub fn append_batch(&self, records: &[WalRecord]) -> EngineResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for record in records {
            buf.extend_from_slice(&record.encode());
        }

        let mut file = self.file.lock().expect("wal mutex poisoned");
        file.write_all(&buf).map_err(|e| EngineError::IoError {
            operation: "append_wal".to_string(),
            reason: e.to_string(),
        })?;

        if self.sync_writes {
            file.sync_all().map_err(|e| EngineError::IoError {
                operation: "fsync_wal".to_string(),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }

    /// Fsyncs the file. Only needed when `sync_writes` is `false`; a no-op
    /// is not an error when it is `true` (already durable per-append).
    pub fn sync(&self) -> EngineResult<()> {
        let file = self.file.lock().expect("wal mutex poisoned");
        file.sync_all().map_err(|e| EngineError::IoError {
            operation: "fsync_wal".to_string(),
            reason: e.to_string(),
        })
    }

    /// Truncates the WAL to empty. Used by `flushdb` and
    /// `snapshot_restore`.
    pub fn truncate(&self) -> EngineResult<()> {
        let mut file = self.file.lock().expect("wal mutex poisoned");
        file.set_len(0).map_err(|e| EngineError::IoError {
            operation: "truncate_wal".to_string(),
            reason: e.to_string(),
        })?;
        file.seek(SeekFrom::Start(0)).map_err(|e| EngineError::IoError {
            operation: "seek_wal".to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Reads every well-formed record from offset 0. On the first parse
    /// error (short header, short body, CRC mismatch, or an implausible
    /// length) the file is truncated to the last valid offset and the
    /// recovered prefix is returned — corruption during recovery is never
    /// fatal, it just discards the tail.
    pub fn read_all(&self) -> EngineResult<Vec<WalRecord>> {
        let mut file = self.file.lock().expect("wal mutex poisoned");
        file.seek(SeekFrom::Start(0)).map_err(|e| EngineError::IoError {
            operation: "seek_wal".to_string(),
            reason: e.to_string(),
        })?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents).map_err(|e| EngineError::IoError {
            operation: "read_wal".to_string(),
            reason: e.to_string(),
        })?;

        let mut records = Vec::new();
        let mut offset = 0usize;

        loop {
            match WalRecord::decode(&contents[offset..]) {
                Ok(Some((record, consumed))) => {
                    records.push(record);
                    offset += consumed;
                }
                Ok(None) => break,
                Err(_) => {
                    eprintln!(
                        "warning: WAL '{}' corrupted at offset {offset}, truncating {} trailing bytes",
                        self.path.display(),
                        contents.len() - offset
                    );
                    file.set_len(offset as u64).map_err(|e| EngineError::IoError {
                        operation: "truncate_corrupt_wal".to_string(),
                        reason: e.to_string(),
                    })?;
                    file.seek(SeekFrom::Start(offset as u64)).map_err(|e| EngineError::IoError {
                        operation: "seek_wal".to_string(),
                        reason: e.to_string(),
                    })?;
                    break;
                }
            }
        }

        file.seek(SeekFrom::End(0)).map_err(|e| EngineError::IoError {
            operation: "seek_wal".to_string(),
            reason: e.to_string(),
        })?;

        Ok(records)
    }

    /// Like [`Wal::read_all`], but discards any record whose start offset
    /// is below `skip_len`. Used by recovery to replay only the WAL tail
    /// written after a snapshot was taken — the file is still read (and, if
    /// corrupt, truncated) from byte 0, since record boundaries can only be
    /// found by parsing sequentially from the start.
    pub fn read_all_after(&self, skip_len: u64) -> EngineResult<Vec<WalRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .scan(0u64, |offset, record| {
                let start = *offset;
                *offset += (HEADER_LEN + record.key.len() + record.value.len()) as u64;
                Some((start, record))
            })
            .filter(|(start, _)| *start >= skip_len)
            .map(|(_, record)| record)
            .collect())
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Ok(file) = self.file.lock() {
            let _ = fs2::FileExt::unlock(&*file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::record::OpCode;

    fn scratch_path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wal");
        (dir, path)
    }

    #[test]
    fn append_then_read_all_round_trips() {
        let (_dir, path) = scratch_path();
        let wal = Wal::open(&path, true).unwrap();
        let r1 = WalRecord::new(OpCode::Set, b"a".to_vec(), b"1".to_vec(), 0);
        let r2 = WalRecord::new(OpCode::Set, b"b".to_vec(), b"2".to_vec(), 0);
        wal.append(&r1).unwrap();
        wal.append(&r2).unwrap();

        let records = wal.read_all().unwrap();
        assert_eq!(records, vec![r1, r2]);
    }

    #[test]
    fn append_batch_is_a_single_write() {
        let (_dir, path) = scratch_path();
        let wal = Wal::open(&path, true).unwrap();
        let records = vec![
            WalRecord::new(OpCode::Set, b"a".to_vec(), b"1".to_vec(), 0),
            WalRecord::new(OpCode::Set, b"b".to_vec(), b"2".to_vec(), 0),
            WalRecord::new(OpCode::Delete, b"c".to_vec(), Vec::new(), 0),
        ];
        wal.append_batch(&records).unwrap();
        assert_eq!(wal.read_all().unwrap(), records);
    }

    #[test]
    fn recovers_from_a_truncated_trailing_record() {
        let (_dir, path) = scratch_path();
        {
            let wal = Wal::open(&path, true).unwrap();
            let r1 = WalRecord::new(OpCode::Set, b"a".to_vec(), b"1".to_vec(), 0);
            wal.append(&r1).unwrap();
        }

        // Simulate a crash mid-append: garbage bytes appended after a
        // valid record.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0xDE, 0xAD, 0xBE]).unwrap();
        }

        let valid_len;
        {
            let wal = Wal::open(&path, true).unwrap();
            let records = wal.read_all().unwrap();
            assert_eq!(records.len(), 1);
            valid_len = wal.len().unwrap();
        }

        let on_disk_len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(on_disk_len, valid_len);
    }

    #[test]
    fn truncate_empties_the_file() {
        let (_dir, path) = scratch_path();
        let wal = Wal::open(&path, true).unwrap();
        wal.append(&WalRecord::new(OpCode::Set, b"a".to_vec(), b"1".to_vec(), 0)).unwrap();
        assert!(wal.len().unwrap() > 0);
        wal.truncate().unwrap();
        assert_eq!(wal.len().unwrap(), 0);
        assert!(wal.read_all().unwrap().is_empty());
    }

    #[test]
    fn read_all_after_skips_records_before_the_given_offset() {
        let (_dir, path) = scratch_path();
        let wal = Wal::open(&path, true).unwrap();
        let r1 = WalRecord::new(OpCode::Set, b"a".to_vec(), b"1".to_vec(), 0);
        let r2 = WalRecord::new(OpCode::Set, b"b".to_vec(), b"2".to_vec(), 0);
        wal.append(&r1).unwrap();
        let skip_len = wal.len().unwrap();
        wal.append(&r2).unwrap();

        let tail = wal.read_all_after(skip_len).unwrap();
        assert_eq!(tail, vec![r2]);
    }

    #[test]
    fn pipeline_mode_defers_fsync_until_sync_is_called() {
        let (_dir, path) = scratch_path();
        let wal = Wal::open(&path, false).unwrap();
        wal.append(&WalRecord::new(OpCode::Set, b"a".to_vec(), b"1".to_vec(), 0)).unwrap();
        wal.sync().unwrap();
        assert_eq!(wal.read_all().unwrap().len(), 1);
    }
}
