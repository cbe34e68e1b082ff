// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! `SnapshotManager`: create/list/load/delete full keyspace images under a
//! directory of `.snap` files.

use crate::error::{EngineError, EngineResult};
use crate::keyspace::entry::Entry;
use crate::keyspace::value::{TimeSeries, Value, ZSet};
use crate::keyspace::Keyspace;
use crate::snapshot::format::{self, DecodedSection, Header};
use crc32fast::Hasher;
use memmap2::Mmap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Sentinel for "no TTL" in the on-disk `expire_at_ms` field — valid
/// expirations are always non-negative Unix milliseconds.
const NO_EXPIRY: i64 = i64::MIN;

/// Files at or above this size are loaded via `memmap2` instead of a single
/// `fs::read` into a `Vec<u8>`.
const MMAP_THRESHOLD_BYTES: u64 = 4 * 1024 * 1024;

/// Metadata about a stored snapshot, as returned by `create`/`list`.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotMeta {
    pub id: String,
    pub created_ms: i64,
    pub size_bytes: u64,
}

/// A fully loaded snapshot image, ready to be installed into a fresh
/// `Keyspace`.
pub struct SnapshotImage {
    pub entries: Vec<(Vec<u8>, Entry)>,
    /// WAL byte length at the moment this snapshot was taken; only WAL
    /// bytes beyond this offset need replaying on top of it.
    pub snapshot_wal_len: u64,
}

pub struct SnapshotManager {
    dir: PathBuf,
}

impl SnapshotManager {
    pub fn open(dir: impl Into<PathBuf>) -> EngineResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| EngineError::IoError {
            operation: "create_snapshot_dir".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.snap"))
    }

    /// Writes every live entry in `keyspace` to `<id>.snap`. `compress`
    /// defaults to `true` at the call site ([`crate::engine::Engine`]); this
    /// manager just honors whatever the caller asks for.
    pub fn create(
        &self,
        id: &str,
        keyspace: &Keyspace,
        snapshot_wal_len: u64,
        compress: bool,
        now_ms: i64,
    ) -> EngineResult<SnapshotMeta> {
        let mut entries = Vec::new();
        keyspace.for_each_live(now_ms, |key, entry| {
            entries.push((key.to_vec(), entry.clone()));
        });

        let mut sections = Vec::new();
        for (key, entry) in &entries {
            let payload = encode_payload(&entry.value)?;
            let expire_at_ms = entry.expire_at_ms.unwrap_or(NO_EXPIRY);
            sections.extend_from_slice(&format::encode_section(entry.value.type_tag(), key, expire_at_ms, &payload));
        }

        let body = if compress {
            let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
            encoder.write_all(&sections).map_err(io_err("compress_snapshot"))?;
            encoder.finish().map_err(io_err("compress_snapshot"))?
        } else {
            sections
        };

        let header = format::encode_header(now_ms, entries.len() as u64, compress);

        let mut hasher = Hasher::new();
        hasher.update(&header);
        hasher.update(&body);
        hasher.update(&snapshot_wal_len.to_le_bytes());
        let crc = hasher.finalize();

        let mut file_bytes = Vec::with_capacity(header.len() + body.len() + format::TRAILER_LEN);
        file_bytes.extend_from_slice(&header);
        file_bytes.extend_from_slice(&body);
        file_bytes.extend_from_slice(&snapshot_wal_len.to_le_bytes());
        file_bytes.extend_from_slice(&crc.to_le_bytes());

        let path = self.path_for(id);
        std::fs::write(&path, &file_bytes).map_err(io_err("write_snapshot"))?;

        Ok(SnapshotMeta { id: id.to_string(), created_ms: now_ms, size_bytes: file_bytes.len() as u64 })
    }

    /// Snapshot ids sorted newest-first by file modification time.
    pub fn list(&self) -> EngineResult<Vec<SnapshotMeta>> {
        let mut metas = Vec::new();
        let read_dir = std::fs::read_dir(&self.dir).map_err(io_err("list_snapshots"))?;
        for entry in read_dir {
            let entry = entry.map_err(io_err("list_snapshots"))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("snap") {
                continue;
            }
            let id = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
            let metadata = entry.metadata().map_err(io_err("stat_snapshot"))?;
            let modified_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            metas.push(SnapshotMeta { id, created_ms: modified_ms, size_bytes: metadata.len() });
        }
        metas.sort_by(|a, b| b.created_ms.cmp(&a.created_ms));
        Ok(metas)
    }

    /// Loads and validates `<id>.snap`, returning every entry plus the WAL
    /// length recorded at snapshot time.
    pub fn load(&self, id: &str) -> EngineResult<SnapshotImage> {
        let path = self.path_for(id);
        let file = File::open(&path).map_err(io_err("open_snapshot"))?;
        let file_len = file.metadata().map_err(io_err("stat_snapshot"))?.len();

        let corrupt = |reason: String| EngineError::CorruptSnapshot { id: id.to_string(), reason };

        if file_len < (format::HEADER_LEN + format::TRAILER_LEN) as u64 {
            return Err(corrupt("file shorter than header+trailer".to_string()));
        }

        let source = if file_len >= MMAP_THRESHOLD_BYTES {
            ByteSource::Mapped(unsafe { Mmap::map(&file) }.map_err(io_err("mmap_snapshot"))?)
        } else {
            let mut buf = Vec::with_capacity(file_len as usize);
            let mut file = file;
            file.read_to_end(&mut buf).map_err(io_err("read_snapshot"))?;
            ByteSource::Owned(buf)
        };

        self.load_from_bytes(id, source.as_slice())
    }

    fn load_from_bytes(&self, id: &str, bytes: &[u8]) -> EngineResult<SnapshotImage> {
        let corrupt = |reason: String| EngineError::CorruptSnapshot { id: id.to_string(), reason };

        let header = format::decode_header(bytes).map_err(|_| corrupt("bad header".to_string()))?;
        let trailer_start = bytes.len() - format::TRAILER_LEN;
        let snapshot_wal_len = u64::from_le_bytes(bytes[trailer_start..trailer_start + 8].try_into().unwrap());
        let stored_crc = u32::from_le_bytes(bytes[trailer_start + 8..].try_into().unwrap());

        let mut hasher = Hasher::new();
        hasher.update(&bytes[..trailer_start + 8]);
        if hasher.finalize() != stored_crc {
            return Err(corrupt("CRC mismatch".to_string()));
        }

        let body = &bytes[format::HEADER_LEN..trailer_start];
        let decompressed;
        let sections: &[u8] = if header.is_compressed() {
            let mut decoder = xz2::read::XzDecoder::new(body);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| corrupt(format!("xz decompress failed: {e}")))?;
            decompressed = out;
            &decompressed
        } else {
            body
        };

        let mut entries = Vec::with_capacity(header.key_count as usize);
        let mut offset = 0;
        while offset < sections.len() {
            let (section, consumed) =
                format::decode_section(&sections[offset..]).map_err(|_| corrupt("bad section".to_string()))?.ok_or_else(|| corrupt("unexpected end of sections".to_string()))?;
            entries.push(decode_entry(&section).map_err(|_| corrupt("bad payload".to_string()))?);
            offset += consumed;
        }

        if entries.len() as u64 != header.key_count {
            return Err(corrupt("key_count mismatch".to_string()));
        }

        Ok(SnapshotImage { entries, snapshot_wal_len })
    }

    pub fn delete(&self, id: &str) -> EngineResult<()> {
        std::fs::remove_file(self.path_for(id)).map_err(io_err("delete_snapshot"))
    }
}

/// Either a memory-mapped file or an in-memory buffer, depending on size.
enum ByteSource {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl ByteSource {
    fn as_slice(&self) -> &[u8] {
        match self {
            ByteSource::Mapped(m) => &m[..],
            ByteSource::Owned(v) => &v[..],
        }
    }
}

fn io_err(operation: &'static str) -> impl Fn(std::io::Error) -> EngineError {
    move |e| EngineError::IoError { operation: operation.to_string(), reason: e.to_string() }
}

fn encode_payload(value: &Value) -> EngineResult<Vec<u8>> {
    let encoded = match value {
        Value::String(s) => bincode::serialize(s),
        Value::Hash(h) => bincode::serialize(h),
        Value::List(l) => bincode::serialize(l),
        Value::Set(s) => bincode::serialize(s),
        Value::SortedSet(z) => bincode::serialize(z),
        Value::TimeSeries(t) => bincode::serialize(t),
    };
    encoded.map_err(|e| EngineError::IoError { operation: "encode_snapshot_payload".to_string(), reason: e.to_string() })
}

fn decode_entry(section: &DecodedSection<'_>) -> EngineResult<(Vec<u8>, Entry)> {
    let bincode_err = |e: bincode::Error| EngineError::IoError {
        operation: "decode_snapshot_payload".to_string(),
        reason: e.to_string(),
    };
    let value = match section.type_tag {
        0 => Value::String(bincode::deserialize::<Vec<u8>>(section.payload).map_err(bincode_err)?),
        1 => Value::Hash(bincode::deserialize::<HashMap<Vec<u8>, Vec<u8>>>(section.payload).map_err(bincode_err)?),
        2 => Value::List(bincode::deserialize::<VecDeque<Vec<u8>>>(section.payload).map_err(bincode_err)?),
        3 => Value::Set(bincode::deserialize::<HashSet<Vec<u8>>>(section.payload).map_err(bincode_err)?),
        4 => {
            let mut zset = bincode::deserialize::<ZSet>(section.payload).map_err(bincode_err)?;
            zset.rebuild_index();
            Value::SortedSet(zset)
        }
        5 => Value::TimeSeries(bincode::deserialize::<TimeSeries>(section.payload).map_err(bincode_err)?),
        other => {
            return Err(EngineError::UnknownOpCode { code: other });
        }
    };
    let expire_at_ms = if section.expire_at_ms == NO_EXPIRY { None } else { Some(section.expire_at_ms) };
    Ok((section.key.to_vec(), Entry { value, expire_at_ms }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_keyspace() -> Keyspace {
        let ks = Keyspace::new(4);
        ks.set(b"str", b"hello".to_vec());
        ks.set_with_ttl(b"ttl_key", b"bye".to_vec(), 5000);
        ks.sadd(b"set", vec![b"a".to_vec(), b"b".to_vec()]).unwrap();
        ks.zadd(b"zset", b"m".to_vec(), 1.5).unwrap();
        ks
    }

    #[test]
    fn create_then_load_round_trips_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::open(dir.path()).unwrap();
        let ks = sample_keyspace();

        manager.create("snap1", &ks, 1234, true, 999).unwrap();
        let image = manager.load("snap1").unwrap();

        assert_eq!(image.snapshot_wal_len, 1234);
        assert_eq!(image.entries.len(), 4);

        let by_key: HashMap<_, _> = image.entries.into_iter().collect();
        assert_eq!(by_key[b"str".as_slice()].value.as_string().unwrap(), b"hello");
        assert_eq!(by_key[b"ttl_key".as_slice()].expire_at_ms, Some(5000));
        assert_eq!(by_key[b"zset".as_slice()].value.as_zset().unwrap().score(b"m"), Some(1.5));
    }

    #[test]
    fn create_without_compression_also_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::open(dir.path()).unwrap();
        let ks = sample_keyspace();
        manager.create("plain", &ks, 0, false, 0).unwrap();
        let image = manager.load("plain").unwrap();
        assert_eq!(image.entries.len(), 4);
    }

    #[test]
    fn load_rejects_corrupted_crc() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::open(dir.path()).unwrap();
        manager.create("snap1", &sample_keyspace(), 0, true, 0).unwrap();

        let path = manager.path_for("snap1");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(manager.load("snap1"), Err(EngineError::CorruptSnapshot { .. })));
    }

    #[test]
    fn list_returns_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::open(dir.path()).unwrap();
        manager.create("a", &sample_keyspace(), 0, true, 0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        manager.create("b", &sample_keyspace(), 0, true, 0).unwrap();

        let listed = manager.list().unwrap();
        assert_eq!(listed[0].id, "b");
        assert_eq!(listed[1].id, "a");
    }

    #[test]
    fn delete_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::open(dir.path()).unwrap();
        manager.create("a", &sample_keyspace(), 0, true, 0).unwrap();
        manager.delete("a").unwrap();
        assert!(manager.load("a").is_err());
    }
}
