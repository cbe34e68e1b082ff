// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Engine construction parameters.
//!
//! `EngineConfig` groups every knob the storage engine accepts at
//! construction. It can be built in code, loaded from a TOML file, or
//! started from [`EngineConfig::default`] and partially overridden.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_shard_count() -> usize {
    256
}

fn default_cdc_capacity() -> usize {
    10_000
}

fn default_hotkey_topn() -> usize {
    100
}

fn default_active_expiry_period_ms() -> u64 {
    100
}

fn default_active_expiry_sample() -> usize {
    20
}

/// Construction parameters for an [`crate::engine::Engine`].
///
/// ## Example Usage
/// ```no_run
/// use kvengine::config::EngineConfig;
///
/// let config = EngineConfig::new("/var/lib/kvengine/wal.log", "/var/lib/kvengine/snapshots");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Filesystem path of the WAL file.
    pub wal_path: PathBuf,

    /// Directory holding `.snap` snapshot files (created if absent).
    pub snapshot_dir: PathBuf,

    /// Number of keyspace shards. Must be a power of two.
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    /// Capacity of the CDC ring buffer.
    #[serde(default = "default_cdc_capacity")]
    pub cdc_capacity: usize,

    /// Size of the hot-key top-N heap.
    #[serde(default = "default_hotkey_topn")]
    pub hotkey_topn: usize,

    /// Hot-key counter decay interval; `None` disables decay.
    #[serde(default)]
    pub hotkey_decay_ms: Option<u64>,

    /// Interval between active-expiry passes, in milliseconds.
    #[serde(default = "default_active_expiry_period_ms")]
    pub active_expiry_period_ms: u64,

    /// Keys sampled per shard per active-expiry pass.
    #[serde(default = "default_active_expiry_sample")]
    pub active_expiry_sample: usize,

    /// Whether each WAL append fsyncs before returning.
    #[serde(default = "default_true")]
    pub sync_writes: bool,
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wal_path: PathBuf::from("kvengine.wal"),
            snapshot_dir: PathBuf::from("snapshots"),
            shard_count: default_shard_count(),
            cdc_capacity: default_cdc_capacity(),
            hotkey_topn: default_hotkey_topn(),
            hotkey_decay_ms: None,
            active_expiry_period_ms: default_active_expiry_period_ms(),
            active_expiry_sample: default_active_expiry_sample(),
            sync_writes: true,
        }
    }
}

impl EngineConfig {
    /// Creates a config with the given paths and every other field at its
    /// documented default.
    pub fn new(wal_path: impl Into<PathBuf>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            wal_path: wal_path.into(),
            snapshot_dir: snapshot_dir.into(),
            ..Self::default()
        }
    }

    /// Loads a config from a TOML file, falling back to defaults for any
    /// field the file omits.
    pub fn from_toml_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| EngineError::IoError {
            operation: "read_config".to_string(),
            reason: e.to_string(),
        })?;
        let config: Self = toml::from_str(&contents).map_err(|e| EngineError::InvalidConfig {
            reason: format!("{}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the configured hot-key decay interval, if any.
    pub fn hotkey_decay(&self) -> Option<Duration> {
        self.hotkey_decay_ms.map(Duration::from_millis)
    }

    /// Returns the configured active-expiry period.
    pub fn active_expiry_period(&self) -> Duration {
        Duration::from_millis(self.active_expiry_period_ms)
    }

    /// Validates invariants that cannot be expressed in the type system.
    ///
    /// `shard_count` must be a power of two and non-zero.
    pub fn validate(&self) -> EngineResult<()> {
        if self.shard_count == 0 || !self.shard_count.is_power_of_two() {
            return Err(EngineError::InvalidConfig {
                reason: format!("shard_count must be a non-zero power of two, got {}", self.shard_count),
            });
        }
        if self.cdc_capacity == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "cdc_capacity must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.shard_count, 256);
        assert_eq!(config.cdc_capacity, 10_000);
        assert_eq!(config.hotkey_topn, 100);
        assert_eq!(config.active_expiry_period_ms, 100);
        assert_eq!(config.active_expiry_sample, 20);
        assert!(config.sync_writes);
        assert!(config.hotkey_decay_ms.is_none());
    }

    #[test]
    fn rejects_non_power_of_two_shard_count() {
        let mut config = EngineConfig::default();
        config.shard_count = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_toml_file_overlays_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kvengine.toml");
        std::fs::write(&path, "wal_path = \"/tmp/a.wal\"\nshard_count = 16\n").unwrap();
        let config = EngineConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.wal_path, PathBuf::from("/tmp/a.wal"));
        assert_eq!(config.shard_count, 16);
        assert_eq!(config.cdc_capacity, 10_000);
    }
}
