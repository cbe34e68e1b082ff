// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Full keyspace image serialization: create/list/load/delete `.snap`
//! files under a configured directory.

mod format;
mod manager;

pub use manager::{SnapshotImage, SnapshotManager, SnapshotMeta};
