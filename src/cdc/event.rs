// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! The mutation event shape published on the CDC stream.

use serde::{Deserialize, Serialize};

/// The operation a [`CdcEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdcOp {
    Set,
    Delete,
    Expire,
    Rename,
    HashSet,
    HashDelete,
    ListPush,
    ListPop,
    SetAdd,
    SetRemove,
    ZsetAdd,
    ZsetRemove,
    TimeSeriesAdd,
}

/// A single recorded mutation. Ids are strictly monotonic and dense from 1
/// for the lifetime of the owning [`super::CdcStream`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdcEvent {
    pub id: u64,
    pub ts_ms: i64,
    pub op: CdcOp,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub field: Option<Vec<u8>>,
}

impl CdcEvent {
    pub fn new(id: u64, ts_ms: i64, op: CdcOp, key: Vec<u8>) -> Self {
        Self { id, ts_ms, op, key, value: None, field: None }
    }

    pub fn with_value(mut self, value: Vec<u8>) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_field(mut self, field: Vec<u8>) -> Self {
        self.field = Some(field);
        self
    }

    /// Serializes to the `{id, ts, op, key, value?, field?}` JSON shape.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "ts": self.ts_ms,
            "op": self.op,
            "key": String::from_utf8_lossy(&self.key),
            "value": self.value.as_ref().map(|v| String::from_utf8_lossy(v).into_owned()),
            "field": self.field.as_ref().map(|f| String::from_utf8_lossy(f).into_owned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_json_includes_optional_fields_when_present() {
        let event = CdcEvent::new(1, 1000, CdcOp::Set, b"a".to_vec()).with_value(b"1".to_vec());
        let json = event.to_json();
        assert_eq!(json["id"], 1);
        assert_eq!(json["key"], "a");
        assert_eq!(json["value"], "1");
        assert!(json["field"].is_null());
    }
}
