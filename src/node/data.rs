// src/node/data.rs

//! Runtime payload threaded through one iteration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload passed from node to node within an iteration.
///
/// Nodes receive the upstream value by reference and return a new one, so a
/// value is never mutated while another node could still observe it. The
/// same type is what queues store and what dead-letter records carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// Business payload (any JSON value).
    #[serde(default)]
    pub payload: Value,

    /// Free-form annotations (routing hints, provenance, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl NodeData {
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// The input handed to a producer at the start of every iteration.
    pub fn trigger() -> Self {
        Self::default()
    }

    pub fn is_trigger(&self) -> bool {
        self.payload.is_null() && self.metadata.is_empty()
    }

    /// Look up a top-level key of an object payload.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Look up a value by JSON pointer (e.g. `/job/score`).
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.payload.pointer(pointer)
    }

    /// Copy with a replaced payload; metadata is carried over.
    pub fn with_payload(&self, payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
            metadata: self.metadata.clone(),
        }
    }

    /// Copy with one extra metadata entry.
    pub fn with_metadata(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut next = self.clone();
        next.metadata.insert(key.into(), value.into());
        next
    }
}

impl From<Value> for NodeData {
    fn from(payload: Value) -> Self {
        NodeData::new(payload)
    }
}
