use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::model::{Quality, Value};

/// The message carried between flow nodes. The payload is an opaque structured document; nodes
/// interpret it however their type requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub payload: serde_json::Value,
    pub created_utc: DateTime<Utc>,
    pub correlation_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl MessageEnvelope {
    pub fn new(payload: serde_json::Value) -> Self {
        Self { payload, created_utc: Utc::now(), correlation_id: Uuid::new_v4(), metadata: None }
    }

    /// A child message for the same run, carrying a fresh correlation id but copied metadata —
    /// matches how a node's emitted message continues the run rather than starting a new one.
    pub fn derive(&self, payload: serde_json::Value) -> Self {
        Self {
            payload,
            created_utc: Utc::now(),
            correlation_id: self.correlation_id,
            metadata: self.metadata.clone(),
        }
    }
}

/// The three scopes of the `ContextStore`. Only `Global` entries are persisted to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContextScope {
    Global,
    Flow,
    Node,
}

/// A context-store entry, flattened to a single namespaced key as described in §3:
/// `global:path`, `flow:<flowId>:path`, `node:<flowId>:<nodeId>:path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalTagValue {
    pub scope: ContextScope,
    pub path: String,
    pub value: Value,
    pub quality: Quality,
    pub timestamp: DateTime<Utc>,
}

/// A fully-namespaced context key, used as the in-memory map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedKey(String);

impl ScopedKey {
    pub fn global(path: &str) -> Self {
        ScopedKey(format!("global:{path}"))
    }

    pub fn flow(flow_id: &str, path: &str) -> Self {
        ScopedKey(format!("flow:{flow_id}:{path}"))
    }

    pub fn node(flow_id: &str, node_id: &str, path: &str) -> Self {
        ScopedKey(format!("node:{flow_id}:{node_id}:{path}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when this key belongs to the given flow (either flow- or node-scoped), used to clear
    /// entries whose owning flow disappeared from config.
    pub fn owned_by_flow(&self, flow_id: &str) -> bool {
        self.0.starts_with(&format!("flow:{flow_id}:")) || self.0.starts_with(&format!("node:{flow_id}:"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_key_formats_match_spec() {
        assert_eq!(ScopedKey::global("a/b").as_str(), "global:a/b");
        assert_eq!(ScopedKey::flow("f1", "x").as_str(), "flow:f1:x");
        assert_eq!(ScopedKey::node("f1", "n1", "x").as_str(), "node:f1:n1:x");
    }

    #[test]
    fn owned_by_flow_matches_flow_and_node_scope() {
        assert!(ScopedKey::flow("f1", "x").owned_by_flow("f1"));
        assert!(ScopedKey::node("f1", "n1", "x").owned_by_flow("f1"));
        assert!(!ScopedKey::global("x").owned_by_flow("f1"));
        assert!(!ScopedKey::flow("f2", "x").owned_by_flow("f1"));
    }
}
