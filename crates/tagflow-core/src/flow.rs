use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{EngineError, EngineResult};

fn default_true() -> bool {
    true
}

/// One node in a `FlowDefinition`. The type tag is resolved against a node-type registry at
/// compile time; this struct only carries the declarative shape, not behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDefinition {
    pub id: String,
    pub source_node: String,
    pub source_port: String,
    pub target_node: String,
    pub target_port: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub wires: Vec<WireDefinition>,
}

impl FlowDefinition {
    /// Structural checks that don't require a node-type registry: node ids unique, every wire
    /// endpoint refers to an existing node, no wire is a self-loop. Port-name and cycle checks
    /// need the registry and live in the flow compiler instead.
    pub fn validate_structure(&self) -> EngineResult<()> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(EngineError::config(format!("duplicate node id {:?}", node.id)));
            }
        }
        for wire in &self.wires {
            if wire.source_node == wire.target_node {
                return Err(EngineError::config(format!(
                    "wire {:?} is a self-loop on node {:?}",
                    wire.id, wire.source_node
                )));
            }
            if !ids.contains(wire.source_node.as_str()) {
                return Err(EngineError::config(format!(
                    "wire {:?} references unknown source node {:?}",
                    wire.id, wire.source_node
                )));
            }
            if !ids.contains(wire.target_node.as_str()) {
                return Err(EngineError::config(format!(
                    "wire {:?} references unknown target node {:?}",
                    wire.id, wire.target_node
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeDefinition {
        NodeDefinition {
            id: id.to_string(),
            type_tag: "debug".to_string(),
            name: None,
            config: serde_json::json!({}),
            disabled: false,
            position: None,
        }
    }

    #[test]
    fn rejects_self_loop_wire() {
        let flow = FlowDefinition {
            id: "f1".into(),
            name: "F1".into(),
            enabled: true,
            nodes: vec![node("n1")],
            wires: vec![WireDefinition {
                id: "w1".into(),
                source_node: "n1".into(),
                source_port: "out".into(),
                target_node: "n1".into(),
                target_port: "in".into(),
            }],
        };
        assert!(flow.validate_structure().is_err());
    }

    #[test]
    fn rejects_wire_to_unknown_node() {
        let flow = FlowDefinition {
            id: "f1".into(),
            name: "F1".into(),
            enabled: true,
            nodes: vec![node("n1")],
            wires: vec![WireDefinition {
                id: "w1".into(),
                source_node: "n1".into(),
                source_port: "out".into(),
                target_node: "nope".into(),
                target_port: "in".into(),
            }],
        };
        assert!(flow.validate_structure().is_err());
    }

    #[test]
    fn accepts_well_formed_flow() {
        let flow = FlowDefinition {
            id: "f1".into(),
            name: "F1".into(),
            enabled: true,
            nodes: vec![node("n1"), node("n2")],
            wires: vec![WireDefinition {
                id: "w1".into(),
                source_node: "n1".into(),
                source_port: "out".into(),
                target_node: "n2".into(),
                target_port: "in".into(),
            }],
        };
        assert!(flow.validate_structure().is_ok());
    }
}
