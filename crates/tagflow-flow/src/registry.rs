use std::collections::HashMap;

use tagflow_core::{EngineError, EngineResult};

use crate::descriptor::NodeDescriptor;
use crate::node::{NodeFactory, NodeTypeEntry};

/// Type-tag -> (descriptor, factory) registry for node types, mirroring the driver registry's
/// registry-of-factories shape.
pub struct NodeRegistry {
    types: HashMap<String, NodeTypeEntry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self { types: HashMap::new() }
    }

    pub fn register(&mut self, descriptor: NodeDescriptor, factory: NodeFactory) {
        self.types.insert(descriptor.type_tag.clone(), NodeTypeEntry { descriptor, factory });
    }

    pub fn descriptor(&self, type_tag: &str) -> EngineResult<&NodeDescriptor> {
        self.types
            .get(type_tag)
            .map(|e| &e.descriptor)
            .ok_or_else(|| EngineError::config(format!("unknown node type {type_tag:?}")))
    }

    pub fn create(&self, type_tag: &str, config: &serde_json::Value) -> EngineResult<Box<dyn crate::node::FlowNode>> {
        let entry = self
            .types
            .get(type_tag)
            .ok_or_else(|| EngineError::config(format!("unknown node type {type_tag:?}")))?;
        (entry.factory)(config)
    }

    pub fn count(&self) -> usize {
        self.types.len()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
