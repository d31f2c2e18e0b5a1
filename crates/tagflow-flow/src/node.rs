use async_trait::async_trait;
use tagflow_core::{EngineResult, MessageEnvelope};

use crate::context::NodeContext;
use crate::descriptor::NodeDescriptor;

/// One running node instance. `run` receives the message that arrived on (one of) its input
/// ports and returns the `(outputPort, message)` pairs it emits; the executor fans each pair out
/// to every wire leaving that port.
#[async_trait]
pub trait FlowNode: Send + Sync {
    async fn run(
        &self,
        ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>>;
}

/// Builds a fresh node runtime from its declarative config document.
pub type NodeFactory = Box<dyn Fn(&serde_json::Value) -> EngineResult<Box<dyn FlowNode>> + Send + Sync>;

/// Pairs a `NodeFactory` with the descriptor the compiler validates wires against.
pub struct NodeTypeEntry {
    pub descriptor: NodeDescriptor,
    pub factory: NodeFactory,
}
