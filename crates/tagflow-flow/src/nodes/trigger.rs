use async_trait::async_trait;
use tagflow_core::{EngineResult, MessageEnvelope};

use crate::context::NodeContext;
use crate::descriptor::{NodeDescriptor, NodePort};
use crate::node::FlowNode;
use crate::registry::NodeRegistry;

/// A manual/timer/tag-change trigger's `run` is only invoked when the executor starts a run at
/// this node; the live scheduling (timer ticks, tag-change subscriptions) is driven externally by
/// `crate::trigger_runtime`, not by this type. `run` just forwards the seed message unchanged.
struct PassthroughTrigger;

#[async_trait]
impl FlowNode for PassthroughTrigger {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        Ok(vec![("out".to_string(), msg)])
    }
}

pub fn register(registry: &mut NodeRegistry) {
    for type_tag in ["manual-trigger", "timer-trigger", "tag-change-trigger"] {
        registry.register(
            NodeDescriptor::new(type_tag, true, vec![NodePort::output("out")]),
            Box::new(|_config| Ok(Box::new(PassthroughTrigger) as Box<dyn FlowNode>)),
        );
    }
}
