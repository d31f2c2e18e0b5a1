use std::sync::Arc;

use chrono::{DateTime, Utc};
use tagflow_bus::{MessageBus, Qos};
use tagflow_context::ContextStore;
use tagflow_core::{ContextScope, EngineResult, MessageEnvelope, ScopedKey, TagValue, Value};
use tagflow_history::{HistoryRecord, HistoryStore};
use tagflow_poll::PollEngine;

/// Everything one node invocation needs: the node's own config document, a tag reader/writer
/// bridged to the `PollEngine`, a bus publisher, a historian writer, a flow/node-scoped context
/// store, and the `emit` sink the executor drains after `FlowNode::run` returns.
pub struct NodeContext<'a> {
    pub flow_id: &'a str,
    pub node_id: &'a str,
    pub config: &'a serde_json::Value,
    poll: &'a Arc<PollEngine>,
    history: Option<&'a Arc<HistoryStore>>,
    bus: &'a Arc<dyn MessageBus>,
    context: &'a Arc<ContextStore>,
    emitted: Vec<(String, MessageEnvelope)>,
}

impl<'a> NodeContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        flow_id: &'a str,
        node_id: &'a str,
        config: &'a serde_json::Value,
        poll: &'a Arc<PollEngine>,
        history: Option<&'a Arc<HistoryStore>>,
        bus: &'a Arc<dyn MessageBus>,
        context: &'a Arc<ContextStore>,
    ) -> Self {
        Self { flow_id, node_id, config, poll, history, bus, context, emitted: Vec::new() }
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    pub fn emit(&mut self, port: &str, msg: MessageEnvelope) {
        self.emitted.push((port.to_string(), msg));
    }

    pub fn into_emitted(self) -> Vec<(String, MessageEnvelope)> {
        self.emitted
    }

    pub fn read_tag(&self, connection_id: &str, tag_id: &str) -> Option<TagValue> {
        self.poll.current_value(connection_id, tag_id)
    }

    pub async fn write_tag(&self, connection_id: &str, tag_id: &str, value: Value) -> EngineResult<()> {
        self.poll.write_tag(connection_id, tag_id, value).await
    }

    pub async fn publish(&self, topic: &str, payload: serde_json::Value, qos: Qos, retain: bool) -> EngineResult<()> {
        self.bus.publish(topic, payload, qos, retain).await
    }

    pub fn log_history(&self, connection_id: &str, tag_id: &str, value: &Value, quality: i32, timestamp: DateTime<Utc>) {
        if let Some(history) = self.history {
            if let Ok(value_json) = serde_json::to_string(value) {
                history.store(HistoryRecord {
                    connection_id: connection_id.to_string(),
                    tag_id: tag_id.to_string(),
                    value: value_json,
                    quality,
                    timestamp,
                });
            }
        }
    }

    pub async fn context_get_global(&self, path: &str) -> Option<Value> {
        self.context.get(&ScopedKey::global(path)).await
    }

    pub async fn context_set_global(&self, path: &str, value: Value) {
        self.context.set(ContextScope::Global, ScopedKey::global(path), value).await;
    }

    pub async fn context_get_flow(&self, path: &str) -> Option<Value> {
        self.context.get(&ScopedKey::flow(self.flow_id, path)).await
    }

    pub async fn context_set_flow(&self, path: &str, value: Value) {
        self.context.set(ContextScope::Flow, ScopedKey::flow(self.flow_id, path), value).await;
    }

    pub async fn context_get_node(&self, path: &str) -> Option<Value> {
        self.context.get(&ScopedKey::node(self.flow_id, self.node_id, path)).await
    }

    pub async fn context_set_node(&self, path: &str, value: Value) {
        self.context.set(ContextScope::Node, ScopedKey::node(self.flow_id, self.node_id, path), value).await;
    }
}
