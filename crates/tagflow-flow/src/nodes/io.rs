use async_trait::async_trait;
use serde::Deserialize;
use tagflow_bus::Qos;
use tagflow_core::{EngineError, EngineResult, MessageEnvelope, Value};

use crate::context::NodeContext;
use crate::descriptor::{NodeDescriptor, NodePort};
use crate::node::FlowNode;
use crate::registry::NodeRegistry;

/// `bus-in`'s live subscription is owned by `FlowTriggerRouter`; `run` just forwards the message
/// the router seeded the run with.
struct BusInNode;

#[async_trait]
impl FlowNode for BusInNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        Ok(vec![("out".to_string(), msg)])
    }
}

#[derive(Deserialize)]
struct BusOutConfig {
    topic: String,
    #[serde(default)]
    retain: bool,
}

struct BusOutNode {
    config: BusOutConfig,
}

#[async_trait]
impl FlowNode for BusOutNode {
    async fn run(
        &self,
        ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        ctx.publish(&self.config.topic, msg.payload.clone(), Qos::AtMostOnce, self.config.retain).await?;
        Ok(vec![("out".to_string(), msg)])
    }
}

#[derive(Deserialize)]
struct TagInputConfig {
    connection_id: String,
    tag_id: String,
}

struct TagInputNode {
    config: TagInputConfig,
}

#[async_trait]
impl FlowNode for TagInputNode {
    async fn run(
        &self,
        ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let value = ctx.read_tag(&self.config.connection_id, &self.config.tag_id);
        let payload = match value {
            Some(v) => serde_json::json!({
                "value": v.value,
                "quality": v.quality.is_good(),
                "timestamp": v.timestamp,
            }),
            None => serde_json::Value::Null,
        };
        Ok(vec![("out".to_string(), msg.derive(payload))])
    }
}

#[derive(Deserialize)]
struct TagOutputConfig {
    connection_id: String,
    tag_id: String,
    #[serde(default)]
    value_field: Option<String>,
}

struct TagOutputNode {
    config: TagOutputConfig,
}

#[async_trait]
impl FlowNode for TagOutputNode {
    async fn run(
        &self,
        ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let raw = match &self.config.value_field {
            Some(field) => msg.payload.get(field).cloned().unwrap_or(serde_json::Value::Null),
            None => msg.payload.clone(),
        };
        let value = json_to_value(&raw);
        ctx.write_tag(&self.config.connection_id, &self.config.tag_id, value).await?;
        Ok(vec![("out".to_string(), msg)])
    }
}

fn json_to_value(raw: &serde_json::Value) -> Value {
    match raw {
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::parse_loose(s),
        serde_json::Value::Null => Value::Null,
        other => Value::String(other.to_string()),
    }
}

fn parse_config<T: serde::de::DeserializeOwned>(config: &serde_json::Value) -> EngineResult<T> {
    serde_json::from_value(config.clone()).map_err(|e| EngineError::config(format!("invalid node config: {e}")))
}

pub fn register(registry: &mut NodeRegistry) {
    registry.register(
        NodeDescriptor::new("bus-in", true, vec![NodePort::output("out")]),
        Box::new(|_config| Ok(Box::new(BusInNode) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new("bus-out", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| Ok(Box::new(BusOutNode { config: parse_config(config)? }) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new("tag-input", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| Ok(Box::new(TagInputNode { config: parse_config(config)? }) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new("tag-output", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| Ok(Box::new(TagOutputNode { config: parse_config(config)? }) as Box<dyn FlowNode>)),
    );
}
