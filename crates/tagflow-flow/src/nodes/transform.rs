use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tagflow_core::statemachine::ComparisonOp;
use tagflow_core::{EngineError, EngineResult, MessageEnvelope, Value};

use crate::context::NodeContext;
use crate::descriptor::{NodeDescriptor, NodePort};
use crate::node::FlowNode;
use crate::registry::NodeRegistry;

fn parse_config<T: serde::de::DeserializeOwned>(config: &serde_json::Value) -> EngineResult<T> {
    serde_json::from_value(config.clone()).map_err(|e| EngineError::config(format!("invalid node config: {e}")))
}

fn payload_number(payload: &serde_json::Value) -> Option<f64> {
    match payload {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::Object(map) => map.get("value").and_then(|v| v.as_f64()),
        _ => None,
    }
}

#[derive(Copy, Clone)]
enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
    Scale,
}

#[derive(Deserialize)]
struct MathConfig {
    operand: f64,
    #[serde(default)]
    offset: f64,
}

struct MathNode {
    op: MathOp,
    config: MathConfig,
}

#[async_trait]
impl FlowNode for MathNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let input = payload_number(&msg.payload)
            .ok_or_else(|| EngineError::action_failure("math", "payload is not numeric"))?;
        let result = match self.op {
            MathOp::Add => input + self.config.operand,
            MathOp::Sub => input - self.config.operand,
            MathOp::Mul => input * self.config.operand,
            MathOp::Div => input / self.config.operand,
            MathOp::Scale => input * self.config.operand + self.config.offset,
        };
        Ok(vec![("out".to_string(), msg.derive(serde_json::json!({ "value": result })))])
    }
}

#[derive(Deserialize)]
struct CompareConfig {
    op: String,
    threshold: String,
}

struct CompareNode {
    config: CompareConfig,
}

fn compare_payload(payload: &serde_json::Value, op: &str, threshold: &str) -> EngineResult<bool> {
    let op = ComparisonOp::parse(op).ok_or_else(|| EngineError::config(format!("unknown compare op {op:?}")))?;
    let current = match payload {
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Object(map) => match map.get("value") {
            Some(serde_json::Value::Number(n)) => Value::Number(n.as_f64().unwrap_or(0.0)),
            Some(serde_json::Value::String(s)) => Value::String(s.clone()),
            Some(serde_json::Value::Bool(b)) => Value::Bool(*b),
            _ => Value::Null,
        },
        _ => Value::Null,
    };
    let trigger = tagflow_core::statemachine::TagTrigger {
        tag_path: String::new(),
        op,
        threshold: threshold.to_string(),
    };
    Ok(trigger.evaluate(&current))
}

#[async_trait]
impl FlowNode for CompareNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let passed = compare_payload(&msg.payload, &self.config.op, &self.config.threshold)?;
        let port = if passed { "true" } else { "false" };
        Ok(vec![(port.to_string(), msg)])
    }
}

struct BranchNode;

#[async_trait]
impl FlowNode for BranchNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let truthy = json_is_truthy(&msg.payload);
        let port = if truthy { "true" } else { "false" };
        Ok(vec![(port.to_string(), msg)])
    }
}

fn json_is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|n| n != 0.0).unwrap_or(false),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Null => false,
        serde_json::Value::Object(map) => map.get("value").map(json_is_truthy).unwrap_or(true),
        serde_json::Value::Array(a) => !a.is_empty(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum GateOp {
    And,
    Or,
    Not,
}

#[derive(Deserialize)]
struct BooleanGateConfig {
    op: GateOp,
    #[serde(default)]
    fields: Vec<String>,
}

struct BooleanGateNode {
    config: BooleanGateConfig,
}

#[async_trait]
impl FlowNode for BooleanGateNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let values: Vec<bool> = self
            .config
            .fields
            .iter()
            .map(|f| msg.payload.get(f).map(json_is_truthy).unwrap_or(false))
            .collect();
        let result = match self.config.op {
            GateOp::And => values.iter().all(|v| *v),
            GateOp::Or => values.iter().any(|v| *v),
            GateOp::Not => !values.first().copied().unwrap_or(false),
        };
        Ok(vec![("out".to_string(), msg.derive(serde_json::json!({ "value": result })))])
    }
}

#[derive(Deserialize)]
struct FilterConfig {
    op: String,
    threshold: String,
}

struct FilterNode {
    config: FilterConfig,
}

#[async_trait]
impl FlowNode for FilterNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let passed = compare_payload(&msg.payload, &self.config.op, &self.config.threshold)?;
        if passed {
            Ok(vec![("out".to_string(), msg)])
        } else {
            Ok(vec![])
        }
    }
}

#[derive(Deserialize)]
struct ConstantConfig {
    value: serde_json::Value,
}

struct ConstantNode {
    config: ConstantConfig,
}

#[async_trait]
impl FlowNode for ConstantNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        Ok(vec![("out".to_string(), msg.derive(self.config.value.clone()))])
    }
}

#[derive(Deserialize)]
struct TemplateConfig {
    template: String,
}

struct TemplateNode {
    config: TemplateConfig,
    placeholder: Regex,
}

#[async_trait]
impl FlowNode for TemplateNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let rendered = self
            .placeholder
            .replace_all(&self.config.template, |caps: &regex::Captures| {
                let path = caps[1].trim();
                msg.payload
                    .get(path)
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default()
            })
            .to_string();
        Ok(vec![("out".to_string(), msg.derive(serde_json::json!({ "text": rendered })))])
    }
}

#[derive(Deserialize)]
struct SwitchConfig {
    field: String,
    cases: std::collections::HashMap<String, String>,
    #[serde(default)]
    default: Option<String>,
}

struct SwitchNode {
    config: SwitchConfig,
}

#[async_trait]
impl FlowNode for SwitchNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let value = msg
            .payload
            .get(&self.config.field)
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let port = self
            .config
            .cases
            .get(&value)
            .or(self.config.default.as_ref())
            .ok_or_else(|| EngineError::action_failure("switch", format!("no case or default for {value:?}")))?;
        Ok(vec![(port.clone(), msg)])
    }
}

/// Registers one canonical math type tag (`math-add`, `math-sub`, ...) bound to a fixed `op`, per
/// the registry's single-canonical-tag rule — there is no generic `math` tag with an `op` field.
fn register_math(registry: &mut NodeRegistry, tag: &'static str, op: MathOp) {
    registry.register(
        NodeDescriptor::new(tag, false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(move |config| Ok(Box::new(MathNode { op, config: parse_config(config)? }) as Box<dyn FlowNode>)),
    );
}

pub fn register(registry: &mut NodeRegistry) {
    register_math(registry, "math-add", MathOp::Add);
    register_math(registry, "math-sub", MathOp::Sub);
    register_math(registry, "math-mul", MathOp::Mul);
    register_math(registry, "math-div", MathOp::Div);
    register_math(registry, "math-scale", MathOp::Scale);
    registry.register(
        NodeDescriptor::new(
            "compare",
            false,
            vec![NodePort::input("in", true), NodePort::output("true"), NodePort::output("false")],
        ),
        Box::new(|config| Ok(Box::new(CompareNode { config: parse_config(config)? }) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new(
            "branch",
            false,
            vec![NodePort::input("in", true), NodePort::output("true"), NodePort::output("false")],
        ),
        Box::new(|_config| Ok(Box::new(BranchNode) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new("boolean-gate", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| Ok(Box::new(BooleanGateNode { config: parse_config(config)? }) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new("filter", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| Ok(Box::new(FilterNode { config: parse_config(config)? }) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new("constant", true, vec![NodePort::output("out")]),
        Box::new(|config| Ok(Box::new(ConstantNode { config: parse_config(config)? }) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new("template", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| {
            Ok(Box::new(TemplateNode {
                config: parse_config(config)?,
                placeholder: Regex::new(r"\{\{\s*([A-Za-z0-9_./]+)\s*\}\}").expect("static regex"),
            }) as Box<dyn FlowNode>)
        }),
    );
    registry.register(
        NodeDescriptor::new("switch", false, vec![NodePort::input("in", true)]),
        Box::new(|config| Ok(Box::new(SwitchNode { config: parse_config(config)? }) as Box<dyn FlowNode>)),
    );
}
