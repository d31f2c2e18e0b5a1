use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tagflow_core::{EngineError, EngineResult, MessageEnvelope};
use tracing::debug;

use crate::context::NodeContext;
use crate::descriptor::{NodeDescriptor, NodePort};
use crate::node::FlowNode;
use crate::registry::NodeRegistry;
use crate::script::{DatabaseSink, ScriptHost};

fn parse_config<T: serde::de::DeserializeOwned>(config: &serde_json::Value) -> EngineResult<T> {
    serde_json::from_value(config.clone()).map_err(|e| EngineError::config(format!("invalid node config: {e}")))
}

#[derive(Deserialize)]
struct DelayConfig {
    delay_ms: u64,
}

struct DelayNode {
    config: DelayConfig,
}

#[async_trait]
impl FlowNode for DelayNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
        Ok(vec![("out".to_string(), msg)])
    }
}

#[derive(Deserialize, Default)]
struct DebugConfig {
    #[serde(default)]
    label: Option<String>,
}

struct DebugNode {
    config: DebugConfig,
}

#[async_trait]
impl FlowNode for DebugNode {
    async fn run(
        &self,
        ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        debug!(
            node_id = ctx.node_id,
            label = self.config.label.as_deref().unwrap_or(""),
            payload = %msg.payload,
            "debug node"
        );
        Ok(vec![("out".to_string(), msg)])
    }
}

#[derive(Deserialize)]
struct NotificationConfig {
    #[serde(default = "default_severity")]
    severity: String,
}

fn default_severity() -> String {
    "info".to_string()
}

struct NotificationNode {
    config: NotificationConfig,
}

#[async_trait]
impl FlowNode for NotificationNode {
    async fn run(
        &self,
        ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let body = serde_json::json!({ "severity": self.config.severity, "payload": msg.payload.clone() });
        ctx.publish("notifications", body, tagflow_bus::Qos::AtLeastOnce, false).await?;
        Ok(vec![("out".to_string(), msg)])
    }
}

#[derive(Deserialize)]
struct ContextKeyConfig {
    #[serde(default = "default_scope")]
    scope: String,
    path: String,
}

fn default_scope() -> String {
    "flow".to_string()
}

struct ContextGetNode {
    config: ContextKeyConfig,
}

#[async_trait]
impl FlowNode for ContextGetNode {
    async fn run(
        &self,
        ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let value = match self.config.scope.as_str() {
            "global" => ctx.context_get_global(&self.config.path).await,
            "node" => ctx.context_get_node(&self.config.path).await,
            _ => ctx.context_get_flow(&self.config.path).await,
        };
        let payload = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        Ok(vec![("out".to_string(), msg.derive(payload))])
    }
}

struct ContextSetNode {
    config: ContextKeyConfig,
}

#[async_trait]
impl FlowNode for ContextSetNode {
    async fn run(
        &self,
        ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let value = json_to_value(&msg.payload);
        match self.config.scope.as_str() {
            "global" => ctx.context_set_global(&self.config.path, value).await,
            "node" => ctx.context_set_node(&self.config.path, value).await,
            _ => ctx.context_set_flow(&self.config.path, value).await,
        }
        Ok(vec![("out".to_string(), msg)])
    }
}

fn json_to_value(raw: &serde_json::Value) -> tagflow_core::Value {
    match raw {
        serde_json::Value::Bool(b) => tagflow_core::Value::Bool(*b),
        serde_json::Value::Number(n) => tagflow_core::Value::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => tagflow_core::Value::String(s.clone()),
        serde_json::Value::Null => tagflow_core::Value::Null,
        other => tagflow_core::Value::String(other.to_string()),
    }
}

/// Cross-flow linking by name is not compiled into a direct wire; `link-in`/`link-out` forward
/// their message unchanged. Wiring `link-out "boiler"` to the matching `link-in "boiler"` across
/// flows is left to the embedding application's own flow composition, not this compiler.
struct LinkPassthroughNode;

#[async_trait]
impl FlowNode for LinkPassthroughNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        Ok(vec![("out".to_string(), msg)])
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

#[derive(Deserialize)]
struct HttpRequestConfig {
    url: String,
    #[serde(default = "default_method")]
    method: HttpMethod,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

fn default_method() -> HttpMethod {
    HttpMethod::Get
}

struct HttpRequestNode {
    config: HttpRequestConfig,
    client: reqwest::Client,
}

#[async_trait]
impl FlowNode for HttpRequestNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let mut req = match self.config.method {
            HttpMethod::Get => self.client.get(&self.config.url),
            HttpMethod::Post => self.client.post(&self.config.url).json(&msg.payload),
            HttpMethod::Put => self.client.put(&self.config.url).json(&msg.payload),
            HttpMethod::Delete => self.client.delete(&self.config.url),
        };
        if let Some(timeout_ms) = self.config.timeout_ms {
            req = req.timeout(Duration::from_millis(timeout_ms));
        }
        let response = req
            .send()
            .await
            .map_err(|e| EngineError::transient("http-request", e.to_string()))?;
        let status = response.status().as_u16();
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);
        Ok(vec![("out".to_string(), msg.derive(serde_json::json!({ "status": status, "body": body })))])
    }
}

#[derive(Deserialize)]
struct ScriptConfig {
    source: String,
}

struct ScriptNode {
    config: ScriptConfig,
    host: Arc<dyn ScriptHost>,
}

#[async_trait]
impl FlowNode for ScriptNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let result = self.host.execute(&self.config.source, msg.payload.clone()).await?;
        Ok(vec![("out".to_string(), msg.derive(result))])
    }
}

#[derive(Deserialize)]
struct FileWriteConfig {
    path: String,
    #[serde(default = "default_append")]
    append: bool,
}

fn default_append() -> bool {
    true
}

struct FileWriteNode {
    config: FileWriteConfig,
}

#[async_trait]
impl FlowNode for FileWriteNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        use tokio::io::AsyncWriteExt;
        let path = PathBuf::from(&self.config.path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(self.config.append)
            .write(true)
            .truncate(!self.config.append)
            .open(&path)
            .await?;
        let mut line = serde_json::to_vec(&msg.payload)?;
        line.push(b'\n');
        file.write_all(&line).await?;
        Ok(vec![("out".to_string(), msg)])
    }
}

#[derive(Deserialize)]
struct DatabaseWriteConfig {
    table: String,
}

struct DatabaseWriteNode {
    config: DatabaseWriteConfig,
    sink: Option<Arc<dyn DatabaseSink>>,
}

#[async_trait]
impl FlowNode for DatabaseWriteNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        match &self.sink {
            Some(sink) => sink.write(&self.config.table, msg.payload.clone()).await?,
            None => {
                tracing::warn!(table = %self.config.table, "database-write node has no sink configured, dropping row");
            }
        }
        Ok(vec![("out".to_string(), msg)])
    }
}

/// Subflow composition (inlining a nested flow definition at compile time) is not implemented;
/// these two node types forward their message unchanged so the node type exists in the registry
/// per the palette, while actual nesting is left to a future compiler pass.
struct SubflowPassthroughNode;

#[async_trait]
impl FlowNode for SubflowPassthroughNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        Ok(vec![("out".to_string(), msg)])
    }
}

pub fn register(registry: &mut NodeRegistry, script_host: Option<Arc<dyn ScriptHost>>, database_sink: Option<Arc<dyn DatabaseSink>>) {
    registry.register(
        NodeDescriptor::new("delay", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| Ok(Box::new(DelayNode { config: parse_config(config)? }) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new("debug", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| {
            let config: DebugConfig = serde_json::from_value(config.clone()).unwrap_or_default();
            Ok(Box::new(DebugNode { config }) as Box<dyn FlowNode>)
        }),
    );
    registry.register(
        NodeDescriptor::new("notification", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| Ok(Box::new(NotificationNode { config: parse_config(config)? }) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new("context-get", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| Ok(Box::new(ContextGetNode { config: parse_config(config)? }) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new("context-set", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| Ok(Box::new(ContextSetNode { config: parse_config(config)? }) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new("link-in", true, vec![NodePort::output("out")]),
        Box::new(|_config| Ok(Box::new(LinkPassthroughNode) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new("link-out", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|_config| Ok(Box::new(LinkPassthroughNode) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new("http-request", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| {
            Ok(Box::new(HttpRequestNode { config: parse_config(config)?, client: reqwest::Client::new() })
                as Box<dyn FlowNode>)
        }),
    );
    if let Some(host) = script_host {
        registry.register(
            NodeDescriptor::new("script", false, vec![NodePort::input("in", true), NodePort::output("out")]),
            Box::new(move |config| {
                Ok(Box::new(ScriptNode { config: parse_config(config)?, host: host.clone() }) as Box<dyn FlowNode>)
            }),
        );
    }
    registry.register(
        NodeDescriptor::new("file-write", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| Ok(Box::new(FileWriteNode { config: parse_config(config)? }) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new("database-write", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(move |config| {
            Ok(Box::new(DatabaseWriteNode { config: parse_config(config)?, sink: database_sink.clone() })
                as Box<dyn FlowNode>)
        }),
    );
    registry.register(
        NodeDescriptor::new("subflow-input", true, vec![NodePort::output("out")]),
        Box::new(|_config| Ok(Box::new(SubflowPassthroughNode) as Box<dyn FlowNode>)),
    );
    registry.register(
        NodeDescriptor::new("subflow-output", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|_config| Ok(Box::new(SubflowPassthroughNode) as Box<dyn FlowNode>)),
    );
}
