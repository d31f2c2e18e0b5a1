use std::collections::HashMap;
use std::sync::Arc;

use tagflow_bus::{MessageBus, Subscription};
use tagflow_core::{EngineResult, MessageEnvelope};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::compiler::CompiledFlow;
use crate::executor::{ExecutorOptions, FlowExecutor};
use crate::tracer::RunOutcome;

type Targets = Vec<(Arc<CompiledFlow>, String)>;

struct RegisteredPattern {
    targets: Arc<Mutex<Targets>>,
    task: JoinHandle<()>,
}

/// Scans enabled flows for `bus-in` nodes, subscribes on their configured topic, and fires the
/// owning flow at that node for every arriving message that matches. Reload diffs the previous
/// subscription set against the new one instead of tearing everything down each time.
pub struct FlowTriggerRouter {
    bus: Arc<dyn MessageBus>,
    executor: Arc<FlowExecutor>,
    patterns: Mutex<HashMap<String, RegisteredPattern>>,
}

impl FlowTriggerRouter {
    pub fn new(bus: Arc<dyn MessageBus>, executor: Arc<FlowExecutor>) -> Self {
        Self { bus, executor, patterns: Mutex::new(HashMap::new()) }
    }

    pub async fn reload(&self, flows: &[Arc<CompiledFlow>]) -> EngineResult<()> {
        let mut desired: HashMap<String, Targets> = HashMap::new();
        for flow in flows {
            for node_id in &flow.trigger_node_ids {
                let Some(def) = flow.definition.nodes.iter().find(|n| &n.id == node_id) else {
                    continue;
                };
                if def.type_tag != "bus-in" {
                    continue;
                }
                let Some(topic) = def.config.get("topic").and_then(|v| v.as_str()) else {
                    warn!(flow_id = %flow.definition.id, node_id, "bus-in node missing a topic, skipping");
                    continue;
                };
                desired.entry(topic.to_string()).or_default().push((flow.clone(), node_id.clone()));
            }
        }

        let mut patterns = self.patterns.lock().await;

        let stale: Vec<String> = patterns.keys().filter(|p| !desired.contains_key(*p)).cloned().collect();
        for pattern in stale {
            if let Some(entry) = patterns.remove(&pattern) {
                entry.task.abort();
            }
        }

        for (pattern, targets) in desired {
            if let Some(entry) = patterns.get(&pattern) {
                *entry.targets.lock().await = targets;
            } else {
                let subscription = self.bus.subscribe(&pattern).await?;
                let shared_targets = Arc::new(Mutex::new(targets));
                let task = spawn_dispatcher(subscription, self.executor.clone(), shared_targets.clone());
                patterns.insert(pattern, RegisteredPattern { targets: shared_targets, task });
            }
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        let mut patterns = self.patterns.lock().await;
        for (_, entry) in patterns.drain() {
            entry.task.abort();
        }
    }
}

fn spawn_dispatcher(
    mut subscription: Subscription,
    executor: Arc<FlowExecutor>,
    targets: Arc<Mutex<Targets>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = subscription.receiver.recv().await {
            let current_targets = targets.lock().await.clone();
            for (flow, node_id) in current_targets {
                let outcome = executor
                    .execute(&flow, &node_id, MessageEnvelope::new(message.payload.clone()), ExecutorOptions::default())
                    .await;
                if !matches!(outcome, RunOutcome::Success) {
                    warn!(node_id, ?outcome, "bus-in triggered run did not complete cleanly");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::FlowCompiler;
    use crate::registry::NodeRegistry;
    use tagflow_bus::InProcessBus;
    use tagflow_context::ContextStore;
    use tagflow_core::{FlowDefinition, NodeDefinition};
    use tagflow_drivers::DriverRegistry;
    use tagflow_poll::PollEngine;
    use tokio::time::{sleep, Duration};

    fn node(id: &str, type_tag: &str, config: serde_json::Value) -> NodeDefinition {
        NodeDefinition { id: id.into(), type_tag: type_tag.into(), name: None, config, disabled: false, position: None }
    }

    #[tokio::test]
    async fn routes_matching_bus_message_into_the_flow() {
        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let poll = Arc::new(PollEngine::new(bus.clone(), None, Arc::new(DriverRegistry::new())));
        let path = std::env::temp_dir().join(format!("tagflow-router-test-{}.json", uuid::Uuid::new_v4()));
        let context = Arc::new(ContextStore::load(path).await);
        let executor = Arc::new(FlowExecutor::new(poll, None, bus.clone(), context));

        let mut registry = NodeRegistry::new();
        crate::nodes::io::register(&mut registry);

        let def = FlowDefinition {
            id: "f1".into(),
            name: "F1".into(),
            enabled: true,
            nodes: vec![node("in", "bus-in", serde_json::json!({ "topic": "events/+" }))],
            wires: vec![],
        };
        let compiled = Arc::new(FlowCompiler::compile(def, &registry).unwrap());

        let router = FlowTriggerRouter::new(bus.clone(), executor);
        router.reload(&[compiled]).await.unwrap();
        sleep(Duration::from_millis(10)).await;

        bus.publish("events/door", serde_json::json!({"open": true}), tagflow_bus::Qos::AtMostOnce, false)
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;

        router.shutdown().await;
    }
}
