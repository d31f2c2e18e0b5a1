use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tagflow_bus::MessageBus;
use tagflow_context::ContextStore;
use tagflow_core::MessageEnvelope;
use tagflow_history::HistoryStore;
use tagflow_poll::PollEngine;
use tracing::{error, warn};
use uuid::Uuid;

use crate::compiler::CompiledFlow;
use crate::context::NodeContext;
use crate::tracer::{ExecutionTracer, RunOutcome, RunSummary, TraceRecord, TraceStatus};

#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    pub timeout: Duration,
    pub max_messages: usize,
    pub stop_on_error: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), max_messages: 100, stop_on_error: false }
    }
}

/// Runs a single compiled flow's node graph starting from one seed message. Runs are independent
/// of each other; within one run, node invocation is sequential and depth-first.
pub struct FlowExecutor {
    poll: Arc<PollEngine>,
    history: Option<Arc<HistoryStore>>,
    bus: Arc<dyn MessageBus>,
    context: Arc<ContextStore>,
    tracer: ExecutionTracer,
}

impl FlowExecutor {
    pub fn new(
        poll: Arc<PollEngine>,
        history: Option<Arc<HistoryStore>>,
        bus: Arc<dyn MessageBus>,
        context: Arc<ContextStore>,
    ) -> Self {
        let tracer = ExecutionTracer::new(bus.clone());
        Self { poll, history, bus, context, tracer }
    }

    pub async fn execute(
        &self,
        compiled: &CompiledFlow,
        start_node_id: &str,
        initial_message: MessageEnvelope,
        options: ExecutorOptions,
    ) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let flow_id = compiled.definition.id.clone();
        let started = Instant::now();
        let started_utc = chrono::Utc::now();

        let trigger_topic = compiled
            .definition
            .nodes
            .iter()
            .find(|n| n.id == start_node_id && n.type_tag == "bus-in")
            .and_then(|n| n.config.get("topic"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let mut queue: VecDeque<(String, MessageEnvelope)> = VecDeque::new();
        queue.push_back((start_node_id.to_string(), initial_message));

        let mut messages_processed = 0usize;
        let mut nodes_run = 0usize;
        let mut error_detail: Option<String> = None;

        let outcome = loop {
            if started.elapsed() >= options.timeout {
                break RunOutcome::TimedOut;
            }
            let Some((node_id, msg)) = queue.pop_front() else {
                break RunOutcome::Success;
            };
            if messages_processed >= options.max_messages {
                break RunOutcome::Limited;
            }
            messages_processed += 1;

            let Some(node) = compiled.nodes.get(&node_id) else {
                warn!(flow_id, node_id, "work item references a node absent from the compiled flow (disabled?)");
                continue;
            };
            let config = compiled.node_config(&node_id).cloned().unwrap_or(serde_json::Value::Null);
            let node_type = compiled
                .definition
                .nodes
                .iter()
                .find(|n| n.id == node_id)
                .map(|n| n.type_tag.clone())
                .unwrap_or_default();

            let node_started = Instant::now();
            let mut ctx =
                NodeContext::new(&flow_id, &node_id, &config, &self.poll, self.history.as_ref(), &self.bus, &self.context);
            let result = node.run(&mut ctx, msg).await;
            let ctx_emitted = ctx.into_emitted();
            nodes_run += 1;

            match result {
                Ok(mut emitted) => {
                    emitted.extend(ctx_emitted);
                    self.tracer
                        .record(
                            &flow_id,
                            TraceRecord {
                                run_id,
                                node_id: node_id.clone(),
                                node_type,
                                status: TraceStatus::Ok,
                                duration_ms: node_started.elapsed().as_millis(),
                                messages_emitted: emitted.len(),
                                error: None,
                                end_utc: chrono::Utc::now(),
                            },
                        )
                        .await;

                    for (port, out_msg) in emitted {
                        if let Some(targets) = compiled.adjacency.get(&node_id).and_then(|by_port| by_port.get(&port))
                        {
                            for (target_node, _target_port) in targets {
                                queue.push_back((target_node.clone(), out_msg.clone()));
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(flow_id, node_id, error = %e, "node failed");
                    error_detail = Some(e.to_string());
                    self.tracer
                        .record(
                            &flow_id,
                            TraceRecord {
                                run_id,
                                node_id: node_id.clone(),
                                node_type,
                                status: TraceStatus::Error,
                                duration_ms: node_started.elapsed().as_millis(),
                                messages_emitted: 0,
                                error: Some(e.to_string()),
                                end_utc: chrono::Utc::now(),
                            },
                        )
                        .await;
                    if options.stop_on_error {
                        break RunOutcome::Failed;
                    }
                }
            }
        };

        self.tracer
            .summary(
                &flow_id,
                RunSummary {
                    run_id,
                    flow_id: flow_id.clone(),
                    flow_name: compiled.definition.name.clone(),
                    trigger_node_id: start_node_id.to_string(),
                    trigger_topic,
                    outcome,
                    nodes_executed: nodes_run,
                    messages_handled: messages_processed,
                    error_detail,
                    duration_ms: started.elapsed().as_millis(),
                    started_utc,
                    completed_utc: chrono::Utc::now(),
                },
            )
            .await;

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::FlowCompiler;
    use crate::registry::NodeRegistry;
    use tagflow_bus::InProcessBus;
    use tagflow_context::ContextStore;
    use tagflow_core::{FlowDefinition, NodeDefinition, WireDefinition};
    use tagflow_drivers::DriverRegistry;

    async fn executor() -> (FlowExecutor, Arc<PollEngine>) {
        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let poll = Arc::new(PollEngine::new(bus.clone(), None, Arc::new(DriverRegistry::new())));
        let path = std::env::temp_dir().join(format!("tagflow-executor-test-{}.json", Uuid::new_v4()));
        let context = Arc::new(ContextStore::load(path).await);
        (FlowExecutor::new(poll.clone(), None, bus, context), poll)
    }

    fn node(id: &str, type_tag: &str) -> NodeDefinition {
        NodeDefinition { id: id.into(), type_tag: type_tag.into(), name: None, config: serde_json::json!({}), disabled: false, position: None }
    }

    #[tokio::test]
    async fn runs_a_linear_chain_to_completion() {
        let mut registry = NodeRegistry::new();
        crate::nodes::trigger::register(&mut registry);
        crate::nodes::transform::register(&mut registry);

        let def = FlowDefinition {
            id: "f1".into(),
            name: "F1".into(),
            enabled: true,
            nodes: vec![node("trig", "manual-trigger"), node("math", "math-add")],
            wires: vec![WireDefinition {
                id: "w1".into(),
                source_node: "trig".into(),
                source_port: "out".into(),
                target_node: "math".into(),
                target_port: "in".into(),
            }],
        };
        let mut compiled_def = def.clone();
        compiled_def.nodes[1].config = serde_json::json!({ "operand": 1.0 });
        let compiled = FlowCompiler::compile(compiled_def, &registry).unwrap();

        let (executor, _poll) = executor().await;
        let outcome = executor
            .execute(&compiled, "trig", MessageEnvelope::new(serde_json::json!(1.0)), ExecutorOptions::default())
            .await;
        assert_eq!(outcome, RunOutcome::Success);
    }

    #[tokio::test]
    async fn message_cap_limits_a_self_feeding_flow() {
        let mut registry = NodeRegistry::new();
        crate::nodes::trigger::register(&mut registry);
        crate::nodes::transform::register(&mut registry);

        let def = FlowDefinition {
            id: "f1".into(),
            name: "F1".into(),
            enabled: true,
            nodes: vec![node("trig", "manual-trigger"), node("math", "math-add")],
            wires: vec![
                WireDefinition {
                    id: "w1".into(),
                    source_node: "trig".into(),
                    source_port: "out".into(),
                    target_node: "math".into(),
                    target_port: "in".into(),
                },
                WireDefinition {
                    id: "w2".into(),
                    source_node: "math".into(),
                    source_port: "out".into(),
                    target_node: "math".into(),
                    target_port: "in".into(),
                },
            ],
        };
        let mut compiled_def = def.clone();
        compiled_def.nodes[1].config = serde_json::json!({ "operand": 1.0 });
        // A self-wire is rejected by the cycle check, so build adjacency by hand for this test
        // instead of going through the compiler's cycle rejection.
        let registry_ref = &registry;
        let mut base = compiled_def.clone();
        base.wires.truncate(1);
        let mut compiled = FlowCompiler::compile(base, registry_ref).unwrap();
        compiled
            .adjacency
            .entry("math".to_string())
            .or_default()
            .entry("out".to_string())
            .or_default()
            .push(("math".to_string(), "in".to_string()));

        let (executor, _poll) = executor().await;
        let outcome = executor
            .execute(
                &compiled,
                "trig",
                MessageEnvelope::new(serde_json::json!(1.0)),
                ExecutorOptions { timeout: Duration::from_secs(5), max_messages: 10, stop_on_error: false },
            )
            .await;
        assert_eq!(outcome, RunOutcome::Limited);
    }
}
