//! Composition root: wires every crate's runtime type together from the four JSON config
//! documents. Each `tagflowctl` subcommand builds the slice of this it needs and tears it down
//! again; only `serve` keeps it alive for the process lifetime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tagflow_bus::{InProcessBus, MessageBus, Qos};
use tagflow_config::ConfigStore;
use tagflow_context::ContextStore;
use tagflow_core::{EngineResult, StateMachineConfig};
use tagflow_drivers::DriverRegistry;
use tagflow_flow::{built_in_nodes, CompiledFlow, FlowCompiler, FlowExecutor, FlowTriggerRouter, TriggerRuntime};
use tagflow_health::HealthMonitor;
use tagflow_history::HistoryStore;
use tagflow_poll::PollEngine;
use tagflow_statemachine::{FlowRunner, StateMachineExecutor};
use tracing::warn;

pub const DEFAULT_CONFIG_DIR: &str = "./config";
pub const DEFAULT_HISTORY_DB: &str = "./data/history.db";

pub fn config_dir_from_env(override_dir: Option<&str>) -> PathBuf {
    override_dir
        .map(PathBuf::from)
        .or_else(|| std::env::var("TAGFLOW_CONFIG_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR))
}

pub fn history_db_from_env(override_path: Option<&str>) -> PathBuf {
    override_path
        .map(PathBuf::from)
        .or_else(|| std::env::var("TAGFLOW_HISTORY_DB").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_DB))
}

/// Triggers a flow by id via its first `manual-trigger` node, falling back to its first trigger
/// node of any kind. Keeps `StateMachineExecutor` decoupled from `tagflow-flow` per the
/// `FlowRunner` seam.
pub struct FlowExecutorRunner {
    executor: Arc<FlowExecutor>,
    flows: Arc<RwLock<HashMap<String, Arc<CompiledFlow>>>>,
}

impl FlowExecutorRunner {
    pub fn new(executor: Arc<FlowExecutor>, flows: Arc<RwLock<HashMap<String, Arc<CompiledFlow>>>>) -> Self {
        Self { executor, flows }
    }
}

impl FlowRunner for FlowExecutorRunner {
    fn trigger_flow(&self, flow_id: &str, source_label: &str) {
        let Some(compiled) = self.flows.read().unwrap().get(flow_id).cloned() else {
            warn!(flow_id, "trigger_flow: no such compiled flow loaded");
            return;
        };
        let Some(node_id) = compiled
            .trigger_node_ids
            .iter()
            .find(|id| compiled.definition.nodes.iter().any(|n| &n.id == *id && n.type_tag == "manual-trigger"))
            .or_else(|| compiled.trigger_node_ids.first())
            .cloned()
        else {
            warn!(flow_id, "trigger_flow: flow has no trigger node to start from");
            return;
        };

        let executor = self.executor.clone();
        let source_label = source_label.to_string();
        tokio::spawn(async move {
            let message = tagflow_core::MessageEnvelope::new(serde_json::json!({ "source": source_label }));
            let outcome = executor.execute(&compiled, &node_id, message, Default::default()).await;
            if !matches!(outcome, tagflow_flow::RunOutcome::Success) {
                warn!(flow_id = %compiled.definition.id, ?outcome, "state-machine-triggered flow run did not complete cleanly");
            }
        });
    }
}

/// Everything `serve` keeps alive; other subcommands build and immediately use a subset.
pub struct Engine {
    pub bus: Arc<dyn MessageBus>,
    pub config_store: Arc<ConfigStore>,
    pub poll: Arc<PollEngine>,
    pub history: Option<Arc<HistoryStore>>,
    pub context: Arc<ContextStore>,
    pub flow_registry: tagflow_flow::NodeRegistry,
    pub flow_executor: Arc<FlowExecutor>,
    pub flows: Arc<RwLock<HashMap<String, Arc<CompiledFlow>>>>,
    pub router: Arc<FlowTriggerRouter>,
    pub trigger_runtime: Arc<TriggerRuntime>,
    pub state_machines: Arc<StateMachineExecutor>,
    pub health: Arc<HealthMonitor>,
}

impl Engine {
    pub async fn build(config_dir: &Path, history_db: &Path) -> EngineResult<Self> {
        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let config_store = Arc::new(ConfigStore::new(config_dir));
        let health = HealthMonitor::new();
        health.watch_bus(&bus);

        let history = match HistoryStore::open(history_db).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "history store unavailable, running without it");
                None
            }
        };

        let driver_registry = Arc::new(DriverRegistry::new());
        let poll = Arc::new(PollEngine::new(bus.clone(), history.as_ref().map(|h| (**h).clone()), driver_registry));
        let connections = config_store.load_connections().await?;
        poll.reload(&connections).await?;
        health.set_poll_engine_running(true);

        let context_path = config_dir.join("internal-tags.json");
        let context = Arc::new(ContextStore::load(context_path).await);

        let flow_registry = built_in_nodes(None, None);
        let flow_executor = Arc::new(FlowExecutor::new(poll.clone(), history.clone(), bus.clone(), context.clone()));
        let flows: Arc<RwLock<HashMap<String, Arc<CompiledFlow>>>> = Arc::new(RwLock::new(HashMap::new()));
        let router = Arc::new(FlowTriggerRouter::new(bus.clone(), flow_executor.clone()));
        let trigger_runtime = Arc::new(TriggerRuntime::new().await?);

        let flow_runner = Arc::new(FlowExecutorRunner::new(flow_executor.clone(), flows.clone()));
        let state_machines = StateMachineExecutor::new(bus.clone(), poll.clone(), None, flow_runner);

        let engine = Self {
            bus,
            config_store,
            poll,
            history,
            context,
            flow_registry,
            flow_executor,
            flows,
            router,
            trigger_runtime,
            state_machines,
            health,
        };
        engine.reload_flows().await?;
        engine.reload_state_machines().await?;
        engine.state_machines.start();
        engine.health.set_config_loaded(true);
        Ok(engine)
    }

    pub async fn reload_connections(&self) -> EngineResult<()> {
        let connections = self.config_store.load_connections().await?;
        self.poll.reload(&connections).await
    }

    pub async fn reload_flows(&self) -> EngineResult<()> {
        let definitions = self.config_store.load_flows().await?;
        let mut compiled = Vec::with_capacity(definitions.len());
        for def in definitions.into_iter().filter(|d| d.enabled) {
            let flow_id = def.id.clone();
            match FlowCompiler::compile(def, &self.flow_registry) {
                Ok(flow) => {
                    self.publish_deploy_status(&flow_id, true, None).await;
                    compiled.push(Arc::new(flow));
                }
                Err(e) => {
                    warn!(error = %e, "failed to compile flow, skipping");
                    self.publish_deploy_status(&flow_id, false, Some(e.to_string())).await;
                }
            }
        }

        self.trigger_runtime.clear().await;
        for flow in &compiled {
            self.trigger_runtime.schedule(flow.clone(), self.flow_executor.clone(), self.bus.clone()).await?;
        }
        self.router.reload(&compiled).await?;

        self.health.set_compiled_flow_count(compiled.len());
        let mut map = self.flows.write().unwrap();
        map.clear();
        for flow in compiled {
            map.insert(flow.definition.id.clone(), flow);
        }
        Ok(())
    }

    async fn publish_deploy_status(&self, flow_id: &str, is_compiled: bool, error_detail: Option<String>) {
        let topic = format!("flows/{flow_id}/deploy-status");
        let payload = serde_json::json!({
            "flowId": flow_id,
            "isCompiled": is_compiled,
            "errorDetail": error_detail,
            "timestamp": chrono::Utc::now(),
        });
        if let Err(e) = self.bus.publish(&topic, payload, Qos::AtLeastOnce, true).await {
            warn!(%topic, error = %e, "failed to publish deploy status");
        }
    }

    pub async fn reload_state_machines(&self) -> EngineResult<()> {
        let configs: Vec<StateMachineConfig> = self.config_store.load_state_machines().await?;
        self.health.set_loaded_state_machine_count(configs.iter().filter(|c| c.enabled).count());
        self.state_machines.reload(&configs)
    }
}
