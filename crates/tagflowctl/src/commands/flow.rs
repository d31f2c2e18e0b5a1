use std::path::Path;

use anyhow::{Context, Result};
use tagflow_config::ConfigStore;
use tagflow_core::{FlowDefinition, MessageEnvelope};
use tagflow_drivers::DriverRegistry;
use tagflow_flow::{built_in_nodes, ExecutorOptions, FlowCompiler, FlowExecutor};
use tagflow_poll::PollEngine;
use std::sync::Arc;

use crate::output::{self, OutputFormat};

pub async fn list(config_dir: &Path, format: &OutputFormat) -> Result<()> {
    let store = ConfigStore::new(config_dir);
    let flows = store.load_flows().await?;
    output::render(format, &flows, |flows| {
        let rows = flows
            .iter()
            .map(|f| vec![f.id.clone(), f.name.clone(), f.enabled.to_string(), f.nodes.len().to_string(), f.wires.len().to_string()])
            .collect();
        println!("{}", output::table(&["id", "name", "enabled", "nodes", "wires"], rows));
    });
    Ok(())
}

pub async fn deploy(config_dir: &Path, file: &str) -> Result<()> {
    let body = tokio::fs::read(file).await.with_context(|| format!("reading {file}"))?;
    let def: FlowDefinition = serde_json::from_slice(&body).with_context(|| format!("parsing {file} as a FlowDefinition"))?;
    def.validate_structure()?;

    let registry = built_in_nodes(None, None);
    FlowCompiler::compile(def.clone(), &registry).context("flow does not compile")?;

    let store = ConfigStore::new(config_dir);
    let mut flows = store.load_flows().await?;
    flows.retain(|f| f.id != def.id);
    flows.push(def.clone());
    store.save_flows(&flows).await?;

    output::success(format!("deployed flow {:?} ({} nodes, {} wires)", def.id, def.nodes.len(), def.wires.len()));
    Ok(())
}

/// A one-shot flow run: builds just enough of the engine (poll engine over the configured
/// connections, a bare `FlowExecutor`) to execute the named flow once from its first trigger
/// node, then exits. Does not start the trigger runtime or router — this is for manual testing,
/// not for serving live triggers.
pub async fn run(config_dir: &Path, history_db: &Path, flow_id: &str, payload: Option<String>) -> Result<()> {
    let store = ConfigStore::new(config_dir);
    let definitions = store.load_flows().await?;
    let def = definitions.into_iter().find(|f| f.id == flow_id).ok_or_else(|| anyhow::anyhow!("no such flow {flow_id:?}"))?;

    let registry = built_in_nodes(None, None);
    let compiled = FlowCompiler::compile(def, &registry)?;
    let Some(node_id) = compiled.trigger_node_ids.first().cloned() else {
        anyhow::bail!("flow {flow_id:?} has no trigger node to start from");
    };

    let bus: Arc<dyn tagflow_bus::MessageBus> = Arc::new(tagflow_bus::InProcessBus::new());
    let history = tagflow_history::HistoryStore::open(history_db).await.ok();
    let poll = Arc::new(PollEngine::new(bus.clone(), history.clone(), Arc::new(DriverRegistry::new())));
    let connections = store.load_connections().await?;
    poll.reload(&connections).await?;

    let context_path = config_dir.join("internal-tags.json");
    let context = Arc::new(tagflow_context::ContextStore::load(context_path).await);
    let executor = FlowExecutor::new(poll, history.map(Arc::new), bus, context);

    let payload = payload.map(|p| serde_json::from_str(&p)).transpose()?.unwrap_or(serde_json::json!({}));
    let outcome = executor.execute(&compiled, &node_id, MessageEnvelope::new(payload), ExecutorOptions::default()).await;
    output::success(format!("flow {flow_id:?} run outcome: {outcome:?}"));
    Ok(())
}
