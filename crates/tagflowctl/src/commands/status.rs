use std::path::Path;

use anyhow::Result;
use std::sync::Arc;
use tagflow_config::ConfigStore;
use tagflow_drivers::DriverRegistry;
use tagflow_health::HealthMonitor;
use tagflow_poll::PollEngine;

use crate::output::{self, OutputFormat};

/// Builds a poll engine from the current config, lets it run long enough to take one reading per
/// connection, then reports the aggregate `EngineStatus` plus a `HealthMonitor` snapshot. Intended
/// as a quick one-shot check, not a replacement for watching a live `serve` process's own status
/// topic.
pub async fn run(config_dir: &Path, format: &OutputFormat) -> Result<()> {
    let store = ConfigStore::new(config_dir);
    let connections = store.load_connections().await?;
    let flows = store.load_flows().await?;
    let state_machines = store.load_state_machines().await?;

    let bus: Arc<dyn tagflow_bus::MessageBus> = Arc::new(tagflow_bus::InProcessBus::new());
    let health = HealthMonitor::new();
    health.watch_bus(&bus);
    health.set_config_loaded(true);
    health.set_compiled_flow_count(flows.iter().filter(|f| f.enabled).count());
    health.set_loaded_state_machine_count(state_machines.iter().filter(|m| m.enabled).count());

    let poll = Arc::new(PollEngine::new(bus, None, Arc::new(DriverRegistry::new())));
    poll.reload(&connections).await?;
    health.set_poll_engine_running(true);
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let engine_status = poll.status();
    let health_status = health.sample();

    output::render(format, &(engine_status.clone(), health_status.clone()), |_| {
        println!(
            "{} healthy={} connections={} total_polls={} avg_poll_ms={:.2}",
            if health_status.is_healthy { "\u{2713}" } else { "\u{2717}" },
            health_status.is_healthy,
            engine_status.connections.len(),
            engine_status.total_polls,
            engine_status.avg_poll_ms
        );
        let rows = engine_status
            .connections
            .iter()
            .map(|c| vec![c.connection_id.clone(), c.circuit_open.to_string()])
            .collect();
        println!("{}", output::table(&["connection_id", "circuit_open"], rows));
    });
    Ok(())
}
