use std::path::Path;

use anyhow::Result;
use tagflow_config::ConfigStore;

use crate::output;

pub async fn validate(config_dir: &Path) -> Result<()> {
    let store = ConfigStore::new(config_dir);
    let connections = store.load_connections().await?;
    let flows = store.load_flows().await?;
    let state_machines = store.load_state_machines().await?;

    let mut errors = Vec::new();
    for conn in &connections {
        if let Err(e) = conn.validate() {
            errors.push(format!("connection {:?}: {e}", conn.id));
        }
    }
    for flow in &flows {
        if let Err(e) = flow.validate_structure() {
            errors.push(format!("flow {:?}: {e}", flow.id));
        }
    }
    for machine in &state_machines {
        if let Err(e) = machine.validate() {
            errors.push(format!("state machine {:?}: {e}", machine.id));
        }
    }

    if errors.is_empty() {
        output::success(format!(
            "{} connections, {} flows, {} state machines all valid",
            connections.len(),
            flows.len(),
            state_machines.len()
        ));
        Ok(())
    } else {
        for e in &errors {
            output::failure(e);
        }
        anyhow::bail!("{} config error(s) found", errors.len());
    }
}

/// Re-reads each document and writes it back in normalized form (stable key order, defaults
/// filled in). A running `serve` process picks this up on its own via `ConfigWatcher`; this
/// subcommand exists for operators editing documents by hand.
pub async fn reload(config_dir: &Path) -> Result<()> {
    let store = ConfigStore::new(config_dir);
    let connections = store.load_connections().await?;
    store.save_connections(&connections).await?;
    let flows = store.load_flows().await?;
    store.save_flows(&flows).await?;
    let state_machines = store.load_state_machines().await?;
    store.save_state_machines(&state_machines).await?;
    output::success("config documents re-saved in normalized form");
    Ok(())
}
