use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tagflow_config::{ConfigWatcher, ReloadKind};
use tracing::{error, info, warn};

use crate::engine::Engine;

/// Runs the engine until SIGINT/SIGTERM. Logs the health summary every 30s (see `tagflow-health`)
/// and re-applies the matching subsystem reload whenever `ConfigWatcher` reports a config document
/// changed on disk.
pub async fn run(config_dir: &Path, history_db: &Path) -> Result<()> {
    let engine = Arc::new(Engine::build(config_dir, history_db).await?);
    engine.health.spawn_summary_log();

    let mut watcher = match ConfigWatcher::start(config_dir) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!(error = %e, "config watcher unavailable, live reload disabled");
            None
        }
    };

    info!(
        config_dir = %config_dir.display(),
        history_db = %history_db.display(),
        "tagflow engine started"
    );

    if let Some(watcher) = &mut watcher {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                reload = watcher.reloads.recv() => {
                    match reload {
                        Some(kind) => apply_reload(&engine, kind).await,
                        None => break,
                    }
                }
            }
        }
    } else {
        tokio::signal::ctrl_c().await?;
    }

    info!("shutdown signal received, stopping engine");
    engine.trigger_runtime.shutdown().await;
    engine.state_machines.shutdown().await;
    if let Some(history) = &engine.history {
        history.shutdown().await;
    }
    if let Err(e) = engine.context.flush().await {
        warn!(error = %e, "final context flush failed");
    }
    Ok(())
}

async fn apply_reload(engine: &Arc<Engine>, kind: ReloadKind) {
    info!(?kind, "config change detected, reloading");
    let result = match kind {
        ReloadKind::Connections => engine.reload_connections().await,
        ReloadKind::Flows => engine.reload_flows().await,
        ReloadKind::StateMachines => engine.reload_state_machines().await,
        ReloadKind::All => {
            let a = engine.reload_connections().await;
            let b = engine.reload_flows().await;
            let c = engine.reload_state_machines().await;
            a.and(b).and(c)
        }
    };
    if let Err(e) = result {
        error!(error = %e, ?kind, "reload failed");
    }
}
