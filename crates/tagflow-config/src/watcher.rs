use std::path::Path;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tagflow_core::EngineResult;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Which document kind changed, driving the reload hook set in the spec: `connections.json` ->
/// PollEngine reload, `flows.json` -> FlowTriggerRouter + FlowExecutor reload, `state-
/// machines.json` -> StateMachineExecutor reload, anything else -> reload all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadKind {
    Connections,
    Flows,
    StateMachines,
    All,
}

impl ReloadKind {
    fn from_filename(name: &str) -> Self {
        match name {
            "connections.json" => Self::Connections,
            "flows.json" => Self::Flows,
            "state-machines.json" => Self::StateMachines,
            _ => Self::All,
        }
    }
}

/// Watches a config directory for `*.json` writes and emits one debounced [`ReloadKind`] per
/// burst of changes, coalesced over a trailing 500 ms window. The coalescing is implemented with
/// a `tokio::time::sleep` reset on every event rather than `notify`'s own debouncer, so it can be
/// driven and asserted against without real file-system timing in tests.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    pub reloads: mpsc::Receiver<ReloadKind>,
}

impl ConfigWatcher {
    pub fn start(dir: impl AsRef<Path>) -> EngineResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let (raw_tx, raw_rx) = std::sync::mpsc::channel::<Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event);
            }
        })
        .map_err(|e| tagflow_core::EngineError::config(format!("failed to start watcher: {e}")))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| tagflow_core::EngineError::config(format!("failed to watch {dir:?}: {e}")))?;

        let (reload_tx, reload_rx) = mpsc::channel(16);
        spawn_debounce_task(raw_rx, reload_tx);

        Ok(Self { _watcher: watcher, reloads: reload_rx })
    }
}

fn spawn_debounce_task(raw_rx: std::sync::mpsc::Receiver<Event>, reload_tx: mpsc::Sender<ReloadKind>) {
    let (bridge_tx, mut bridge_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(event) = raw_rx.recv() {
            if bridge_tx.send(event).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let mut pending: Option<ReloadKind> = None;
        loop {
            let deadline = tokio::time::sleep(DEBOUNCE);
            tokio::pin!(deadline);
            tokio::select! {
                event = bridge_rx.recv() => {
                    match event {
                        Some(event) => {
                            if let Some(kind) = classify(&event) {
                                debug!(?kind, "config change observed, debounce timer reset");
                                pending = Some(merge(pending, kind));
                            }
                        }
                        None => break,
                    }
                }
                _ = &mut deadline, if pending.is_some() => {
                    if let Some(kind) = pending.take() {
                        if reload_tx.send(kind).await.is_err() {
                            warn!("config reload receiver dropped, stopping watcher task");
                            break;
                        }
                    }
                }
            }
        }
    });
}

fn merge(existing: Option<ReloadKind>, incoming: ReloadKind) -> ReloadKind {
    match existing {
        None => incoming,
        Some(k) if k == incoming => k,
        Some(_) => ReloadKind::All,
    }
}

fn classify(event: &Event) -> Option<ReloadKind> {
    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
        return None;
    }
    event.paths.iter().find_map(|p| {
        if p.extension().map(|e| e == "json").unwrap_or(false) {
            p.file_name().and_then(|n| n.to_str()).map(ReloadKind::from_filename)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};
    use std::path::PathBuf;

    fn event_for(path: &str, kind: EventKind) -> Event {
        Event { kind, paths: vec![PathBuf::from(path)], attrs: Default::default() }
    }

    #[test]
    fn classify_maps_known_filenames() {
        let e = event_for("/cfg/connections.json", EventKind::Modify(ModifyKind::Any));
        assert_eq!(classify(&e), Some(ReloadKind::Connections));

        let e = event_for("/cfg/flows.json", EventKind::Create(CreateKind::Any));
        assert_eq!(classify(&e), Some(ReloadKind::Flows));

        let e = event_for("/cfg/users.json", EventKind::Modify(ModifyKind::Any));
        assert_eq!(classify(&e), Some(ReloadKind::All));
    }

    #[test]
    fn classify_ignores_non_json_and_non_write_events() {
        let e = event_for("/cfg/connections.json.tmp", EventKind::Modify(ModifyKind::Any));
        assert_eq!(classify(&e), None);

        let e = event_for("/cfg/connections.json", EventKind::Remove(notify::event::RemoveKind::Any));
        assert_eq!(classify(&e), None);
    }

    #[test]
    fn merge_escalates_to_all_on_mixed_kinds() {
        assert_eq!(merge(None, ReloadKind::Flows), ReloadKind::Flows);
        assert_eq!(merge(Some(ReloadKind::Flows), ReloadKind::Flows), ReloadKind::Flows);
        assert_eq!(merge(Some(ReloadKind::Flows), ReloadKind::Connections), ReloadKind::All);
    }
}
