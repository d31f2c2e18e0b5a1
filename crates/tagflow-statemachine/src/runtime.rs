use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tagflow_core::StateMachineConfig;

const AUDIT_CAP: usize = 80;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub from_state_id: String,
    pub from_state_name: String,
    pub to_state_id: String,
    pub to_state_name: String,
    pub trigger: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSnapshot {
    pub id: String,
    pub now_state_id: String,
    pub now_state_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_state_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_state_name: Option<String>,
    pub last_change_utc: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_trigger: Option<String>,
    pub was_successful: bool,
    pub audit: Vec<AuditEntry>,
}

struct MutableState {
    current: String,
    previous: Option<String>,
    last_change: DateTime<Utc>,
    recent_trigger: Option<String>,
    outcome: bool,
    audit: VecDeque<AuditEntry>,
}

/// One loaded state machine: its immutable config plus the mutable runtime state (current state,
/// audit trail). Transitions are serialized per machine via `transition_lock`, held across the
/// async action phases so two transitions on the same machine can never interleave.
pub struct MachineRuntime {
    pub config: StateMachineConfig,
    state: Mutex<MutableState>,
    pub transition_lock: tokio::sync::Mutex<()>,
}

impl MachineRuntime {
    pub fn new(config: StateMachineConfig) -> Option<Self> {
        let initial = config.initial_state()?.to_string();
        Some(Self {
            config,
            state: Mutex::new(MutableState {
                current: initial,
                previous: None,
                last_change: Utc::now(),
                recent_trigger: None,
                outcome: true,
                audit: VecDeque::new(),
            }),
            transition_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn current_state(&self) -> String {
        self.state.lock().current.clone()
    }

    /// Looks up a state's display name by id, falling back to the id itself if the config was
    /// edited and no longer names it (shouldn't happen for a validated config).
    fn state_name(&self, state_id: &str) -> String {
        self.config
            .states
            .iter()
            .find(|s| s.id == state_id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| state_id.to_string())
    }

    /// Atomically records the state change: old becomes "previous", target becomes current, the
    /// change timestamp and trigger label update, and an audit entry is appended (dropping the
    /// oldest once the trail exceeds 80 entries).
    pub fn apply_transition(&self, to_state: &str, trigger_label: &str) {
        let mut state = self.state.lock();
        let from = std::mem::replace(&mut state.current, to_state.to_string());
        state.previous = Some(from.clone());
        state.last_change = Utc::now();
        state.recent_trigger = Some(trigger_label.to_string());
        state.outcome = true;
        state.audit.push_back(AuditEntry {
            from_state_name: self.state_name(&from),
            from_state_id: from,
            to_state_name: self.state_name(to_state),
            to_state_id: to_state.to_string(),
            trigger: trigger_label.to_string(),
            timestamp: state.last_change,
        });
        while state.audit.len() > AUDIT_CAP {
            state.audit.pop_front();
        }
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        let state = self.state.lock();
        MachineSnapshot {
            id: self.config.id.clone(),
            now_state_name: self.state_name(&state.current),
            now_state_id: state.current.clone(),
            before_state_name: state.previous.as_deref().map(|s| self.state_name(s)),
            before_state_id: state.previous.clone(),
            last_change_utc: state.last_change,
            recent_trigger: state.recent_trigger.clone(),
            was_successful: state.outcome,
            audit: state.audit.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagflow_core::State;

    fn config() -> StateMachineConfig {
        StateMachineConfig {
            id: "m1".into(),
            name: "M1".into(),
            enabled: true,
            states: vec![
                State { id: "idle".into(), name: "Idle".into(), is_initial: Some(true), on_enter: Default::default(), on_exit: Default::default() },
                State { id: "running".into(), name: "Running".into(), is_initial: None, on_enter: Default::default(), on_exit: Default::default() },
            ],
            initial_state_id: None,
            transitions: vec![],
        }
    }

    #[test]
    fn apply_transition_updates_current_and_audit() {
        let runtime = MachineRuntime::new(config()).unwrap();
        assert_eq!(runtime.current_state(), "idle");
        runtime.apply_transition("running", "start");
        assert_eq!(runtime.current_state(), "running");
        let snapshot = runtime.snapshot();
        assert_eq!(snapshot.before_state_id, Some("idle".to_string()));
        assert_eq!(snapshot.before_state_name, Some("Idle".to_string()));
        assert_eq!(snapshot.now_state_name, "Running");
        assert_eq!(snapshot.audit.len(), 1);
    }

    #[test]
    fn audit_trail_caps_at_eighty_entries() {
        let runtime = MachineRuntime::new(config()).unwrap();
        for i in 0..100 {
            let target = if i % 2 == 0 { "running" } else { "idle" };
            runtime.apply_transition(target, "toggle");
        }
        assert_eq!(runtime.snapshot().audit.len(), 80);
    }
}
