use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tagflow_bus::{MessageBus, Qos};
use tagflow_core::{EngineError, EngineResult, ScriptHost, StateActions, StateMachineConfig, TagAction, Transition, Value};
use tagflow_poll::PollEngine;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::flow_runner::FlowRunner;
use crate::runtime::MachineRuntime;

const SCAN_INTERVAL: Duration = Duration::from_millis(500);

/// Runs the periodic condition scan and exposes `fire_event` for event-driven transitions. Holds
/// no direct dependency on flow execution beyond the narrow `FlowRunner` trait.
pub struct StateMachineExecutor {
    bus: Arc<dyn MessageBus>,
    poll: Arc<PollEngine>,
    script_host: Option<Arc<dyn ScriptHost>>,
    flow_runner: Arc<dyn FlowRunner>,
    machines: ArcSwap<HashMap<String, Arc<MachineRuntime>>>,
    scan_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StateMachineExecutor {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        poll: Arc<PollEngine>,
        script_host: Option<Arc<dyn ScriptHost>>,
        flow_runner: Arc<dyn FlowRunner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            poll,
            script_host,
            flow_runner,
            machines: ArcSwap::from_pointee(HashMap::new()),
            scan_task: tokio::sync::Mutex::new(None),
        })
    }

    /// Validates every config, builds a fresh runtime for each, and atomically replaces the
    /// runtime map. In-flight transitions on the previous map's `Arc<MachineRuntime>`s complete on
    /// their own since the old map stays alive until every clone of it is dropped.
    pub fn reload(&self, configs: &[StateMachineConfig]) -> EngineResult<()> {
        let mut next = HashMap::new();
        for config in configs.iter().filter(|c| c.enabled) {
            config.validate()?;
            let runtime = MachineRuntime::new(config.clone())
                .ok_or_else(|| EngineError::config(format!("state machine {:?} has no resolvable initial state", config.id)))?;
            next.insert(config.id.clone(), Arc::new(runtime));
        }
        self.machines.store(Arc::new(next));
        Ok(())
    }

    /// Starts the 500 ms scan loop. Idempotent only in the sense that calling it twice leaks a
    /// second loop; the composition root calls it once at startup.
    pub fn start(self: &Arc<Self>) {
        let executor = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SCAN_INTERVAL);
            loop {
                ticker.tick().await;
                executor.scan_once().await;
            }
        });
        if let Some(mut slot) = self.scan_task.try_lock().ok() {
            *slot = Some(handle);
        }
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.scan_task.lock().await.take() {
            handle.abort();
        }
    }

    async fn scan_once(&self) {
        let machines = self.machines.load_full();
        for machine in machines.values() {
            let current = machine.current_state();
            let mut candidates: Vec<&Transition> = machine
                .config
                .transitions
                .iter()
                .filter(|t| t.from_state == current && t.event.is_none())
                .collect();
            candidates.sort_by_key(|t| t.priority);

            for transition in candidates {
                if self.evaluate_scan_condition(transition).await {
                    self.execute_transition(machine, transition, "scan").await;
                    break;
                }
            }
        }
    }

    async fn evaluate_scan_condition(&self, transition: &Transition) -> bool {
        if let Some(script) = &transition.script_condition {
            if let Some(host) = &self.script_host {
                return match host.evaluate_condition(script, serde_json::json!({})).await {
                    Ok(truthy) => truthy,
                    Err(e) => {
                        warn!(transition = %transition.id, error = %e, "script condition evaluation failed");
                        false
                    }
                };
            }
            return false;
        }
        if let Some(trigger) = &transition.tag_trigger {
            return self.resolve_tag(&trigger.tag_path).map(|v| trigger.evaluate(&v)).unwrap_or(false);
        }
        false
    }

    /// Selects transitions from the current state whose `event` matches, in priority order; for
    /// each, a structured `TagTrigger` (if present) must also pass, and the legacy condition looks
    /// up `key` in `context` (missing or non-boolean defaults to true). Fires the first match.
    pub async fn fire_event(&self, machine_id: &str, event_name: &str, context: &HashMap<String, Value>) -> EngineResult<bool> {
        let machines = self.machines.load_full();
        let machine = machines
            .get(machine_id)
            .ok_or_else(|| EngineError::config(format!("unknown state machine {machine_id:?}")))?
            .clone();

        let current = machine.current_state();
        let mut candidates: Vec<&Transition> = machine
            .config
            .transitions
            .iter()
            .filter(|t| t.from_state == current && t.event.as_deref() == Some(event_name))
            .collect();
        candidates.sort_by_key(|t| t.priority);

        for transition in candidates {
            let tag_ok = match &transition.tag_trigger {
                Some(trigger) => self.resolve_tag(&trigger.tag_path).map(|v| trigger.evaluate(&v)).unwrap_or(false),
                None => true,
            };
            if !tag_ok {
                continue;
            }
            let legacy_ok = match &transition.legacy_condition {
                Some(key) => match context.get(key) {
                    Some(Value::Bool(b)) => *b,
                    _ => true,
                },
                None => true,
            };
            if !legacy_ok {
                continue;
            }
            self.execute_transition(&machine, transition, event_name).await;
            return Ok(true);
        }
        Ok(false)
    }

    fn resolve_tag(&self, tag_path: &str) -> Option<Value> {
        let (connection_id, tag_id) = tag_path.split_once('/')?;
        self.poll.current_value(connection_id, tag_id).map(|v| v.value)
    }

    /// The five-phase transition: source `OnExit`, transition actions, the atomic state change,
    /// destination `OnEnter`, then the bus snapshot. Serialized per machine by `transition_lock`,
    /// held across every `.await` in this method.
    async fn execute_transition(&self, machine: &Arc<MachineRuntime>, transition: &Transition, trigger_label: &str) {
        let _guard = machine.transition_lock.lock().await;

        if let Some(from_state) = machine.config.states.iter().find(|s| s.id == transition.from_state) {
            self.run_state_actions(&from_state.on_exit).await;
        }

        self.run_tag_actions(&transition.tag_actions).await;
        if let Some(script) = &transition.script_action {
            self.run_script(script).await;
        }
        for flow_id in &transition.flow_ids {
            self.flow_runner.trigger_flow(flow_id, trigger_label);
        }

        machine.apply_transition(&transition.to_state, trigger_label);

        if let Some(to_state) = machine.config.states.iter().find(|s| s.id == transition.to_state) {
            self.run_state_actions(&to_state.on_enter).await;
        }

        let snapshot = machine.snapshot();
        let topic = format!("statemachines/{}/state", machine.config.id);
        if let Ok(payload) = serde_json::to_value(&snapshot) {
            let _ = self.bus.publish(&topic, payload, Qos::AtMostOnce, true).await;
        }
    }

    async fn run_state_actions(&self, actions: &StateActions) {
        self.run_tag_actions(&actions.tag_writes).await;
        if let Some(script) = &actions.script {
            self.run_script(script).await;
        }
        for flow_id in &actions.flow_ids {
            self.flow_runner.trigger_flow(flow_id, "state-action");
        }
    }

    /// Parallel writes, fire-and-forget: failures are logged and never revert the state change or
    /// block the remaining action phases.
    async fn run_tag_actions(&self, actions: &[TagAction]) {
        let writes = actions.iter().map(|action| async move {
            let Some((connection_id, tag_id)) = action.tag_path.split_once('/') else {
                warn!(tag_path = %action.tag_path, "tag action path is not connection/tag");
                return;
            };
            let value = Value::parse_loose(&action.value);
            if let Err(e) = self.poll.write_tag(connection_id, tag_id, value).await {
                error!(tag_path = %action.tag_path, error = %e, "state machine tag action failed");
            }
        });
        futures::future::join_all(writes).await;
    }

    async fn run_script(&self, source: &str) {
        if let Some(host) = &self.script_host {
            if let Err(e) = host.execute(source, serde_json::json!({})).await {
                error!(error = %e, "state machine script action failed");
            }
        } else {
            warn!("state machine script action present but no ScriptHost configured");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use tagflow_bus::InProcessBus;
    use tagflow_core::{ConnectionConfig, DataType, State, StateActions, TagConfig, Value};
    use tagflow_drivers::DriverRegistry;

    use super::*;

    struct NoopFlowRunner;
    impl FlowRunner for NoopFlowRunner {
        fn trigger_flow(&self, _flow_id: &str, _source_label: &str) {}
    }

    fn two_state_config(transition: Transition) -> StateMachineConfig {
        StateMachineConfig {
            id: "m1".into(),
            name: "M1".into(),
            enabled: true,
            states: vec![
                State { id: "idle".into(), name: "Idle".into(), is_initial: Some(true), on_enter: StateActions::default(), on_exit: StateActions::default() },
                State { id: "running".into(), name: "Running".into(), is_initial: None, on_enter: StateActions::default(), on_exit: StateActions::default() },
            ],
            initial_state_id: None,
            transitions: vec![transition],
        }
    }

    async fn executor() -> Arc<StateMachineExecutor> {
        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let poll = Arc::new(PollEngine::new(bus.clone(), None, Arc::new(DriverRegistry::new())));
        StateMachineExecutor::new(bus, poll, None, Arc::new(NoopFlowRunner))
    }

    #[tokio::test]
    async fn fire_event_with_legacy_condition_transitions_state() {
        let transition = Transition {
            id: "t1".into(),
            from_state: "idle".into(),
            to_state: "running".into(),
            event: Some("start".into()),
            priority: 0,
            tag_trigger: None,
            script_condition: None,
            legacy_condition: Some("ready".into()),
            script_action: None,
            tag_actions: vec![],
            flow_ids: vec![],
        };
        let executor = executor().await;
        executor.reload(&[two_state_config(transition)]).unwrap();

        let mut ctx = HashMap::new();
        ctx.insert("ready".to_string(), Value::Bool(false));
        assert!(!executor.fire_event("m1", "start", &ctx).await.unwrap());

        ctx.insert("ready".to_string(), Value::Bool(true));
        assert!(executor.fire_event("m1", "start", &ctx).await.unwrap());

        let machines = executor.machines.load_full();
        assert_eq!(machines.get("m1").unwrap().current_state(), "running");
    }

    #[tokio::test]
    async fn scan_loop_fires_tag_trigger_transition() {
        let transition = Transition {
            id: "t1".into(),
            from_state: "idle".into(),
            to_state: "running".into(),
            event: None,
            priority: 0,
            tag_trigger: Some(tagflow_core::TagTrigger {
                tag_path: "sim/t1".into(),
                op: tagflow_core::ComparisonOp::Gt,
                threshold: "0".into(),
            }),
            script_condition: None,
            legacy_condition: None,
            script_action: None,
            tag_actions: vec![],
            flow_ids: vec![],
        };
        let executor = executor().await;
        executor.reload(&[two_state_config(transition)]).unwrap();

        let conn = ConnectionConfig {
            id: "sim".into(),
            name: "sim".into(),
            driver_type: "simulator".into(),
            enabled: true,
            tags: vec![TagConfig {
                id: "t1".into(),
                name: "t1".into(),
                address: "t1".into(),
                data_type: DataType::F64,
                poll_rate_ms: 10,
                unit: None,
                description: None,
                scale: None,
                offset: None,
                log_history: false,
                simulator: Some(tagflow_core::SimulatorParams {
                    waveform: tagflow_core::Waveform::Ramp,
                    base: 10.0,
                    amplitude: 5.0,
                    period: 60.0,
                    noise: 0.0,
                }),
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        executor.poll.reload(&[conn]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        executor.scan_once().await;

        let machines = executor.machines.load_full();
        assert_eq!(machines.get("m1").unwrap().current_state(), "running");
    }
}
