/// The only thing `StateMachineExecutor` depends on to trigger a flow run. Kept as a narrow,
/// synchronous, fire-and-forget trait rather than an `Arc<FlowExecutor>` so this crate never
/// depends on `tagflow-flow` — the composition root wires a concrete implementation in after both
/// executors are constructed, avoiding a bidirectional dependency between flow and state-machine
/// execution.
pub trait FlowRunner: Send + Sync {
    fn trigger_flow(&self, flow_id: &str, source_label: &str);
}
