//! Flow compilation and execution: the built-in node palette, `FlowCompiler`/`CompiledFlow`,
//! `FlowExecutor`, live trigger scheduling, and the bus-driven `FlowTriggerRouter`.

mod compiler;
mod context;
mod descriptor;
mod executor;
mod node;
mod nodes;
mod registry;
mod router;
mod script;
mod tracer;
mod trigger_runtime;

use std::sync::Arc;

pub use compiler::{CompiledFlow, FlowCompiler};
pub use context::NodeContext;
pub use descriptor::{NodeDescriptor, NodePort, PortDirection};
pub use executor::{ExecutorOptions, FlowExecutor};
pub use node::{FlowNode, NodeFactory, NodeTypeEntry};
pub use registry::NodeRegistry;
pub use router::FlowTriggerRouter;
pub use script::{DatabaseSink, ScriptHost};
pub use tracer::{ExecutionTracer, RunOutcome, RunSummary, TraceRecord, TraceStatus};
pub use trigger_runtime::TriggerRuntime;

/// Builds a `NodeRegistry` carrying every node type in the built-in palette. `script` is only
/// registered when a `ScriptHost` is supplied (it is a true external collaborator, not an ambient
/// concern); `database-write` is always registered but no-ops with a warning if no `DatabaseSink`
/// is supplied.
pub fn built_in_nodes(
    script_host: Option<Arc<dyn ScriptHost>>,
    database_sink: Option<Arc<dyn DatabaseSink>>,
) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    nodes::trigger::register(&mut registry);
    nodes::io::register(&mut registry);
    nodes::transform::register(&mut registry);
    nodes::aggregate::register(&mut registry);
    nodes::misc::register(&mut registry, script_host, database_sink);
    registry
}
