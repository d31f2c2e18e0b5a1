mod executor;
mod flow_runner;
mod runtime;

pub use executor::StateMachineExecutor;
pub use flow_runner::FlowRunner;
pub use runtime::{AuditEntry, MachineRuntime, MachineSnapshot};
