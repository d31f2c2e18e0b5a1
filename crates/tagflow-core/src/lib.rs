//! Shared data model, error types, and the generic `Registry<T>` trait used across every
//! tagflow Engine crate.

pub mod error;
pub mod flow;
pub mod message;
pub mod model;
pub mod registry;
pub mod script;
pub mod statemachine;

pub use error::{EngineError, EngineResult};
pub use flow::{FlowDefinition, NodeDefinition, WireDefinition};
pub use message::{ContextScope, InternalTagValue, MessageEnvelope, ScopedKey};
pub use model::{
    ConnectionConfig, DataType, Quality, SimulatorParams, TagConfig, TagValue, Value, Waveform,
};
pub use registry::{MapRegistry, Registry};
pub use script::ScriptHost;
pub use statemachine::{
    ComparisonOp, State, StateActions, StateMachineConfig, TagAction, TagTrigger, Transition,
};
