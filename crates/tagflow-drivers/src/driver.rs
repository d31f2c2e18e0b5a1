use std::collections::HashMap;

use async_trait::async_trait;
use tagflow_core::{ConnectionConfig, EngineResult, TagConfig, TagValue, Value};

/// A device driver. Implementations must tolerate one concurrent reader and one concurrent
/// writer; any internal parallelism beyond that is the driver's own choice.
#[async_trait]
pub trait Driver: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn connect(&mut self, config: &ConnectionConfig) -> EngineResult<()>;
    async fn disconnect(&mut self) -> EngineResult<()>;
    async fn read_tags(&self, tags: &[TagConfig]) -> EngineResult<HashMap<String, TagValue>>;
    async fn write_tag(&self, tag: &TagConfig, value: Value) -> EngineResult<()>;
}

/// A factory that constructs a fresh `Driver` instance for a connection's driver-type tag,
/// mirroring the factory-function pattern this codebase already uses to keep node-type registries
/// free of reflection.
pub type DriverFactory = Box<dyn Fn() -> Box<dyn Driver> + Send + Sync>;
