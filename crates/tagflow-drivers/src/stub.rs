use std::collections::HashMap;

use async_trait::async_trait;
use tagflow_core::{ConnectionConfig, EngineError, EngineResult, TagConfig, TagValue, Value};

use crate::driver::Driver;

/// A placeholder for a real-world protocol driver (Modbus/OPC-UA/S7/EtherNet-IP) that is out of
/// scope for this runtime. `connect` always fails with a `Config` error naming the missing
/// integration, so the driver registry's shape stays real without implementing network protocols.
pub struct StubDriver {
    type_tag: String,
}

impl StubDriver {
    pub fn new(type_tag: String) -> Self {
        Self { type_tag }
    }
}

#[async_trait]
impl Driver for StubDriver {
    fn is_connected(&self) -> bool {
        false
    }

    async fn connect(&mut self, _config: &ConnectionConfig) -> EngineResult<()> {
        Err(EngineError::config(format!(
            "driver {:?} is not implemented in this build",
            self.type_tag
        )))
    }

    async fn disconnect(&mut self) -> EngineResult<()> {
        Ok(())
    }

    async fn read_tags(&self, _tags: &[TagConfig]) -> EngineResult<HashMap<String, TagValue>> {
        Err(EngineError::config(format!("driver {:?} is not connected", self.type_tag)))
    }

    async fn write_tag(&self, _tag: &TagConfig, _value: Value) -> EngineResult<()> {
        Err(EngineError::config(format!("driver {:?} is not connected", self.type_tag)))
    }
}
