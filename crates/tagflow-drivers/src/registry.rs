use std::collections::HashMap;

use tagflow_core::{EngineError, EngineResult};

use crate::driver::{Driver, DriverFactory};

/// Type-tag -> driver factory registry. `simulator` is the only built-in driver with a working
/// factory; `modbus-tcp`, `opc-ua`, `s7`, `ethernet-ip` register stub factories whose `connect`
/// always fails, keeping the registry's shape real while the integrations themselves stay out of
/// scope.
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        let mut registry = Self { factories: HashMap::new() };
        registry.register("simulator", Box::new(|| Box::new(crate::simulator::SimulatorDriver::new())));
        for stub in ["modbus-tcp", "opc-ua", "s7", "ethernet-ip"] {
            let name = stub.to_string();
            registry.register(
                stub,
                Box::new(move || Box::new(crate::stub::StubDriver::new(name.clone()))),
            );
        }
        registry
    }

    pub fn register(&mut self, type_tag: &str, factory: DriverFactory) {
        self.factories.insert(type_tag.to_string(), factory);
    }

    pub fn create(&self, type_tag: &str) -> EngineResult<Box<dyn Driver>> {
        self.factories
            .get(type_tag)
            .map(|f| f())
            .ok_or_else(|| EngineError::config(format!("unknown driver type {type_tag:?}")))
    }

    pub fn count(&self) -> usize {
        self.factories.len()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_known_driver_types() {
        let registry = DriverRegistry::new();
        assert!(registry.create("simulator").is_ok());
        assert!(registry.create("modbus-tcp").is_ok());
    }

    #[test]
    fn rejects_unknown_driver_type() {
        let registry = DriverRegistry::new();
        assert!(registry.create("made-up").is_err());
    }
}
