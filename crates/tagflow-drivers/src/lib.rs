//! The `Driver` trait, the `DriverRegistry` of driver-type factories, the built-in `simulator`
//! driver, and stub drivers for protocols out of scope for this runtime.

mod driver;
mod registry;
mod simulator;
mod stub;

pub use driver::{Driver, DriverFactory};
pub use registry::DriverRegistry;
pub use simulator::SimulatorDriver;
pub use stub::StubDriver;
