//! The `MessageBus` contract and the in-process implementation that backs single-node
//! deployments and tests. See `DESIGN.md` for why no network broker client ships in this crate.

mod bus;
mod topic;

pub use bus::{ConnectionEvent, InProcessBus, MessageBus, Qos, Subscription};
pub use topic::{topic_matches, validate_pattern};
