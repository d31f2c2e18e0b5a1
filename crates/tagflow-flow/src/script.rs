use async_trait::async_trait;
use tagflow_core::EngineResult;

pub use tagflow_core::ScriptHost;

/// External collaborator for the `database-write` node. No database client is vendored for
/// arbitrary external databases (only the embedded `HistoryStore` ships with this crate); the
/// embedding application supplies a sink if it wants this node type to do anything.
#[async_trait]
pub trait DatabaseSink: Send + Sync {
    async fn write(&self, table: &str, row: serde_json::Value) -> EngineResult<()>;
}
