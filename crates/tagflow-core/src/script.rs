use async_trait::async_trait;

use crate::error::EngineResult;

/// External collaborator that evaluates user scripts, shared by the flow executor's `script` node
/// and the state-machine executor's script conditions/actions. No scripting engine is vendored
/// into this workspace; the embedding application supplies an implementation (e.g. backed by
/// `rquickjs`).
#[async_trait]
pub trait ScriptHost: Send + Sync {
    async fn validate(&self, source: &str) -> EngineResult<()>;
    async fn execute(&self, source: &str, payload: serde_json::Value) -> EngineResult<serde_json::Value>;
    async fn evaluate_condition(&self, source: &str, context: serde_json::Value) -> EngineResult<bool>;
}
