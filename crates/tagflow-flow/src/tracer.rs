use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tagflow_bus::{MessageBus, Qos};
use uuid::Uuid;

/// Outcome of a single node invocation within a run, mirrored onto the bus so UIs can render a
/// live execution trace.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub run_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    pub status: TraceStatus,
    pub duration_ms: u128,
    pub messages_emitted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub end_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TraceStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Success,
    Failed,
    TimedOut,
    Limited,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub flow_id: String,
    pub flow_name: String,
    pub trigger_node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_topic: Option<String>,
    pub outcome: RunOutcome,
    pub nodes_executed: usize,
    pub messages_handled: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub duration_ms: u128,
    pub started_utc: DateTime<Utc>,
    pub completed_utc: DateTime<Utc>,
}

/// Publishes one bus message per trace record plus a run-summary at the end of a run.
pub struct ExecutionTracer {
    bus: Arc<dyn MessageBus>,
}

impl ExecutionTracer {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    pub async fn record(&self, flow_id: &str, record: TraceRecord) {
        let topic = format!("flows/{flow_id}/execution");
        if let Ok(payload) = serde_json::to_value(&record) {
            let _ = self.bus.publish(&topic, payload, Qos::AtMostOnce, false).await;
        }
    }

    pub async fn summary(&self, flow_id: &str, summary: RunSummary) {
        let topic = format!("flows/{flow_id}/run-summary");
        if let Ok(payload) = serde_json::to_value(&summary) {
            let _ = self.bus.publish(&topic, payload, Qos::AtMostOnce, false).await;
        }
    }
}

pub fn as_millis(d: Duration) -> u128 {
    d.as_millis()
}
