use chrono::{DateTime, Utc};
use serde::Serialize;

/// Published on `engine/status` every 5s and returned by `tagflowctl status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub is_running: bool,
    pub active_connections: usize,
    pub active_tags: usize,
    pub total_polls: u64,
    pub average_poll_time_ms: f64,
    pub start_time: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub connections: Vec<ConnectionStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connection_id: String,
    pub circuit_open: bool,
}
