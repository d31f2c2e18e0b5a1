use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tagflow_bus::{MessageBus, Qos};
use tagflow_core::{ConnectionConfig, EngineError, EngineResult, TagValue, Value};
use tagflow_drivers::DriverRegistry;
use tagflow_history::{HistoryRecord, HistoryStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::poller::{ConnectionPoller, PollEvent};
use crate::status::{ConnectionStatus, EngineStatus};

const STATUS_INTERVAL: Duration = Duration::from_secs(5);
const EVENT_CHANNEL_CAPACITY: usize = 1_024;

/// `tags/<connId>/bulk` payload, per §6's `BulkTagValueMessage`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkTagValueMessage {
    connection_id: String,
    timestamp: DateTime<Utc>,
    tags: Vec<BulkTagEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkTagEntry {
    connection_id: String,
    tag_id: String,
    tag_name: String,
    value: Value,
    data_type: tagflow_core::DataType,
    quality: tagflow_core::Quality,
    timestamp: DateTime<Utc>,
}

/// `status/<connId>` payload. `state` serializes as its bare variant name (`"Connected"` /
/// `"Error"`), matching the spec's `state=Error`/`state=Connected` scenario wording.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionStatusMessage {
    connection_id: String,
    state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
enum ConnectionState {
    Connected,
    Error,
}

/// Owns one `ConnectionPoller` per enabled connection, aggregates their readings into a
/// current-value cache, publishes bulk tag messages and the periodic `engine/status` summary,
/// and feeds the `HistoryStore`.
pub struct PollEngine {
    bus: Arc<dyn MessageBus>,
    history: Option<HistoryStore>,
    driver_registry: Arc<DriverRegistry>,
    pollers: Arc<DashMap<String, Arc<ConnectionPoller>>>,
    current_values: Arc<DashMap<String, TagValue>>,
    events_tx: mpsc::Sender<PollEvent>,
    total_polls: Arc<AtomicU64>,
    total_time_ms: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    start_time: DateTime<Utc>,
    aggregator: JoinHandle<()>,
    status_task: JoinHandle<()>,
}

impl PollEngine {
    pub fn new(bus: Arc<dyn MessageBus>, history: Option<HistoryStore>, driver_registry: Arc<DriverRegistry>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pollers: Arc<DashMap<String, Arc<ConnectionPoller>>> = Arc::new(DashMap::new());
        let current_values: Arc<DashMap<String, TagValue>> = Arc::new(DashMap::new());
        let total_polls = Arc::new(AtomicU64::new(0));
        let total_time_ms = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let start_time = Utc::now();

        let aggregator = tokio::spawn(run_aggregator(
            events_rx,
            bus.clone(),
            history.clone(),
            pollers.clone(),
            current_values.clone(),
            total_polls.clone(),
            total_time_ms.clone(),
        ));

        let status_task = tokio::spawn(run_status_publisher(
            bus.clone(),
            pollers.clone(),
            total_polls.clone(),
            total_time_ms.clone(),
            running.clone(),
            start_time,
        ));

        Self {
            bus,
            history,
            driver_registry,
            pollers,
            current_values,
            events_tx,
            total_polls,
            total_time_ms,
            running,
            start_time,
            aggregator,
            status_task,
        }
    }

    /// Stops and drops pollers for connections no longer enabled or present, then (re)starts a
    /// fresh poller for every enabled connection. Blocks until every replaced poller's in-flight
    /// read has completed, since `ConnectionPoller::stop` awaits the driver lock.
    pub async fn reload(&self, connections: &[ConnectionConfig]) -> EngineResult<()> {
        let enabled_ids: std::collections::HashSet<&str> =
            connections.iter().filter(|c| c.enabled).map(|c| c.id.as_str()).collect();

        let stale: Vec<String> = self
            .pollers
            .iter()
            .map(|e| e.key().clone())
            .filter(|id| !enabled_ids.contains(id.as_str()))
            .collect();
        for id in stale {
            if let Some((_, poller)) = self.pollers.remove(&id) {
                poller.stop().await;
            }
        }

        for conn in connections.iter().filter(|c| c.enabled) {
            if let Some((_, old)) = self.pollers.remove(&conn.id) {
                old.stop().await;
            }
            conn.validate()?;
            let driver = self.driver_registry.create(&conn.driver_type)?;
            match ConnectionPoller::start(conn.clone(), driver, self.events_tx.clone()).await {
                Ok(poller) => {
                    self.pollers.insert(conn.id.clone(), poller);
                }
                Err(e) => {
                    warn!(connection_id = %conn.id, error = %e, "failed to start connection poller");
                }
            }
        }
        Ok(())
    }

    pub async fn write_tag(&self, connection_id: &str, tag_id: &str, value: Value) -> EngineResult<()> {
        let poller = self
            .pollers
            .get(connection_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::config(format!("unknown connection {connection_id:?}")))?;
        poller.write_tag(tag_id, value).await
    }

    pub fn current_value(&self, connection_id: &str, tag_id: &str) -> Option<TagValue> {
        self.current_values.get(&format!("{connection_id}/{tag_id}")).map(|e| e.clone())
    }

    pub fn status(&self) -> EngineStatus {
        build_status(&self.pollers, &self.total_polls, &self.total_time_ms, &self.running, self.start_time)
    }

    /// Stops every poller and the background aggregation/status tasks. Poll-group timers stop
    /// before drivers disconnect, so no driver callback runs past teardown.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        for entry in self.pollers.iter() {
            entry.value().stop().await;
        }
        self.pollers.clear();
        self.aggregator.abort();
        self.status_task.abort();
        if let Some(history) = &self.history {
            history.shutdown().await;
        }
    }
}

async fn run_aggregator(
    mut events_rx: mpsc::Receiver<PollEvent>,
    bus: Arc<dyn MessageBus>,
    history: Option<HistoryStore>,
    pollers: Arc<DashMap<String, Arc<ConnectionPoller>>>,
    current_values: Arc<DashMap<String, TagValue>>,
    total_polls: Arc<AtomicU64>,
    total_time_ms: Arc<AtomicU64>,
) {
    while let Some(event) = events_rx.recv().await {
        match event {
            PollEvent::Values { connection_id, values, elapsed_ms } => {
                total_polls.fetch_add(1, Ordering::Relaxed);
                total_time_ms.fetch_add(elapsed_ms, Ordering::Relaxed);

                let poller = pollers.get(&connection_id).map(|e| e.value().clone());
                let bulk_timestamp = Utc::now();
                let mut tags = Vec::with_capacity(values.len());
                for (tag_id, (value, log_history)) in values {
                    current_values.insert(format!("{connection_id}/{tag_id}"), value.clone());

                    let tag_config = poller.as_ref().and_then(|p| p.tag_config(&tag_id).cloned());
                    tags.push(BulkTagEntry {
                        connection_id: connection_id.clone(),
                        tag_id: tag_id.clone(),
                        tag_name: tag_config.as_ref().map(|t| t.name.clone()).unwrap_or_else(|| tag_id.clone()),
                        value: value.value.clone(),
                        data_type: tag_config.as_ref().map(|t| t.data_type).unwrap_or(tagflow_core::DataType::F64),
                        quality: value.quality,
                        timestamp: value.timestamp,
                    });

                    if log_history {
                        if let Some(history) = &history {
                            if let Ok(value_json) = serde_json::to_string(&value.value) {
                                history.store(HistoryRecord {
                                    connection_id: connection_id.clone(),
                                    tag_id,
                                    value: value_json,
                                    quality: value.quality as i32,
                                    timestamp: value.timestamp,
                                });
                            }
                        }
                    }
                }

                let topic = format!("tags/{connection_id}/bulk");
                let message = BulkTagValueMessage { connection_id: connection_id.clone(), timestamp: bulk_timestamp, tags };
                match serde_json::to_value(&message) {
                    Ok(payload) => {
                        if let Err(e) = bus.publish(&topic, payload, Qos::AtMostOnce, false).await {
                            warn!(%topic, error = %e, "failed to publish bulk tag values");
                        }
                    }
                    Err(e) => warn!(%topic, error = %e, "failed to serialize bulk tag value message"),
                }
            }
            PollEvent::CircuitOpened { connection_id, error } => {
                warn!(connection_id, error, "circuit breaker opened");
                let topic = format!("status/{connection_id}");
                let message = ConnectionStatusMessage {
                    connection_id: connection_id.clone(),
                    state: ConnectionState::Error,
                    error_message: Some(format!("Circuit breaker opened: {error}")),
                    timestamp: Utc::now(),
                };
                if let Ok(payload) = serde_json::to_value(&message) {
                    let _ = bus.publish(&topic, payload, Qos::AtLeastOnce, true).await;
                }
            }
            PollEvent::CircuitClosed { connection_id } => {
                info!(connection_id, "circuit closed, connection recovered");
                let topic = format!("status/{connection_id}");
                let message = ConnectionStatusMessage {
                    connection_id: connection_id.clone(),
                    state: ConnectionState::Connected,
                    error_message: None,
                    timestamp: Utc::now(),
                };
                if let Ok(payload) = serde_json::to_value(&message) {
                    let _ = bus.publish(&topic, payload, Qos::AtLeastOnce, true).await;
                }
            }
        }
    }
}

async fn run_status_publisher(
    bus: Arc<dyn MessageBus>,
    pollers: Arc<DashMap<String, Arc<ConnectionPoller>>>,
    total_polls: Arc<AtomicU64>,
    total_time_ms: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    start_time: DateTime<Utc>,
) {
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    loop {
        ticker.tick().await;
        let status = build_status(&pollers, &total_polls, &total_time_ms, &running, start_time);
        if let Ok(payload) = serde_json::to_value(&status) {
            let _ = bus.publish("engine/status", payload, Qos::AtLeastOnce, true).await;
        }
    }
}

fn build_status(
    pollers: &DashMap<String, Arc<ConnectionPoller>>,
    total_polls: &AtomicU64,
    total_time_ms: &AtomicU64,
    running: &AtomicBool,
    start_time: DateTime<Utc>,
) -> EngineStatus {
    let total = total_polls.load(Ordering::Relaxed);
    let time = total_time_ms.load(Ordering::Relaxed);
    let average_poll_time_ms = if total > 0 { time as f64 / total as f64 } else { 0.0 };
    let active_tags = pollers.iter().map(|e| e.value().tag_count()).sum();
    let connections = pollers
        .iter()
        .map(|e| ConnectionStatus { connection_id: e.key().clone(), circuit_open: e.value().is_circuit_open() })
        .collect();
    EngineStatus {
        is_running: running.load(Ordering::Relaxed),
        active_connections: pollers.len(),
        active_tags,
        total_polls: total,
        average_poll_time_ms,
        start_time,
        timestamp: Utc::now(),
        connections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagflow_bus::InProcessBus;
    use tagflow_core::{model::SimulatorParams, model::Waveform, DataType, TagConfig};
    use tokio::time::sleep;

    fn sim_connection() -> ConnectionConfig {
        let now = chrono::Utc::now();
        ConnectionConfig {
            id: "sim".into(),
            name: "Simulator".into(),
            driver_type: "simulator".into(),
            enabled: true,
            tags: vec![TagConfig {
                id: "t1".into(),
                name: "T1".into(),
                address: "sim://t1".into(),
                data_type: DataType::F64,
                poll_rate_ms: 10,
                unit: None,
                description: None,
                scale: None,
                offset: None,
                log_history: false,
                simulator: Some(SimulatorParams {
                    waveform: Waveform::Sine,
                    base: 10.0,
                    amplitude: 1.0,
                    period: 60.0,
                    noise: 0.0,
                }),
            }],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn reload_starts_poller_and_populates_current_value() {
        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let engine = PollEngine::new(bus, None, Arc::new(DriverRegistry::new()));
        engine.reload(&[sim_connection()]).await.unwrap();

        sleep(Duration::from_millis(100)).await;
        assert!(engine.current_value("sim", "t1").is_some());

        let status = engine.status();
        assert!(status.total_polls > 0);
        assert_eq!(status.connections.len(), 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn reload_drops_disabled_connection() {
        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let engine = PollEngine::new(bus, None, Arc::new(DriverRegistry::new()));
        engine.reload(&[sim_connection()]).await.unwrap();
        sleep(Duration::from_millis(30)).await;

        let mut disabled = sim_connection();
        disabled.enabled = false;
        engine.reload(&[disabled]).await.unwrap();

        assert_eq!(engine.status().connections.len(), 0);
        engine.shutdown().await;
    }
}
