use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tagflow_core::{ConnectionConfig, EngineError, EngineResult, TagConfig, TagValue};
use tagflow_drivers::Driver;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::circuit::CircuitBreaker;

/// Emitted by a `ConnectionPoller`'s group timers; consumed by the `PollEngine` aggregation loop.
pub enum PollEvent {
    Values {
        connection_id: String,
        /// tag id -> (reading, whether this tag should be persisted to history)
        values: HashMap<String, (TagValue, bool)>,
        elapsed_ms: u64,
    },
    /// Sent only on the read that actually transitions the breaker closed -> open (the fifth
    /// consecutive failure), not on every failed read.
    CircuitOpened {
        connection_id: String,
        error: String,
    },
    CircuitClosed {
        connection_id: String,
    },
}

/// Owns one connection's driver and one recurring timer per poll-rate group. Each group has its
/// own single-slot backpressure gate so a slow read in one group never stalls another.
pub struct ConnectionPoller {
    pub connection_id: String,
    driver: Arc<Mutex<Box<dyn Driver>>>,
    circuit: Arc<CircuitBreaker>,
    tags_by_id: HashMap<String, TagConfig>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionPoller {
    pub async fn start(
        conn: ConnectionConfig,
        mut driver: Box<dyn Driver>,
        events_tx: mpsc::Sender<PollEvent>,
    ) -> EngineResult<Arc<Self>> {
        driver.connect(&conn).await?;
        let tags_by_id: HashMap<String, TagConfig> =
            conn.tags.iter().map(|t| (t.id.clone(), t.clone())).collect();

        let poller = Arc::new(Self {
            connection_id: conn.id.clone(),
            driver: Arc::new(Mutex::new(driver)),
            circuit: Arc::new(CircuitBreaker::new()),
            tags_by_id,
            tasks: std::sync::Mutex::new(Vec::new()),
        });

        let mut tasks = Vec::new();
        for (rate_ms, tags) in conn.poll_groups() {
            let tags: Vec<TagConfig> = tags.into_iter().cloned().collect();
            tasks.push(spawn_group(poller.clone(), rate_ms, tags, events_tx.clone()));
        }
        *poller.tasks.lock().unwrap() = tasks;
        Ok(poller)
    }

    /// Stops all group timers and disconnects the driver. Awaiting the aborted tasks' join
    /// handles would race the abort signal, so this only issues the abort; in-flight reads that
    /// are already past their gate check run to completion and then see the aborted task state
    /// on their next tick, which never arrives.
    pub async fn stop(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        let mut driver = self.driver.lock().await;
        if let Err(e) = driver.disconnect().await {
            warn!(connection_id = %self.connection_id, error = %e, "error disconnecting driver");
        }
    }

    pub async fn write_tag(&self, tag_id: &str, value: tagflow_core::Value) -> EngineResult<()> {
        let tag = self
            .tags_by_id
            .get(tag_id)
            .ok_or_else(|| EngineError::config(format!("unknown tag {tag_id:?}")))?;
        let driver = self.driver.lock().await;
        if !driver.is_connected() {
            warn!(connection_id = %self.connection_id, tag_id, "write dropped, driver not connected");
            return Ok(());
        }
        driver.write_tag(tag, value).await
    }

    pub fn is_circuit_open(&self) -> bool {
        self.circuit.is_open()
    }

    pub fn tag_config(&self, tag_id: &str) -> Option<&TagConfig> {
        self.tags_by_id.get(tag_id)
    }

    pub fn tag_count(&self) -> usize {
        self.tags_by_id.len()
    }
}

fn spawn_group(
    poller: Arc<ConnectionPoller>,
    rate_ms: u64,
    tags: Vec<TagConfig>,
    events_tx: mpsc::Sender<PollEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let gate = AtomicBool::new(false);
        let mut ticker = tokio::time::interval(Duration::from_millis(rate_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if poller.circuit.is_open() {
                continue;
            }

            if gate.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
                debug!(connection_id = %poller.connection_id, rate_ms, "poll tick dropped, gate busy");
                continue;
            }

            let start = Instant::now();
            let result = {
                let driver = poller.driver.lock().await;
                driver.read_tags(&tags).await
            };
            gate.store(false, Ordering::Release);

            match result {
                Ok(values) => {
                    let transitioned = poller.circuit.record_success();
                    if transitioned {
                        let _ = events_tx
                            .send(PollEvent::CircuitClosed { connection_id: poller.connection_id.clone() })
                            .await;
                    }
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    let tagged: HashMap<String, (TagValue, bool)> = values
                        .into_iter()
                        .map(|(tag_id, value)| {
                            let log_history =
                                tags.iter().find(|t| t.id == tag_id).map(|t| t.log_history).unwrap_or(false);
                            (tag_id, (value, log_history))
                        })
                        .collect();
                    if events_tx
                        .send(PollEvent::Values {
                            connection_id: poller.connection_id.clone(),
                            values: tagged,
                            elapsed_ms,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(e) => {
                    let opened = poller.circuit.record_failure();
                    warn!(connection_id = %poller.connection_id, error = %e, "poll read failed");
                    if opened
                        && events_tx
                            .send(PollEvent::CircuitOpened {
                                connection_id: poller.connection_id.clone(),
                                error: e.to_string(),
                            })
                            .await
                            .is_err()
                    {
                        return;
                    }
                }
            }
        }
    })
}
