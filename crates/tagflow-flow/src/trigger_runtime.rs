use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tagflow_bus::MessageBus;
use tagflow_core::{EngineError, EngineResult, MessageEnvelope};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::warn;
use uuid::Uuid;

use crate::compiler::CompiledFlow;
use crate::executor::{ExecutorOptions, FlowExecutor};
use crate::tracer::RunOutcome;

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct TimerTriggerConfig {
    #[serde(default)]
    cron: Option<String>,
    #[serde(default)]
    interval_ms: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TagChangeTriggerConfig {
    connection_id: String,
    tag_id: String,
}

/// Live scheduling for `timer-trigger` (cron via `tokio-cron-scheduler`, plain interval via
/// `tokio::time::interval`) and `tag-change-trigger` (a bus subscription diffing against a
/// last-seen cache). `manual-trigger` has no runtime component here; its run is started directly
/// by whoever calls `FlowExecutor::execute`.
pub struct TriggerRuntime {
    scheduler: Mutex<Option<JobScheduler>>,
    job_ids: Mutex<Vec<Uuid>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TriggerRuntime {
    pub async fn new() -> EngineResult<Self> {
        let scheduler = JobScheduler::new().await.map_err(|e| EngineError::internal(e.to_string()))?;
        scheduler.start().await.map_err(|e| EngineError::internal(e.to_string()))?;
        Ok(Self { scheduler: Mutex::new(Some(scheduler)), job_ids: Mutex::new(Vec::new()), tasks: Mutex::new(Vec::new()) })
    }

    /// Schedules every timer/tag-change trigger node found in `compiled`. Call `shutdown` before
    /// scheduling a replacement compiled flow for the same flow id.
    pub async fn schedule(
        &self,
        compiled: Arc<CompiledFlow>,
        executor: Arc<FlowExecutor>,
        bus: Arc<dyn MessageBus>,
    ) -> EngineResult<()> {
        for node_id in compiled.trigger_node_ids.clone() {
            let Some(def) = compiled.definition.nodes.iter().find(|n| n.id == node_id) else {
                continue;
            };
            match def.type_tag.as_str() {
                "timer-trigger" => {
                    self.schedule_timer(compiled.clone(), executor.clone(), node_id, def.config.clone()).await?
                }
                "tag-change-trigger" => {
                    self.schedule_tag_change(compiled.clone(), executor.clone(), bus.clone(), node_id, def.config.clone())
                        .await?
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn schedule_timer(
        &self,
        compiled: Arc<CompiledFlow>,
        executor: Arc<FlowExecutor>,
        node_id: String,
        config: serde_json::Value,
    ) -> EngineResult<()> {
        let parsed: TimerTriggerConfig =
            serde_json::from_value(config).map_err(|e| EngineError::config(format!("invalid timer-trigger config: {e}")))?;

        if let Some(cron) = parsed.cron {
            let fire_compiled = compiled.clone();
            let fire_executor = executor.clone();
            let fire_node_id = node_id.clone();
            let job = Job::new_async(cron.as_str(), move |_uuid, _locked| {
                let compiled = fire_compiled.clone();
                let executor = fire_executor.clone();
                let node_id = fire_node_id.clone();
                Box::pin(async move {
                    fire_trigger(&compiled, &executor, &node_id, serde_json::Value::Null).await;
                })
            })
            .map_err(|e| EngineError::config(format!("invalid cron expression {cron:?}: {e}")))?;

            let scheduler = self.scheduler.lock().await;
            let scheduler = scheduler.as_ref().ok_or_else(|| EngineError::internal("trigger runtime already shut down"))?;
            let job_id = scheduler.add(job).await.map_err(|e| EngineError::internal(e.to_string()))?;
            self.job_ids.lock().await.push(job_id);
        } else if let Some(interval_ms) = parsed.interval_ms {
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
                loop {
                    ticker.tick().await;
                    fire_trigger(&compiled, &executor, &node_id, serde_json::Value::Null).await;
                }
            });
            self.tasks.lock().await.push(handle);
        } else {
            return Err(EngineError::config(format!("timer-trigger node {node_id:?} has neither cron nor intervalMs")));
        }
        Ok(())
    }

    async fn schedule_tag_change(
        &self,
        compiled: Arc<CompiledFlow>,
        executor: Arc<FlowExecutor>,
        bus: Arc<dyn MessageBus>,
        node_id: String,
        config: serde_json::Value,
    ) -> EngineResult<()> {
        let parsed: TagChangeTriggerConfig = serde_json::from_value(config)
            .map_err(|e| EngineError::config(format!("invalid tag-change-trigger config: {e}")))?;
        let topic = format!("tags/{}/bulk", parsed.connection_id);
        let mut subscription = bus.subscribe(&topic).await?;

        let handle = tokio::spawn(async move {
            let mut last_seen: Option<serde_json::Value> = None;
            while let Some(message) = subscription.receiver.recv().await {
                let current = message.payload.get(&parsed.tag_id).cloned();
                if current.is_some() && current != last_seen {
                    last_seen = current.clone();
                    fire_trigger(&compiled, &executor, &node_id, current.unwrap_or(serde_json::Value::Null)).await;
                }
            }
        });
        self.tasks.lock().await.push(handle);
        Ok(())
    }

    /// Unschedules every cron job and aborts every spawned interval/tag-change task, but keeps
    /// the underlying `JobScheduler` running so a subsequent `schedule` call (a config reload)
    /// can register a fresh set of triggers. This is the one to call before re-scheduling.
    pub async fn clear(&self) {
        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        let scheduler_slot = self.scheduler.lock().await;
        if let Some(scheduler) = scheduler_slot.as_ref() {
            for job_id in self.job_ids.lock().await.drain(..) {
                if let Err(e) = scheduler.remove(&job_id).await {
                    warn!(%job_id, error = %e, "failed to remove cron job during clear");
                }
            }
        }
    }

    /// Stops the trigger runtime for good: clears every job/task, then tears down the scheduler
    /// itself. Call once at process shutdown, never before a reload.
    pub async fn shutdown(&self) {
        self.clear().await;
        let mut scheduler_slot = self.scheduler.lock().await;
        if let Some(scheduler) = scheduler_slot.take() {
            let _ = scheduler.shutdown().await;
        }
    }
}

async fn fire_trigger(compiled: &CompiledFlow, executor: &FlowExecutor, node_id: &str, payload: serde_json::Value) {
    let outcome = executor.execute(compiled, node_id, MessageEnvelope::new(payload), ExecutorOptions::default()).await;
    if !matches!(outcome, RunOutcome::Success) {
        warn!(node_id, ?outcome, "trigger-initiated run did not complete cleanly");
    }
}
