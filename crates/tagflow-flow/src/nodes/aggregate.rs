use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tagflow_core::{EngineError, EngineResult, MessageEnvelope};

use crate::context::NodeContext;
use crate::descriptor::{NodeDescriptor, NodePort};
use crate::node::FlowNode;
use crate::registry::NodeRegistry;

fn parse_config<T: serde::de::DeserializeOwned>(config: &serde_json::Value) -> EngineResult<T> {
    serde_json::from_value(config.clone()).map_err(|e| EngineError::config(format!("invalid node config: {e}")))
}

fn payload_number(payload: &serde_json::Value) -> EngineResult<f64> {
    payload
        .as_f64()
        .or_else(|| payload.get("value").and_then(|v| v.as_f64()))
        .ok_or_else(|| EngineError::action_failure("aggregate", "payload is not numeric"))
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum AggregateOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

#[derive(Deserialize)]
struct AggregateConfig {
    op: AggregateOp,
    /// Window size in samples, used when `window_ms` is absent.
    #[serde(default)]
    window_count: Option<usize>,
    /// Window size in milliseconds; samples older than this are dropped before aggregating.
    #[serde(default)]
    window_ms: Option<u64>,
}

struct AggregateNode {
    config: AggregateConfig,
    samples: Mutex<VecDeque<(Instant, f64)>>,
}

#[async_trait]
impl FlowNode for AggregateNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let value = payload_number(&msg.payload)?;
        let mut samples = self.samples.lock();
        samples.push_back((Instant::now(), value));

        if let Some(window_ms) = self.config.window_ms {
            let cutoff = Instant::now() - Duration::from_millis(window_ms);
            while samples.front().map(|(t, _)| *t < cutoff).unwrap_or(false) {
                samples.pop_front();
            }
        } else if let Some(window_count) = self.config.window_count {
            while samples.len() > window_count {
                samples.pop_front();
            }
        }

        let values: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();
        let result = match self.config.op {
            AggregateOp::Sum => values.iter().sum(),
            AggregateOp::Avg => values.iter().sum::<f64>() / values.len() as f64,
            AggregateOp::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            AggregateOp::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            AggregateOp::Count => values.len() as f64,
        };
        Ok(vec![("out".to_string(), msg.derive(serde_json::json!({ "value": result })))])
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum SmoothMethod {
    Ema,
    Sma,
    Median,
}

#[derive(Deserialize)]
struct SmoothConfig {
    method: SmoothMethod,
    #[serde(default = "default_window")]
    window: usize,
    /// EMA smoothing factor (0, 1].
    #[serde(default = "default_alpha")]
    alpha: f64,
}

fn default_window() -> usize {
    5
}
fn default_alpha() -> f64 {
    0.3
}

struct SmoothNode {
    config: SmoothConfig,
    history: Mutex<VecDeque<f64>>,
    ema: Mutex<Option<f64>>,
}

#[async_trait]
impl FlowNode for SmoothNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let value = payload_number(&msg.payload)?;
        let result = match self.config.method {
            SmoothMethod::Ema => {
                let mut ema = self.ema.lock();
                let next = match *ema {
                    Some(prev) => self.config.alpha * value + (1.0 - self.config.alpha) * prev,
                    None => value,
                };
                *ema = Some(next);
                next
            }
            SmoothMethod::Sma => {
                let mut history = self.history.lock();
                history.push_back(value);
                while history.len() > self.config.window {
                    history.pop_front();
                }
                history.iter().sum::<f64>() / history.len() as f64
            }
            SmoothMethod::Median => {
                let mut history = self.history.lock();
                history.push_back(value);
                while history.len() > self.config.window {
                    history.pop_front();
                }
                let mut sorted: Vec<f64> = history.iter().cloned().collect();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                sorted[sorted.len() / 2]
            }
        };
        Ok(vec![("out".to_string(), msg.derive(serde_json::json!({ "value": result })))])
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum DeadbandKind {
    Absolute,
    Percentage,
}

#[derive(Deserialize)]
struct DeadbandConfig {
    kind: DeadbandKind,
    threshold: f64,
}

struct DeadbandNode {
    config: DeadbandConfig,
    last: Mutex<Option<f64>>,
}

#[async_trait]
impl FlowNode for DeadbandNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let value = payload_number(&msg.payload)?;
        let mut last = self.last.lock();
        let passes = match *last {
            None => true,
            Some(prev) => {
                let delta = (value - prev).abs();
                match self.config.kind {
                    DeadbandKind::Absolute => delta >= self.config.threshold,
                    DeadbandKind::Percentage => {
                        prev == 0.0 || (delta / prev.abs()) * 100.0 >= self.config.threshold
                    }
                }
            }
        };
        if passes {
            *last = Some(value);
            Ok(vec![("out".to_string(), msg)])
        } else {
            Ok(vec![])
        }
    }
}

struct RateOfChangeNode {
    last: Mutex<Option<(Instant, f64)>>,
}

#[async_trait]
impl FlowNode for RateOfChangeNode {
    async fn run(
        &self,
        _ctx: &mut NodeContext<'_>,
        msg: MessageEnvelope,
    ) -> EngineResult<Vec<(String, MessageEnvelope)>> {
        let value = payload_number(&msg.payload)?;
        let now = Instant::now();
        let mut last = self.last.lock();
        let rate = match *last {
            Some((prev_t, prev_v)) => {
                let dt = now.duration_since(prev_t).as_secs_f64();
                if dt > 0.0 {
                    (value - prev_v) / dt
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        *last = Some((now, value));
        Ok(vec![("out".to_string(), msg.derive(serde_json::json!({ "ratePerSecond": rate })))])
    }
}

pub fn register(registry: &mut NodeRegistry) {
    registry.register(
        NodeDescriptor::new("aggregate", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| {
            Ok(Box::new(AggregateNode { config: parse_config(config)?, samples: Mutex::new(VecDeque::new()) })
                as Box<dyn FlowNode>)
        }),
    );
    registry.register(
        NodeDescriptor::new("smooth", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| {
            Ok(Box::new(SmoothNode {
                config: parse_config(config)?,
                history: Mutex::new(VecDeque::new()),
                ema: Mutex::new(None),
            }) as Box<dyn FlowNode>)
        }),
    );
    registry.register(
        NodeDescriptor::new("deadband", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|config| {
            Ok(Box::new(DeadbandNode { config: parse_config(config)?, last: Mutex::new(None) }) as Box<dyn FlowNode>)
        }),
    );
    registry.register(
        NodeDescriptor::new("rate-of-change", false, vec![NodePort::input("in", true), NodePort::output("out")]),
        Box::new(|_config| Ok(Box::new(RateOfChangeNode { last: Mutex::new(None) }) as Box<dyn FlowNode>)),
    );
}
