use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tagflow_core::model::Waveform;
use tagflow_core::{ConnectionConfig, EngineResult, Quality, TagConfig, TagValue, Value};

use crate::driver::Driver;

/// Computes tag values deterministically from wall time and each tag's waveform parameters. It
/// is always "connected". A write-through table lets `write_tag` override the next read of the
/// same tag before the next simulator update, matching the round-trip property in the spec.
pub struct SimulatorDriver {
    overrides: Arc<RwLock<HashMap<String, Value>>>,
}

impl SimulatorDriver {
    pub fn new() -> Self {
        Self { overrides: Arc::new(RwLock::new(HashMap::new())) }
    }

    fn compute(tag: &TagConfig, now_secs: f64) -> f64 {
        let Some(params) = &tag.simulator else { return 0.0 };
        let phase = if params.period > 0.0 { (now_secs % params.period) / params.period } else { 0.0 };

        let raw = match params.waveform {
            Waveform::Sine => params.base + params.amplitude * (phase * std::f64::consts::TAU).sin(),
            Waveform::Ramp => params.base + params.amplitude * phase,
            Waveform::Triangle => {
                let tri = if phase < 0.5 { phase * 2.0 } else { 2.0 - phase * 2.0 };
                params.base + params.amplitude * tri
            }
            Waveform::Random => {
                let jitter: f64 = rand::thread_rng().gen_range(-1.0..1.0);
                params.base + params.amplitude * jitter
            }
            Waveform::Boolean => {
                if phase < 0.5 {
                    0.0
                } else {
                    1.0
                }
            }
        };

        let noisy = if params.noise > 0.0 {
            raw + rand::thread_rng().gen_range(-params.noise..params.noise)
        } else {
            raw
        };
        tag.apply_scale_offset(noisy)
    }
}

impl Default for SimulatorDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for SimulatorDriver {
    fn is_connected(&self) -> bool {
        true
    }

    async fn connect(&mut self, _config: &ConnectionConfig) -> EngineResult<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> EngineResult<()> {
        Ok(())
    }

    async fn read_tags(&self, tags: &[TagConfig]) -> EngineResult<HashMap<String, TagValue>> {
        let now = Utc::now();
        let now_secs = now.timestamp() as f64 + now.timestamp_subsec_millis() as f64 / 1000.0;

        let overrides = self.overrides.read().unwrap();
        let mut out = HashMap::new();
        for tag in tags {
            let value = if let Some(v) = overrides.get(&tag.id) {
                v.clone()
            } else if tag.simulator.as_ref().map(|p| p.waveform) == Some(Waveform::Boolean) {
                Value::Bool(Self::compute(tag, now_secs) > 0.5)
            } else {
                Value::Number(Self::compute(tag, now_secs))
            };
            out.insert(
                tag.id.clone(),
                TagValue { path: tag.id.clone(), value, quality: Quality::Good, timestamp: now },
            );
        }
        Ok(out)
    }

    async fn write_tag(&self, tag: &TagConfig, value: Value) -> EngineResult<()> {
        self.overrides.write().unwrap().insert(tag.id.clone(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagflow_core::{model::SimulatorParams, DataType};

    fn mk_tag(waveform: Waveform) -> TagConfig {
        TagConfig {
            id: "t".into(),
            name: "T".into(),
            address: "sim://t".into(),
            data_type: DataType::F64,
            poll_rate_ms: 500,
            unit: None,
            description: None,
            scale: None,
            offset: None,
            log_history: true,
            simulator: Some(SimulatorParams { waveform, base: 25.0, amplitude: 10.0, period: 60.0, noise: 0.0 }),
        }
    }

    #[tokio::test]
    async fn read_tags_returns_good_quality() {
        let driver = SimulatorDriver::new();
        let tag = mk_tag(Waveform::Sine);
        let values = driver.read_tags(&[tag.clone()]).await.unwrap();
        let v = values.get("t").unwrap();
        assert!(v.quality.is_good());
    }

    #[tokio::test]
    async fn write_then_read_observes_override_before_next_update() {
        let driver = SimulatorDriver::new();
        let tag = mk_tag(Waveform::Sine);
        driver.write_tag(&tag, Value::Number(99.0)).await.unwrap();
        let values = driver.read_tags(&[tag]).await.unwrap();
        assert_eq!(values.get("t").unwrap().value, Value::Number(99.0));
    }

    #[tokio::test]
    async fn is_always_connected() {
        let driver = SimulatorDriver::new();
        assert!(driver.is_connected());
    }
}
