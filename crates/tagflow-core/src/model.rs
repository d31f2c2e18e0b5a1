use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quality code attached to every `TagValue`. `Good = 0` is the only value any comparison treats
/// as "good" — see the open question in the spec about a stray `192` value seen in some source
/// paths; this runtime never special-cases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Quality {
    Good = 0,
    Uncertain = 1,
    Bad = 2,
    NotConnected = 3,
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Good
    }
}

impl Quality {
    pub fn is_good(self) -> bool {
        matches!(self, Quality::Good)
    }
}

/// Declared data type for a tag. Drives how raw driver reads are coerced before being wrapped in
/// a `Value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    String,
}

/// The dynamic value carried by a `TagValue` or a `MessageEnvelope` payload field. `Number` is
/// always stored as `f64`; callers that need integer semantics round-trip through `DataType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    /// Parses a raw config string to the most specific of bool, integer-valued f64, f64, or
    /// string, matching the `TagAction` value-parsing rule in the spec.
    pub fn parse_loose(raw: &str) -> Value {
        if let Ok(b) = raw.parse::<bool>() {
            return Value::Bool(b);
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Value::Number(n as f64);
        }
        if let Ok(n) = raw.parse::<f64>() {
            return Value::Number(n);
        }
        Value::String(raw.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.parse().ok(),
            Value::Null => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => Some(*n != 0.0),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            Value::Null => None,
        }
    }

    /// Truthiness per the scan-loop condition rule: bool as-is, int != 0, non-empty string.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Null => false,
        }
    }
}

/// Simulator-specific waveform parameters carried on a `TagConfig` when the owning connection's
/// driver type is `simulator`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorParams {
    pub waveform: Waveform,
    #[serde(default)]
    pub base: f64,
    #[serde(default)]
    pub amplitude: f64,
    /// Period in seconds.
    #[serde(default = "default_period")]
    pub period: f64,
    #[serde(default)]
    pub noise: f64,
}

fn default_period() -> f64 {
    60.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Waveform {
    Sine,
    Ramp,
    Triangle,
    Random,
    Boolean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagConfig {
    pub id: String,
    pub name: String,
    pub address: String,
    pub data_type: DataType,
    /// Poll rate in milliseconds; must be >= 1. Tags sharing a rate share one timer.
    pub poll_rate_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(default)]
    pub log_history: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulator: Option<SimulatorParams>,
}

impl TagConfig {
    pub fn apply_scale_offset(&self, raw: f64) -> f64 {
        raw * self.scale.unwrap_or(1.0) + self.offset.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub id: String,
    pub name: String,
    pub driver_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<TagConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl ConnectionConfig {
    /// Enforces the spec's uniqueness invariant: tag ids unique within the connection.
    pub fn validate(&self) -> Result<(), crate::error::EngineError> {
        let mut seen = std::collections::HashSet::new();
        for tag in &self.tags {
            if !seen.insert(tag.id.as_str()) {
                return Err(crate::error::EngineError::config(format!(
                    "duplicate tag id {:?} in connection {:?}",
                    tag.id, self.id
                )));
            }
            if tag.poll_rate_ms < 1 {
                return Err(crate::error::EngineError::config(format!(
                    "tag {:?} has poll rate < 1ms",
                    tag.id
                )));
            }
        }
        Ok(())
    }

    /// Groups enabled tags by poll rate, the bucketing the PollEngine uses to build one timer
    /// per poll-rate group.
    pub fn poll_groups(&self) -> std::collections::BTreeMap<u64, Vec<&TagConfig>> {
        let mut groups: std::collections::BTreeMap<u64, Vec<&TagConfig>> = Default::default();
        for tag in &self.tags {
            groups.entry(tag.poll_rate_ms).or_default().push(tag);
        }
        groups
    }
}

/// A single tag reading, identified by its `"ConnectionName/TagName"` path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagValue {
    pub path: String,
    pub value: Value,
    pub quality: Quality,
    pub timestamp: DateTime<Utc>,
}

impl TagValue {
    pub fn good(path: impl Into<String>, value: Value) -> Self {
        Self { path: path.into(), value, quality: Quality::Good, timestamp: Utc::now() }
    }

    pub fn bad(path: impl Into<String>, quality: Quality, last_known: Option<Value>) -> Self {
        debug_assert!(!quality.is_good());
        Self {
            path: path.into(),
            value: last_known.unwrap_or(Value::Null),
            quality,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_parse_loose_picks_most_specific() {
        assert_eq!(Value::parse_loose("true"), Value::Bool(true));
        assert_eq!(Value::parse_loose("42"), Value::Number(42.0));
        assert_eq!(Value::parse_loose("3.5"), Value::Number(3.5));
        assert_eq!(Value::parse_loose("hello"), Value::String("hello".into()));
    }

    #[test]
    fn connection_rejects_duplicate_tag_ids() {
        let now = Utc::now();
        let tag = TagConfig {
            id: "t1".into(),
            name: "T1".into(),
            address: "0".into(),
            data_type: DataType::F64,
            poll_rate_ms: 500,
            unit: None,
            description: None,
            scale: None,
            offset: None,
            log_history: false,
            simulator: None,
        };
        let conn = ConnectionConfig {
            id: "c1".into(),
            name: "C1".into(),
            driver_type: "simulator".into(),
            enabled: true,
            tags: vec![tag.clone(), tag],
            created_at: now,
            updated_at: now,
        };
        assert!(conn.validate().is_err());
    }

    #[test]
    fn poll_groups_bucket_by_rate() {
        let now = Utc::now();
        let mk = |id: &str, rate: u64| TagConfig {
            id: id.into(),
            name: id.into(),
            address: "0".into(),
            data_type: DataType::F64,
            poll_rate_ms: rate,
            unit: None,
            description: None,
            scale: None,
            offset: None,
            log_history: false,
            simulator: None,
        };
        let conn = ConnectionConfig {
            id: "c1".into(),
            name: "C1".into(),
            driver_type: "simulator".into(),
            enabled: true,
            tags: vec![mk("a", 500), mk("b", 500), mk("c", 1000)],
            created_at: now,
            updated_at: now,
        };
        let groups = conn.poll_groups();
        assert_eq!(groups.get(&500).unwrap().len(), 2);
        assert_eq!(groups.get(&1000).unwrap().len(), 1);
    }
}
