use serde::{Deserialize, Serialize};

use crate::model::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ComparisonOp {
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "==" => Self::Eq,
            "!=" => Self::Ne,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "<" => Self::Lt,
            "<=" => Self::Le,
            _ => return None,
        })
    }
}

/// A structured tag-value condition: `(tag path, operator, threshold)`. Numeric-parseable sides
/// compare as `f64` with a `1e-9` epsilon for equality; otherwise both sides compare as case-
/// insensitive strings, and only `==`/`!=` are meaningful.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagTrigger {
    pub tag_path: String,
    pub op: ComparisonOp,
    pub threshold: String,
}

const EPSILON: f64 = 1e-9;

impl TagTrigger {
    pub fn evaluate(&self, current: &Value) -> bool {
        let current_num = current.as_f64();
        let threshold_num = self.threshold.parse::<f64>().ok();

        if let (Some(a), Some(b)) = (current_num, threshold_num) {
            return match self.op {
                ComparisonOp::Eq => (a - b).abs() < EPSILON,
                ComparisonOp::Ne => (a - b).abs() >= EPSILON,
                ComparisonOp::Gt => a > b,
                ComparisonOp::Ge => a >= b,
                ComparisonOp::Lt => a < b,
                ComparisonOp::Le => a <= b,
            };
        }

        let current_str = match current {
            Value::String(s) => s.to_ascii_lowercase(),
            Value::Bool(b) => b.to_string(),
            Value::Null => return false,
            Value::Number(n) => n.to_string(),
        };
        let threshold_str = self.threshold.to_ascii_lowercase();
        match self.op {
            ComparisonOp::Eq => current_str == threshold_str,
            ComparisonOp::Ne => current_str != threshold_str,
            _ => false,
        }
    }
}

/// A tag write action. The value string is parsed to the most specific of bool/integer/double/
/// string when applied, via `Value::parse_loose`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagAction {
    pub tag_path: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateActions {
    #[serde(default)]
    pub tag_writes: Vec<TagAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default)]
    pub flow_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_initial: Option<bool>,
    #[serde(default)]
    pub on_enter: StateActions,
    #[serde(default)]
    pub on_exit: StateActions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub id: String,
    pub from_state: String,
    pub to_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_trigger: Option<TagTrigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_condition: Option<String>,
    /// Legacy boolean-context condition: a key looked up in the event-firing context map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_action: Option<String>,
    #[serde(default)]
    pub tag_actions: Vec<TagAction>,
    #[serde(default)]
    pub flow_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMachineConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub states: Vec<State>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state_id: Option<String>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

fn default_true() -> bool {
    true
}

impl StateMachineConfig {
    /// Resolves the initial state per the spec: `InitialStateId` if set, else the single state
    /// flagged `is_initial`, else the first state in config order.
    pub fn initial_state(&self) -> Option<&str> {
        if let Some(id) = &self.initial_state_id {
            return Some(id.as_str());
        }
        if let Some(s) = self.states.iter().find(|s| s.is_initial == Some(true)) {
            return Some(s.id.as_str());
        }
        self.states.first().map(|s| s.id.as_str())
    }

    pub fn validate(&self) -> Result<(), crate::error::EngineError> {
        if self.initial_state().is_none() {
            return Err(crate::error::EngineError::config(format!(
                "state machine {:?} has no states",
                self.id
            )));
        }
        let ids: std::collections::HashSet<&str> =
            self.states.iter().map(|s| s.id.as_str()).collect();
        for t in &self.transitions {
            if !ids.contains(t.from_state.as_str()) || !ids.contains(t.to_state.as_str()) {
                return Err(crate::error::EngineError::config(format!(
                    "transition {:?} references an unknown state",
                    t.id
                )));
            }
        }
        let initial_count = self.states.iter().filter(|s| s.is_initial == Some(true)).count();
        if self.initial_state_id.is_none() && initial_count > 1 {
            return Err(crate::error::EngineError::config(format!(
                "state machine {:?} has more than one initial state",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_trigger_numeric_compare_with_epsilon() {
        let trigger = TagTrigger { tag_path: "Sim/T".into(), op: ComparisonOp::Gt, threshold: "30".into() };
        assert!(trigger.evaluate(&Value::Number(30.5)));
        assert!(!trigger.evaluate(&Value::Number(29.9)));
    }

    #[test]
    fn tag_trigger_string_compare_case_insensitive() {
        let trigger = TagTrigger { tag_path: "p".into(), op: ComparisonOp::Eq, threshold: "Running".into() };
        assert!(trigger.evaluate(&Value::String("running".into())));
    }

    #[test]
    fn initial_state_resolution_order() {
        let mk_state = |id: &str, initial: Option<bool>| State {
            id: id.into(),
            name: id.into(),
            is_initial: initial,
            on_enter: StateActions::default(),
            on_exit: StateActions::default(),
        };

        let by_id = StateMachineConfig {
            id: "m".into(),
            name: "M".into(),
            enabled: true,
            states: vec![mk_state("idle", None), mk_state("running", Some(true))],
            initial_state_id: Some("idle".into()),
            transitions: vec![],
        };
        assert_eq!(by_id.initial_state(), Some("idle"));

        let by_flag = StateMachineConfig { initial_state_id: None, ..by_id.clone() };
        assert_eq!(by_flag.initial_state(), Some("running"));
    }
}
