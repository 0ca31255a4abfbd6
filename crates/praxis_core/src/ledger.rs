//! Append-only record of executed attempts for one plan run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Max characters kept in an observation summary.
const OBSERVATION_MAX_CHARS: usize = 500;

/// Outcome of one executed attempt. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub step_id: String,
    pub tool_name: String,
    pub tool_args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub step_index: usize,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.tool_error.is_none()
    }

    /// Prefix used in `<stepN_field>` placeholders that refer to this entry.
    pub fn placeholder_prefix(&self) -> String {
        let id = self.step_id.as_str();
        let numbered = id
            .strip_prefix("step")
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
        if numbered {
            id.to_string()
        } else {
            format!("step{}", self.step_index + 1)
        }
    }

    /// Whether a `<stepN_...>` placeholder with this prefix refers to this
    /// entry, either by its `stepN` id or by its 1-based position.
    pub fn answers_to(&self, prefix: &str) -> bool {
        self.step_id == prefix || format!("step{}", self.step_index + 1) == prefix
    }
}

/// Build the short text summary stored alongside a result.
pub fn summarize_observation(result: Option<&Value>, error: Option<&str>) -> Option<String> {
    let text = match (error, result) {
        (Some(err), _) => format!("error: {err}"),
        (None, Some(Value::String(s))) => s.clone(),
        (None, Some(v)) => v.to_string(),
        (None, None) => return None,
    };
    if text.chars().count() > OBSERVATION_MAX_CHARS {
        let truncated: String = text.chars().take(OBSERVATION_MAX_CHARS).collect();
        Some(format!("{truncated}…"))
    } else {
        Some(text)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionLedger {
    entries: Vec<ExecutionResult>,
}

impl ExecutionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its position.
    pub fn append(&mut self, entry: ExecutionResult) -> usize {
        tracing::debug!(
            step = %entry.step_id,
            tool = %entry.tool_name,
            ok = entry.succeeded(),
            "ledger append"
        );
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn entries(&self) -> &[ExecutionResult] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> &[ExecutionResult] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    /// The most recent `n` entries belonging to steps before `step_index`.
    pub fn recent_before(&self, step_index: usize, n: usize) -> Vec<&ExecutionResult> {
        let prior: Vec<&ExecutionResult> = self
            .entries
            .iter()
            .filter(|e| e.step_index < step_index)
            .collect();
        let start = prior.len().saturating_sub(n);
        prior[start..].to_vec()
    }

    /// Latest attempt for a step. Retries append rather than overwrite, so
    /// this is the entry that reflects what finally happened.
    pub fn latest_for(&self, step_id: &str) -> Option<&ExecutionResult> {
        self.entries.iter().rev().find(|e| e.step_id == step_id)
    }

    pub fn latest_success_for(&self, step_id: &str) -> Option<&ExecutionResult> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.step_id == step_id && e.succeeded())
    }

    pub fn latest_success_at(&self, step_index: usize) -> Option<&ExecutionResult> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.step_index == step_index && e.succeeded())
    }

    /// One entry per step id (the latest), in order of first appearance.
    pub fn latest_by_step(&self) -> Vec<&ExecutionResult> {
        let mut order: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !order.contains(&entry.step_id.as_str()) {
                order.push(&entry.step_id);
            }
        }
        order
            .into_iter()
            .filter_map(|id| self.latest_for(id))
            .collect()
    }

    /// Field names usable as `<stepN_field>` placeholders: every key of
    /// every successful object result, nested keys included.
    pub fn available_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        for entry in self.entries.iter().filter(|e| e.succeeded()) {
            let prefix = entry.placeholder_prefix();
            let Some(obj) = entry.tool_result.as_ref().and_then(result_object) else {
                continue;
            };
            let root = Value::Object(obj);
            let mut keys = Vec::new();
            collect_keys(&root, &mut keys);
            for key in keys {
                let field = format!("{prefix}_{key}");
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
        }
        fields
    }
}

fn collect_keys<'a>(value: &'a Value, keys: &mut Vec<&'a str>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                keys.push(key);
                collect_keys(child, keys);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_keys(v, keys)),
        _ => {}
    }
}

/// Depth-first lookup of `field` in a result. An object's own keys are
/// checked before its children are descended into.
pub fn find_field<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map
            .get(field)
            .or_else(|| map.values().find_map(|v| find_field(v, field))),
        Value::Array(items) => items.iter().find_map(|v| find_field(v, field)),
        _ => None,
    }
}

/// Object view of a result, parsing JSON text results when needed.
pub fn result_object(value: &Value) -> Option<serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(step_id: &str, index: usize, result: Option<Value>, error: Option<&str>) -> ExecutionResult {
        ExecutionResult {
            step_id: step_id.to_string(),
            tool_name: "t".to_string(),
            tool_args: json!({}),
            observation: summarize_observation(result.as_ref(), error),
            tool_result: result,
            tool_error: error.map(String::from),
            timestamp: Utc::now(),
            step_index: index,
        }
    }

    #[test]
    fn test_retries_append_and_latest_wins() {
        let mut ledger = ExecutionLedger::new();
        ledger.append(entry("s1", 0, None, Some("boom")));
        ledger.append(entry("s1", 0, Some(json!({"ok": true})), None));
        assert_eq!(ledger.len(), 2);
        assert!(ledger.latest_for("s1").unwrap().succeeded());
        assert_eq!(ledger.latest_by_step().len(), 1);
    }

    #[test]
    fn test_recent_windows() {
        let mut ledger = ExecutionLedger::new();
        for i in 0..5 {
            ledger.append(entry(&format!("s{i}"), i, Some(json!(i)), None));
        }
        let recent: Vec<_> = ledger.recent(3).iter().map(|e| e.step_index).collect();
        assert_eq!(recent, vec![2, 3, 4]);
        let prior: Vec<_> = ledger.recent_before(2, 3).iter().map(|e| e.step_index).collect();
        assert_eq!(prior, vec![0, 1]);
    }

    #[test]
    fn test_available_fields_use_step_prefix() {
        let mut ledger = ExecutionLedger::new();
        ledger.append(entry("step1", 0, Some(json!({"latitude": 1.0, "longitude": 2.0})), None));
        ledger.append(entry("fetch", 1, Some(json!("{\"body\": \"x\"}")), None));
        ledger.append(entry("broken", 2, None, Some("nope")));
        assert_eq!(
            ledger.available_fields(),
            vec!["step1_latitude", "step1_longitude", "step2_body"]
        );
    }

    #[test]
    fn test_available_fields_include_nested_keys() {
        let mut ledger = ExecutionLedger::new();
        ledger.append(entry(
            "step1",
            0,
            Some(json!({"location": {"latitude": 48.85, "city": "Paris"}})),
            None,
        ));
        assert_eq!(
            ledger.available_fields(),
            vec!["step1_location", "step1_latitude", "step1_city"]
        );
    }

    #[test]
    fn test_find_field_prefers_own_keys_then_descends() {
        let value = json!({
            "meta": {"name": "inner"},
            "items": [{"id": 1}, {"id": 2}],
            "name": "outer"
        });
        assert_eq!(find_field(&value, "name"), Some(&json!("outer")));
        assert_eq!(find_field(&value, "id"), Some(&json!(1)));
        assert_eq!(find_field(&value, "missing"), None);
    }

    #[test]
    fn test_entry_answers_to_id_and_position() {
        let e = entry("step5", 0, Some(json!({})), None);
        assert!(e.answers_to("step5"));
        assert!(e.answers_to("step1"));
        assert!(!e.answers_to("step2"));
    }

    #[test]
    fn test_observation_truncates() {
        let long = "x".repeat(600);
        let obs = summarize_observation(Some(&json!(long)), None).unwrap();
        assert_eq!(obs.chars().count(), OBSERVATION_MAX_CHARS + 1);
        assert_eq!(
            summarize_observation(None, Some("bad")).as_deref(),
            Some("error: bad")
        );
    }
}
