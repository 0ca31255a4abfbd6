//! Angle-bracket placeholders in step inputs.
//!
//! `<stepN_field>` refers to the `field` key of step N's result, searched
//! depth-first through nested objects, and is substituted from the ledger right before dispatch. Any other `<word>`
//! token left in an input is a template the planner forgot to fill, except
//! for HTML tags and schema type names which show up legitimately in
//! generated content.

use praxis_core::ledger::{find_field, result_object};
use praxis_core::{ExecutionLedger, PlaceholderError};
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

static STEP_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(step\d+)_([A-Za-z0-9_]+)>").unwrap());

static GENERIC_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([A-Za-z][A-Za-z0-9]*(?:_[A-Za-z0-9]+)*)>").unwrap());

/// Exact `<step1_field>` with nothing around it.
static WHOLE_STEP_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<(step\d+)_([A-Za-z0-9_]+)>$").unwrap());

const HTML_TAGS: &[&str] = &[
    "a", "b", "i", "u", "p", "br", "hr", "em", "strong", "code", "pre", "div", "span", "ul",
    "ol", "li", "table", "thead", "tbody", "tr", "td", "th", "h1", "h2", "h3", "h4", "h5", "h6",
    "img", "blockquote", "html", "head", "body", "title", "section", "article", "nav", "header",
    "footer", "small", "sub", "sup", "mark", "del", "details", "summary",
];

const TYPE_NAMES: &[&str] = &[
    "string", "number", "integer", "boolean", "bool", "array", "object", "null", "any",
];

/// Shortest fragment of a type name still treated as that type (`<str>`, `<obj>`).
const MIN_TYPE_FRAGMENT: usize = 3;

fn is_allowed_token(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    if HTML_TAGS.contains(&lower.as_str()) {
        return true;
    }
    TYPE_NAMES.iter().any(|ty| {
        *ty == lower || (lower.len() >= MIN_TYPE_FRAGMENT && ty.starts_with(lower.as_str()))
    })
}

/// Placeholders still present in `input`, in order of first appearance.
///
/// Step references are always reported; generic tokens only when they are
/// not on the allow-list.
pub fn find_unresolved(input: &Value) -> Vec<String> {
    let text = match input {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut found: Vec<String> = Vec::new();
    let mut push = |p: String| {
        if !found.contains(&p) {
            found.push(p);
        }
    };
    for m in STEP_REF.find_iter(&text) {
        push(m.as_str().to_string());
    }
    for caps in GENERIC_TOKEN.captures_iter(&text) {
        if !is_allowed_token(&caps[1]) {
            push(caps[0].to_string());
        }
    }
    found
}

/// Replace every `<stepN_field>` in `input` with values from the ledger.
///
/// A string that is exactly one reference takes the referenced value with
/// its JSON type; references embedded in longer text are spliced in as text.
pub fn substitute(input: &Value, ledger: &ExecutionLedger) -> Result<Value, PlaceholderError> {
    match input {
        Value::String(s) => substitute_str(s, ledger),
        Value::Array(items) => items
            .iter()
            .map(|v| substitute(v, ledger))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), substitute(v, ledger)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_str(s: &str, ledger: &ExecutionLedger) -> Result<Value, PlaceholderError> {
    if let Some(caps) = WHOLE_STEP_REF.captures(s) {
        return resolve(&caps, ledger);
    }
    if !STEP_REF.is_match(s) {
        return Ok(Value::String(s.to_string()));
    }

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in STEP_REF.captures_iter(s) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&s[last..whole.start()]);
        match resolve(&caps, ledger)? {
            Value::String(text) => out.push_str(&text),
            other => out.push_str(&other.to_string()),
        }
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(Value::String(out))
}

fn resolve(caps: &Captures<'_>, ledger: &ExecutionLedger) -> Result<Value, PlaceholderError> {
    let prefix = &caps[1];
    let field = &caps[2];
    let value = ledger
        .entries()
        .iter()
        .rev()
        .filter(|e| e.succeeded() && e.answers_to(prefix))
        .find_map(|e| {
            let obj = Value::Object(e.tool_result.as_ref().and_then(result_object)?);
            find_field(&obj, field).cloned()
        });

    value.ok_or_else(|| PlaceholderError {
        placeholder: caps[0].to_string(),
        available_fields: ledger.available_fields(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use praxis_core::ExecutionResult;
    use serde_json::json;

    fn ledger_with(step_id: &str, index: usize, result: Value) -> ExecutionLedger {
        let mut ledger = ExecutionLedger::new();
        ledger.append(ExecutionResult {
            step_id: step_id.into(),
            tool_name: "geocode".into(),
            tool_args: json!({}),
            tool_result: Some(result),
            tool_error: None,
            observation: None,
            timestamp: Utc::now(),
            step_index: index,
        });
        ledger
    }

    #[test]
    fn test_allow_list_not_flagged() {
        assert!(find_unresolved(&json!({"content": "<h1>Title</h1><div>x</div>"})).is_empty());
        assert!(find_unresolved(&json!({"type": "<string>"})).is_empty());
        assert!(find_unresolved(&json!({"type": "<strin>"})).is_empty());
        assert!(find_unresolved(&json!({"t": "<strin"})).is_empty());
        assert!(find_unresolved(&json!({"t": "a < b > c"})).is_empty());
    }

    #[test]
    fn test_unresolved_flagged() {
        let found = find_unresolved(&json!({"lat": "<step2_latitude>", "city": "<city_name>"}));
        assert_eq!(found, vec!["<step2_latitude>", "<city_name>"]);
        assert_eq!(find_unresolved(&json!("search <query>")), vec!["<query>"]);
    }

    #[test]
    fn test_whole_reference_keeps_json_type() {
        let ledger = ledger_with("step1", 0, json!({"latitude": 48.85, "tags": ["a"]}));
        let out = substitute(&json!({"lat": "<step1_latitude>", "t": "<step1_tags>"}), &ledger).unwrap();
        assert_eq!(out, json!({"lat": 48.85, "t": ["a"]}));
    }

    #[test]
    fn test_embedded_reference_spliced_as_text() {
        let ledger = ledger_with("geo", 0, json!({"city": "Paris", "latitude": 48.85}));
        let out = substitute(&json!(["Weather in <step1_city> at <step1_latitude>"]), &ledger).unwrap();
        assert_eq!(out, json!(["Weather in Paris at 48.85"]));
    }

    #[test]
    fn test_json_text_results_are_searched() {
        let ledger = ledger_with("step1", 0, json!("{\"id\": 7}"));
        assert_eq!(substitute(&json!("<step1_id>"), &ledger).unwrap(), json!(7));
    }

    #[test]
    fn test_unknown_field_reports_available() {
        let ledger = ledger_with("step1", 0, json!({"latitude": 1.0}));
        let err = substitute(&json!({"lat": "<step1_lat>"}), &ledger).unwrap_err();
        assert_eq!(err.placeholder, "<step1_lat>");
        assert_eq!(err.available_fields, vec!["step1_latitude"]);
    }

    #[test]
    fn test_nested_field_found_depth_first() {
        let ledger = ledger_with("step1", 0, json!({"location": {"latitude": 48.85}}));
        let out = substitute(&json!({"lat": "<step1_latitude>"}), &ledger).unwrap();
        assert_eq!(out, json!({"lat": 48.85}));
    }

    #[test]
    fn test_reference_by_position_when_id_differs() {
        let ledger = ledger_with("step5", 0, json!({"latitude": 48.85}));
        assert_eq!(substitute(&json!("<step1_latitude>"), &ledger).unwrap(), json!(48.85));
        assert_eq!(substitute(&json!("<step5_latitude>"), &ledger).unwrap(), json!(48.85));
    }

    #[test]
    fn test_no_references_untouched() {
        let ledger = ExecutionLedger::new();
        let input = json!({"q": "<b>bold</b>", "n": 3});
        assert_eq!(substitute(&input, &ledger).unwrap(), input);
    }
}
