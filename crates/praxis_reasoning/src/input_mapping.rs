//! Turning an untyped step input into the argument object a tool expects.

use praxis_core::schema::{properties, property_type, required};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Parameter names a bare string is bound to when the schema offers one.
const CONVENTIONAL_NAMES: &[&str] = &["query", "text", "message", "input", "value", "data"];

static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|,)\s*([A-Za-z_][A-Za-z0-9_]*)\s*:\s*("[^"]*"|[^,]*)"#).unwrap()
});

/// Map `raw` onto `schema`'s parameters.
///
/// Objects pass through, `null` becomes `{}`, and strings are bound by the
/// first rule that applies:
/// 1. JSON object text is parsed.
/// 2. `key: value, key: value` pairs, when every key is a known parameter.
/// 3. The single required parameter.
/// 4. A conventional parameter name (`query`, `text`, ...).
/// 5. The first string-typed required parameter, else the first required one.
/// 6. A synthetic `input` key.
pub fn map_input(raw: &Value, schema: &Value) -> Map<String, Value> {
    match raw {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        Value::String(s) => map_string(s, schema),
        other => bind(fallback_key(schema), other.clone()),
    }
}

fn map_string(raw: &str, schema: &Value) -> Map<String, Value> {
    let trimmed = raw.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return map;
    }
    if let Some(pairs) = parse_pairs(trimmed, schema) {
        return pairs;
    }
    bind(fallback_key(schema), Value::String(raw.to_string()))
}

fn bind(key: String, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key, value);
    map
}

/// Where a single unnamed value goes (rules 3 to 6).
fn fallback_key(schema: &Value) -> String {
    let required = required(schema);
    if let [only] = required.as_slice() {
        return only.to_string();
    }
    if let Some(props) = properties(schema) {
        if let Some(name) = CONVENTIONAL_NAMES.iter().find(|n| props.contains_key(**n)) {
            return name.to_string();
        }
    }
    if required.len() > 1 {
        let stringy = required
            .iter()
            .find(|name| matches!(property_type(schema, name), None | Some("string")));
        return stringy.unwrap_or(&required[0]).to_string();
    }
    "input".to_string()
}

fn parse_pairs(raw: &str, schema: &Value) -> Option<Map<String, Value>> {
    let props = properties(schema)?;
    let mut map = Map::new();
    let mut consumed = 0;
    for caps in KEY_VALUE.captures_iter(raw) {
        let whole = caps.get(0)?;
        if whole.start() != consumed {
            return None;
        }
        consumed = whole.end();
        let key = &caps[1];
        if !props.contains_key(key) {
            return None;
        }
        let value = caps[2].trim().trim_matches('"');
        map.insert(key.to_string(), coerce(value, property_type(schema, key)));
    }
    if map.is_empty() || consumed != raw.len() {
        return None;
    }
    Some(map)
}

fn coerce(text: &str, ty: Option<&str>) -> Value {
    match ty {
        Some("number") => {
            if let Ok(i) = text.parse::<i64>() {
                return Value::from(i);
            }
            text.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(text.to_string()))
        }
        Some("boolean") => match text.to_ascii_lowercase().as_str() {
            "true" | "yes" => Value::Bool(true),
            "false" | "no" => Value::Bool(false),
            _ => Value::String(text.to_string()),
        },
        _ => Value::String(text.to_string()),
    }
}
