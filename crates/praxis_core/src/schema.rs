//! Canonical input schemas.
//!
//! Tool catalogs hand us schemas in whatever shape their authors produced.
//! Everything downstream (validation, input mapping, prompts) reads the
//! canonical form produced here:
//!
//! ```json
//! { "type": "object", "properties": { "<name>": { "type": "<t>", ... } }, "required": [...] }
//! ```
//!
//! where `<t>` is one of [`CANONICAL_TYPES`] and every required name exists
//! in `properties`.

use serde_json::{json, Map, Value};

/// Property types the engine understands. Anything else is coerced to `string`.
pub const CANONICAL_TYPES: [&str; 5] = ["string", "number", "boolean", "array", "object"];

/// `{type: "object", properties: {}, required: []}`
pub fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {}, "required": [] })
}

/// Values remote catalogs emit when they mean "no type".
fn is_null_like(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => matches!(s.as_str(), "None" | "none" | ""),
        _ => false,
    }
}

/// Normalize a raw tool input schema into the canonical object shape.
///
/// Normalizing a canonical schema returns it unchanged.
pub fn normalize_input_schema(raw: Option<&Value>) -> Value {
    let Some(Value::Object(map)) = raw else {
        return empty_object_schema();
    };

    match map.get("type") {
        // Parameterless tools commonly omit `type` entirely.
        None => object_schema(map),
        Some(t) if is_null_like(t) => {
            tracing::debug!("Coercing null-like schema type {:?} to object", t);
            object_schema(map)
        }
        Some(Value::String(t)) if t == "object" => object_schema(map),
        Some(t) => {
            tracing::debug!("Wrapping non-object schema (type {:?}) under `input`", t);
            let mut properties = Map::new();
            properties.insert("input".to_string(), normalize_property(&Value::Object(map.clone())));
            json!({ "type": "object", "properties": properties, "required": [] })
        }
    }
}

fn object_schema(map: &Map<String, Value>) -> Value {
    let properties: Map<String, Value> = match map.get("properties") {
        Some(Value::Object(props)) => props
            .iter()
            .map(|(name, prop)| (name.clone(), normalize_property(prop)))
            .collect(),
        _ => Map::new(),
    };

    let mut required: Vec<Value> = Vec::new();
    if let Some(Value::Array(names)) = map.get("required") {
        for name in names.iter().filter_map(Value::as_str) {
            if !properties.contains_key(name) {
                tracing::debug!("Dropping required name '{}' absent from properties", name);
                continue;
            }
            if !required.iter().any(|r| r.as_str() == Some(name)) {
                required.push(Value::String(name.to_string()));
            }
        }
    }

    json!({ "type": "object", "properties": properties, "required": required })
}

/// Coerce a single property's `type`. Every other key, `description`
/// included, is carried over untouched.
fn normalize_property(prop: &Value) -> Value {
    let Value::Object(map) = prop else {
        return json!({ "type": "string" });
    };

    let mut out = map.clone();
    let canonical = match map.get("type") {
        Some(t) if is_null_like(t) => "string",
        Some(Value::String(t)) if t == "integer" => "number",
        Some(Value::String(t)) if CANONICAL_TYPES.contains(&t.as_str()) => {
            return Value::Object(out);
        }
        _ => "string",
    };
    out.insert("type".to_string(), Value::String(canonical.to_string()));
    Value::Object(out)
}

// ============================================================================
// Accessors over canonical schemas
// ============================================================================

pub fn properties(schema: &Value) -> Option<&Map<String, Value>> {
    schema.get("properties").and_then(Value::as_object)
}

pub fn required(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

pub fn has_property(schema: &Value, name: &str) -> bool {
    properties(schema).is_some_and(|props| props.contains_key(name))
}

pub fn property_type<'a>(schema: &'a Value, name: &str) -> Option<&'a str> {
    properties(schema)?.get(name)?.get("type")?.as_str()
}

pub fn property_description<'a>(schema: &'a Value, name: &str) -> Option<&'a str> {
    properties(schema)?.get(name)?.get("description")?.as_str()
}
