//! Property-based tests for recovering structured data from model output.
//!
//! Model replies mix prose, fences and half-finished JSON; the recovery
//! helpers must never panic on them and must find objects buried in noise.

use praxis_core::PlanStep;
use praxis_reasoning::input_mapping::map_input;
use praxis_reasoning::json_recovery::{first_object, matching_brace, recover_objects};
use praxis_reasoning::placeholder::find_unresolved;
use praxis_reasoning::validator::{merge_correction, parse_corrections};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

// ============================================================================
// Strategies
// ============================================================================

/// Prose without braces, so the only object in a reply is the one we plant.
fn arb_prose() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 .,:;!?\n'\"`()<>_-]{0,80}"
}

fn arb_key() -> impl Strategy<Value = String> {
    "[a-z][a-z_]{0,10}"
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(|n| json!(n)),
        any::<bool>().prop_map(|b| json!(b)),
        // Braces and quotes inside strings must not confuse the scanner.
        "[a-z {}\"\\\\]{0,16}".prop_map(|s| json!(s)),
    ]
}

fn arb_object() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map(arb_key(), arb_scalar(), 1..5)
        .prop_map(|m| m.into_iter().collect())
}

// ============================================================================
// Recovery never panics
// ============================================================================

proptest! {
    #[test]
    fn prop_recovery_total_on_arbitrary_text(text in ".{0,200}") {
        let _ = first_object(&text);
        let _ = recover_objects(&text, |_| true);
        let _ = parse_corrections(&text);
        let _ = find_unresolved(&Value::String(text.clone()));
    }

    #[test]
    fn prop_matching_brace_points_at_a_brace(text in "[{}\"\\\\a-z ]{0,60}") {
        for (start, ch) in text.char_indices() {
            if ch != '{' {
                continue;
            }
            if let Some(end) = matching_brace(&text, start) {
                prop_assert!(end > start);
                prop_assert_eq!(text.as_bytes()[end], b'}');
            }
        }
    }

    #[test]
    fn prop_map_input_always_yields_object(raw in "[^{}]{0,60}", required in prop::collection::vec(arb_key(), 0..3)) {
        let mut props = Map::new();
        for name in &required {
            props.insert(name.clone(), json!({"type": "string"}));
        }
        let schema = json!({"type": "object", "properties": props, "required": required});
        let mapped = map_input(&Value::String(raw), &schema);
        prop_assert!(!mapped.is_empty());
    }
}

// ============================================================================
// Objects buried in noise are found
// ============================================================================

proptest! {
    #[test]
    fn prop_embedded_object_recovered(
        before in arb_prose(),
        object in arb_object(),
        after in arb_prose(),
    ) {
        let expected = Value::Object(object);
        let reply = format!("{before}\n{expected}\n{after}");
        prop_assert_eq!(first_object(&reply), Some(expected));
    }

    #[test]
    fn prop_correction_recovered_without_envelope(
        noise in arb_prose(),
        step_id in "s[0-9]{1,3}",
        patch in arb_object(),
    ) {
        let item = json!({"step_id": step_id, "corrected_input": patch});
        let reply = format!("{noise}\nHere is the fix: {item} hope that helps");
        let corrections = parse_corrections(&reply).unwrap();
        prop_assert_eq!(corrections.len(), 1);
        prop_assert_eq!(&corrections[0].step_id, &step_id);
        prop_assert_eq!(&corrections[0].corrected_input, &patch);
    }
}

// ============================================================================
// Merging corrections
// ============================================================================

proptest! {
    #[test]
    fn prop_merge_is_sparse_and_keeps_identity(
        original in arb_object(),
        patch in arb_object(),
        deps in prop::collection::btree_set("s[0-9]", 0..3),
    ) {
        let step = PlanStep::new("s9", "tool", Value::Object(original.clone()))
            .with_dependencies(deps.clone());
        let merged = merge_correction(&step, &patch, &json!({}));

        prop_assert_eq!(&merged.step_id, "s9");
        prop_assert_eq!(&merged.dependencies, &deps);
        let input = merged.input.as_object().unwrap();
        for (key, value) in &original {
            if !patch.contains_key(key) {
                prop_assert_eq!(input.get(key), Some(value));
            }
        }
        for key in patch.keys().filter(|k| *k != "path") {
            prop_assert_eq!(input.get(key), patch.get(key));
        }
    }
}
