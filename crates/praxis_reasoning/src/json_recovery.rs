//! Best-effort extraction of JSON from model output.
//!
//! Two tiers: a strict parse of fenced code blocks (or the whole reply),
//! then a brace-balanced scan that recovers one `{...}` object at a time.
//! Long or deeply nested replies often fail a strict parse while every
//! individual object in them is still well formed.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\n?(.*?)```").unwrap());

/// Contents of every fenced code block, in order.
pub fn fenced_blocks(text: &str) -> Vec<&str> {
    FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .collect()
}

/// Strict tier: the first fenced block that deserializes as `T`, else the
/// whole reply.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Option<T> {
    fenced_blocks(text)
        .into_iter()
        .chain(std::iter::once(text.trim()))
        .find_map(|candidate| serde_json::from_str(candidate).ok())
}

/// Brace pairs seen by one scan from the `{` at `start`, stopping once that
/// brace closes, plus the openers still open when the text runs out.
///
/// Braces inside double-quoted strings are ignored, and a backslash skips
/// the next character.
fn scan_pairs(text: &str, start: usize) -> (Vec<(usize, usize)>, Vec<usize>) {
    let bytes = text.as_bytes();
    let mut pairs = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => open.push(start + offset),
            b'}' => {
                if let Some(opener) = open.pop() {
                    pairs.push((opener, start + offset));
                }
                if open.is_empty() {
                    return (pairs, open);
                }
            }
            _ => {}
        }
    }
    (pairs, open)
}

/// Byte offset of the `}` closing the `{` at `start`.
///
/// Returns `None` when `start` is not a `{` or the object never closes.
pub fn matching_brace(text: &str, start: usize) -> Option<usize> {
    if text.as_bytes().get(start) != Some(&b'{') {
        return None;
    }
    let (pairs, _) = scan_pairs(text, start);
    pairs
        .last()
        .filter(|(opener, _)| *opener == start)
        .map(|&(_, end)| end)
}

/// Closing positions remembered across the openers of one reply. A scan
/// that runs off the end records every brace it passed, so an unbalanced
/// reply is scanned once rather than once per `{`.
#[derive(Default)]
struct BraceIndex {
    known: HashMap<usize, Option<usize>>,
}

impl BraceIndex {
    fn end_of(&mut self, text: &str, start: usize) -> Option<usize> {
        if let Some(end) = self.known.get(&start) {
            return *end;
        }
        let (pairs, unclosed) = scan_pairs(text, start);
        for (opener, close) in pairs {
            self.known.entry(opener).or_insert(Some(close));
        }
        for opener in unclosed {
            self.known.entry(opener).or_insert(None);
        }
        self.known.get(&start).copied().flatten()
    }
}

/// Fallback tier: every balanced object in `text` that parses and passes
/// `accept`, outermost first.
///
/// An object that fails to parse or is rejected is searched for nested
/// objects instead of being skipped whole.
pub fn recover_objects<F>(text: &str, accept: F) -> Vec<Value>
where
    F: Fn(&Value) -> bool,
{
    let mut found = Vec::new();
    let mut index = BraceIndex::default();
    let mut cursor = 0;

    while let Some(rel) = text[cursor..].find('{') {
        let start = cursor + rel;
        let parsed = index.end_of(text, start).and_then(|end| {
            serde_json::from_str::<Value>(&text[start..=end])
                .ok()
                .filter(|v| v.is_object() && accept(v))
                .map(|v| (v, end))
        });
        match parsed {
            Some((value, end)) => {
                found.push(value);
                cursor = end + 1;
            }
            None => cursor = start + 1,
        }
    }
    found
}

/// The first balanced object in the reply that parses, if any.
pub fn first_object(text: &str) -> Option<Value> {
    let mut index = BraceIndex::default();
    let mut cursor = 0;
    while let Some(rel) = text[cursor..].find('{') {
        let start = cursor + rel;
        if let Some(end) = index.end_of(text, start) {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&text[start..=end]) {
                return Some(value);
            }
        }
        cursor = start + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_matching_brace_ignores_braces_in_strings() {
        let text = r#"x {"a": "}{", "b": {"c": 1}} y"#;
        let start = text.find('{').unwrap();
        let end = matching_brace(text, start).unwrap();
        assert_eq!(&text[start..=end], r#"{"a": "}{", "b": {"c": 1}}"#);
    }

    #[test]
    fn test_matching_brace_handles_escaped_quotes() {
        let text = r#"{"a": "say \"}\" now"}"#;
        assert_eq!(matching_brace(text, 0), Some(text.len() - 1));
    }

    #[test]
    fn test_matching_brace_unclosed() {
        assert_eq!(matching_brace(r#"{"a": {"b": 1}"#, 0), None);
        assert_eq!(matching_brace("abc", 0), None);
    }

    #[test]
    fn test_parse_structured_prefers_fenced_block() {
        let reply = "Here you go:\n```json\n{\"corrections\": []}\n```\nDone.";
        let v: Value = parse_structured(reply).unwrap();
        assert_eq!(v, json!({"corrections": []}));
    }

    #[test]
    fn test_parse_structured_plain_reply() {
        let v: Value = parse_structured(" {\"a\": 1} ").unwrap();
        assert_eq!(v["a"], 1);
        assert!(parse_structured::<Value>("no json here").is_none());
    }

    #[test]
    fn test_recover_objects_from_truncated_wrapper() {
        // Outer array never closes, a trailing comma breaks strict parsing.
        let reply = r#"```json
{"corrections": [
  {"step_id": "s1", "corrected_input": {"query": "todo"}},
  {"step_id": "s2", "corrected_input": {"path": "a {b}.md"}},
  {"step_id": "s3", "corrected_input": {"path":
```"#;
        let objs = recover_objects(reply, |v| v.get("step_id").is_some());
        assert_eq!(objs.len(), 2);
        assert_eq!(objs[0]["corrected_input"]["query"], "todo");
        assert_eq!(objs[1]["corrected_input"]["path"], "a {b}.md");
    }

    #[test]
    fn test_recover_objects_skips_malformed_sibling() {
        let reply = r#"{"step_id": "s1", "corrected_input": {"a": 1,}} {"step_id": "s2", "corrected_input": {}}"#;
        let objs = recover_objects(reply, |v| v.get("step_id").is_some());
        assert_eq!(objs.len(), 1);
        assert_eq!(objs[0]["step_id"], "s2");
    }

    #[test]
    fn test_unbalanced_prefix_still_yields_inner_object() {
        let reply = format!("{}{}", "{".repeat(20_000), r#"{"step_id": "s1", "corrected_input": {}}"#);
        let objs = recover_objects(&reply, |v| v.get("step_id").is_some());
        assert_eq!(objs.len(), 1);
        assert_eq!(objs[0]["step_id"], "s1");
        assert_eq!(first_object(&reply).unwrap()["step_id"], "s1");
    }

    #[test]
    fn test_first_object_skips_prose_braces() {
        let reply = "Use {curly} style? No. {\"tool\": \"echo\", \"input\": {\"text\": \"hi\"}}";
        let v = first_object(reply).unwrap();
        assert_eq!(v["tool"], "echo");
        assert!(first_object("nothing to see").is_none());
    }

    #[test]
    fn test_multibyte_text_is_safe() {
        let reply = "前言 {\"tool\": \"搜索\", \"input\": {}} 后记 {";
        assert_eq!(first_object(reply).unwrap()["tool"], "搜索");
    }
}
