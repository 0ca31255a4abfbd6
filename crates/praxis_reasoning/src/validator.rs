use crate::input_mapping::map_input;
use crate::json_recovery::{parse_structured, recover_objects};
use crate::llm::{complete_text, ChunkCallback, CompletionParams, LlmClient, Message};
use crate::placeholder::find_unresolved;
use crate::prompts;
use crate::tool_registry::ToolRegistry;
use praxis_core::config::ValidationConfig;
use praxis_core::schema::{empty_object_schema, properties, property_description, required};
use praxis_core::{Correction, EngineError, IssueKind, PlanStep, ValidationIssue};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of validating (and possibly correcting) a plan.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// The plan to execute: corrected where corrections applied.
    pub steps: Vec<PlanStep>,
    /// Issues found before correction.
    pub issues: Vec<ValidationIssue>,
    /// Issues still present after correction.
    pub remaining: Vec<ValidationIssue>,
    pub issues_fixed: usize,
    pub corrections_applied: usize,
}

pub struct PlanValidator {
    registry: Arc<ToolRegistry>,
    llm: Arc<dyn LlmClient>,
    params: CompletionParams,
    config: ValidationConfig,
    path_patterns: Vec<Regex>,
    on_chunk: Option<ChunkCallback>,
}

impl PlanValidator {
    pub fn new(
        registry: Arc<ToolRegistry>,
        llm: Arc<dyn LlmClient>,
        params: CompletionParams,
        config: ValidationConfig,
    ) -> Self {
        let path_patterns = path_patterns(&config.path_extensions);
        Self {
            registry,
            llm,
            params,
            config,
            path_patterns,
            on_chunk: None,
        }
    }

    /// Forward streamed correction text, e.g. to show progress.
    pub fn with_chunk_callback(mut self, on_chunk: ChunkCallback) -> Self {
        self.on_chunk = Some(on_chunk);
        self
    }

    // ========================================================================
    // Static checks
    // ========================================================================

    /// Check one step against the live registry. Every placeholder still in
    /// the input is an issue.
    pub fn validate_step(&self, step: &PlanStep) -> Vec<ValidationIssue> {
        self.check_step(step, &HashSet::new())
    }

    /// Check a whole plan before anything runs.
    ///
    /// `<stepN_field>` references to earlier steps are legal here since they
    /// are substituted at execution time.
    pub fn validate_plan(&self, steps: &[PlanStep]) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut earlier: HashSet<String> = HashSet::new();

        for (index, step) in steps.iter().enumerate() {
            if !seen_ids.insert(step.step_id.as_str()) {
                issues.push(ValidationIssue {
                    step_id: step.step_id.clone(),
                    tool_name: step.tool.clone(),
                    issue: format!("Step id '{}' is used more than once.", step.step_id),
                    suggestion: "Give every step a unique step_id.".to_string(),
                    kind: IssueKind::DuplicateStep,
                });
            }
            issues.extend(self.check_step(step, &earlier));
            earlier.insert(format!("step{}", index + 1));
            earlier.insert(step.step_id.clone());
        }
        issues
    }

    fn check_step(&self, step: &PlanStep, earlier: &HashSet<String>) -> Vec<ValidationIssue> {
        let issue = |kind: IssueKind, issue: String, suggestion: String| ValidationIssue {
            step_id: step.step_id.clone(),
            tool_name: step.tool.clone(),
            issue,
            suggestion,
            kind,
        };

        let Some(descriptor) = self.registry.descriptor(&step.tool) else {
            return vec![issue(
                IssueKind::UnknownTool,
                format!("Tool '{}' does not exist.", step.tool),
                format!("Available tools: {}", self.registry.available_names().join(", ")),
            )];
        };
        if !self.registry.is_enabled(&descriptor) {
            return vec![issue(
                IssueKind::DisabledTool,
                format!("Tool '{}' is disabled in permission settings.", step.tool),
                "Enable the tool or choose a different one.".to_string(),
            )];
        }

        let mut issues = Vec::new();
        let unresolved: Vec<String> = find_unresolved(&step.input)
            .into_iter()
            .filter(|p| !refers_to_earlier_step(p, earlier))
            .collect();
        if !unresolved.is_empty() {
            issues.push(issue(
                IssueKind::UnresolvedPlaceholder,
                format!("Unresolved placeholder(s): {}", unresolved.join(", ")),
                "Replace them with concrete values or with fields produced by earlier steps."
                    .to_string(),
            ));
        }

        if self.registry.is_meta_tool(&step.tool) {
            return issues;
        }

        let schema = &descriptor.input_schema;
        let Some(input) = structured_input(&step.input, schema) else {
            issues.push(issue(
                IssueKind::InvalidFormat,
                "Input is not a structured object and the tool takes several parameters."
                    .to_string(),
                format!("Pass an object with: {}", supported(schema)),
            ));
            return issues;
        };

        let missing: Vec<&str> = required(schema)
            .into_iter()
            .filter(|name| !input.contains_key(*name))
            .collect();
        let props = properties(schema);
        let unknown: Vec<&str> = input
            .keys()
            .filter(|k| !props.is_some_and(|p| p.contains_key(k.as_str())))
            .map(String::as_str)
            .collect();

        if missing.is_empty() && unknown.is_empty() {
            return issues;
        }

        let mut problem = Vec::new();
        let mut advice = Vec::new();
        if !missing.is_empty() {
            problem.push(format!("Missing required parameter(s): {}.", missing.join(", ")));
            let described: Vec<String> = missing
                .iter()
                .map(|name| match property_description(schema, name) {
                    Some(desc) if !desc.is_empty() => format!("{name} ({desc})"),
                    _ => name.to_string(),
                })
                .collect();
            advice.push(format!("Provide {}.", described.join(", ")));
        }
        if !unknown.is_empty() {
            problem.push(format!("Unknown parameter(s): {}.", unknown.join(", ")));
            advice.push(format!("Supported parameters: {}.", supported(schema)));
        }
        issues.push(issue(IssueKind::Parameters, problem.join(" "), advice.join(" ")));
        issues
    }

    // ========================================================================
    // Correction
    // ========================================================================

    /// One model call covering every correctable issue. Model and parse
    /// failures leave the steps as they were; only cancellation is an error.
    pub async fn correct_plan(
        &self,
        steps: &[PlanStep],
        issues: &[ValidationIssue],
        cancel: &CancellationToken,
    ) -> Result<(Vec<PlanStep>, usize), EngineError> {
        let correctable: Vec<ValidationIssue> = issues
            .iter()
            .filter(|i| i.kind.is_correctable())
            .cloned()
            .collect();
        if correctable.is_empty() {
            return Ok((steps.to_vec(), 0));
        }

        let offending: HashSet<&str> = correctable.iter().map(|i| i.step_id.as_str()).collect();
        let offending_steps: Vec<&PlanStep> = steps
            .iter()
            .filter(|s| offending.contains(s.step_id.as_str()))
            .collect();
        let mut tools: Vec<&str> = offending_steps.iter().map(|s| s.tool.as_str()).collect();
        tools.sort_unstable();
        tools.dedup();
        let reference = self.registry.tool_reference(&tools);
        let prompt = prompts::correction_prompt(&offending_steps, &correctable, &reference);

        let reply = match complete_text(
            self.llm.as_ref(),
            prompts::CORRECTION_SYSTEM,
            vec![Message::user(prompt)],
            self.params,
            self.on_chunk.as_ref(),
            cancel,
        )
        .await
        {
            Ok(text) => text,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                tracing::warn!("Correction call failed, keeping original steps: {}", e);
                return Ok((steps.to_vec(), 0));
            }
        };

        let corrections = match parse_corrections(&reply) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("{}", e);
                Vec::new()
            }
        };
        let mut by_step: HashMap<&str, &Correction> = HashMap::new();
        for c in &corrections {
            if offending.contains(c.step_id.as_str()) {
                by_step.insert(c.step_id.as_str(), c);
            } else {
                tracing::debug!("Ignoring correction for step '{}' without issues", c.step_id);
            }
        }

        let mut applied = 0;
        let corrected = steps
            .iter()
            .map(|step| {
                if !offending.contains(step.step_id.as_str()) {
                    return step.clone();
                }
                let mut next = match by_step.get(step.step_id.as_str()) {
                    Some(c) => {
                        applied += 1;
                        let schema = self
                            .registry
                            .descriptor(&step.tool)
                            .map(|d| d.input_schema)
                            .unwrap_or_else(empty_object_schema);
                        self.drop_unknown_parameters(merge_correction(step, &c.corrected_input, &schema))
                    }
                    None => step.clone(),
                };
                self.recover_missing_path(&mut next);
                next
            })
            .collect();
        tracing::info!("Applied {} correction(s) to {} offending step(s)", applied, offending.len());
        Ok((corrected, applied))
    }

    /// Validate, correct if needed, and re-validate.
    #[tracing::instrument(skip_all, fields(steps = steps.len()))]
    pub async fn validate_and_correct(
        &self,
        steps: Vec<PlanStep>,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport, EngineError> {
        let issues = self.validate_plan(&steps);
        if !issues.iter().any(|i| i.kind.is_correctable()) {
            return Ok(ValidationReport {
                steps,
                remaining: issues.clone(),
                issues,
                issues_fixed: 0,
                corrections_applied: 0,
            });
        }

        tracing::info!("Validation found {} issue(s), requesting corrections", issues.len());
        let (corrected, applied) = self.correct_plan(&steps, &issues, cancel).await?;
        let remaining = self.validate_plan(&corrected);
        Ok(ValidationReport {
            steps: corrected,
            issues_fixed: issues.len().saturating_sub(remaining.len()),
            issues,
            remaining,
            corrections_applied: applied,
        })
    }

    /// Single-step variant used by the executor before dispatch.
    pub async fn correct_step(
        &self,
        step: &PlanStep,
        issues: &[ValidationIssue],
        cancel: &CancellationToken,
    ) -> Result<PlanStep, EngineError> {
        let (mut corrected, _) = self
            .correct_plan(std::slice::from_ref(step), issues, cancel)
            .await?;
        Ok(corrected.pop().unwrap_or_else(|| step.clone()))
    }

    /// After a correction, keys the tool does not declare are dropped: the
    /// model was shown them as unknown parameters and patched around them.
    fn drop_unknown_parameters(&self, mut step: PlanStep) -> PlanStep {
        if self.registry.is_meta_tool(&step.tool) {
            return step;
        }
        let Some(descriptor) = self.registry.descriptor(&step.tool) else {
            return step;
        };
        if let (Value::Object(input), Some(props)) =
            (&mut step.input, properties(&descriptor.input_schema))
        {
            input.retain(|key, _| {
                let known = props.contains_key(key);
                if !known {
                    tracing::debug!("Dropping unknown parameter '{}' from corrected step", key);
                }
                known
            });
        }
        step
    }

    /// Fill a missing `path` for file tools from a file name in the reason.
    fn recover_missing_path(&self, step: &mut PlanStep) {
        if !self.config.file_tools.iter().any(|t| *t == step.tool) {
            return;
        }
        let has_path = step
            .input
            .get("path")
            .and_then(Value::as_str)
            .is_some_and(|p| !p.trim().is_empty());
        if has_path {
            return;
        }
        let Some(found) = step
            .reason
            .as_deref()
            .and_then(|r| recover_path(r, &self.path_patterns))
        else {
            return;
        };
        tracing::info!("Recovered path '{}' for step '{}' from its reason", found, step.step_id);
        let mut input = match std::mem::take(&mut step.input) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        input.insert("path".to_string(), Value::String(found));
        step.input = Value::Object(input);
    }
}

fn refers_to_earlier_step(placeholder: &str, earlier: &HashSet<String>) -> bool {
    let Some(body) = placeholder.strip_prefix('<').and_then(|p| p.strip_suffix('>')) else {
        return false;
    };
    let Some(rest) = body.strip_prefix("step") else {
        return false;
    };
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    !digits.is_empty() && earlier.contains(&format!("step{digits}"))
}

fn supported(schema: &Value) -> String {
    match properties(schema) {
        Some(p) if !p.is_empty() => p.keys().cloned().collect::<Vec<_>>().join(", "),
        _ => "(none)".to_string(),
    }
}

/// The input as an object, if the schema allows reading it as one.
fn structured_input(input: &Value, schema: &Value) -> Option<Map<String, Value>> {
    match input {
        Value::Object(map) => Some(map.clone()),
        Value::Null => Some(Map::new()),
        other => {
            if let Value::String(s) = other {
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(s.trim()) {
                    return Some(map);
                }
            }
            match required(schema).as_slice() {
                [only] => {
                    let mut map = Map::new();
                    map.insert(only.to_string(), other.clone());
                    Some(map)
                }
                _ => None,
            }
        }
    }
}

#[derive(Deserialize)]
struct CorrectionEnvelope {
    corrections: Vec<Correction>,
}

/// Strict parse of the fenced `{"corrections": [...]}` block, then
/// per-object recovery.
pub fn parse_corrections(text: &str) -> Result<Vec<Correction>, EngineError> {
    if let Some(envelope) = parse_structured::<CorrectionEnvelope>(text) {
        return Ok(envelope.corrections);
    }
    let recovered: Vec<Correction> = recover_objects(text, |v| {
        v.get("step_id").is_some() && v.get("corrected_input").is_some_and(Value::is_object)
    })
    .into_iter()
    .filter_map(|v| serde_json::from_value(v).ok())
    .collect();

    if recovered.is_empty() {
        let preview: String = text.chars().take(200).collect();
        return Err(EngineError::CorrectionParseError(preview));
    }
    tracing::debug!("Recovered {} correction(s) by brace scan", recovered.len());
    Ok(recovered)
}

fn looks_like_example_path(value: &Value) -> bool {
    value.as_str().is_some_and(|s| {
        let lower = s.to_ascii_lowercase();
        lower.contains("example") || lower.contains("file.txt")
    })
}

/// Apply a sparse patch. Keys not in the patch are untouched; a real `path`
/// is never replaced by an example-looking one. A raw (non-object) input is
/// first shaped against `schema` so its value survives the merge.
pub fn merge_correction(step: &PlanStep, patch: &Map<String, Value>, schema: &Value) -> PlanStep {
    let mut input = structured_input(&step.input, schema)
        .unwrap_or_else(|| map_input(&step.input, schema));

    for (key, value) in patch {
        if key == "path" {
            let original_missing = match input.get("path") {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            };
            if !original_missing && looks_like_example_path(value) {
                tracing::debug!("Rejected example path {} for step '{}'", value, step.step_id);
                continue;
            }
        }
        input.insert(key.clone(), value.clone());
    }

    PlanStep {
        input: Value::Object(input),
        ..step.clone()
    }
}

fn path_patterns(extensions: &[String]) -> Vec<Regex> {
    if extensions.is_empty() {
        return Vec::new();
    }
    let ext = extensions
        .iter()
        .map(|e| regex::escape(e.trim_start_matches('.')))
        .collect::<Vec<_>>()
        .join("|");
    [
        format!(r#"["'`]([^"'`\n]+\.(?:{ext}))["'`]"#),
        format!(r#"(?:^|[\s(])([A-Za-z0-9_\-./\\]+\.(?:{ext}))(?:$|[\s),.;:!?])"#),
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
}

/// First file-name-shaped token in `text`: quoted names before bare ones.
fn recover_path(text: &str, patterns: &[Regex]) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(text).and_then(|c| c.get(1)))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_keeps_real_path_over_example() {
        let step = PlanStep::new("s1", "read_file", json!({"path": "notes/today.md"}));
        let patch = json!({"path": "example.txt"});
        let merged = merge_correction(&step, patch.as_object().unwrap(), &json!({}));
        assert_eq!(merged.input["path"], "notes/today.md");

        let step = PlanStep::new("s1", "read_file", json!({"path": ""}));
        let merged = merge_correction(&step, patch.as_object().unwrap(), &json!({}));
        assert_eq!(merged.input["path"], "example.txt");
    }

    #[test]
    fn test_merge_is_sparse_and_keeps_dependencies() {
        let step = PlanStep::new("s2", "write_file", json!({"path": "a.md", "content": "old", "mode": "w"}))
            .with_dependencies(["s1"]);
        let patch = json!({"content": "new", "path": "b.md"});
        let merged = merge_correction(&step, patch.as_object().unwrap(), &json!({}));
        assert_eq!(merged.input, json!({"path": "b.md", "content": "new", "mode": "w"}));
        assert_eq!(merged.dependencies, step.dependencies);
    }

    #[test]
    fn test_merge_keeps_raw_string_input() {
        let schema = json!({
            "type": "object",
            "properties": {"path": {"type": "string"}, "encoding": {"type": "string"}},
            "required": ["path"]
        });
        let step = PlanStep::new("s1", "read_file", json!("notes.md"));
        let patch = json!({"encoding": "utf-8"});
        let merged = merge_correction(&step, patch.as_object().unwrap(), &schema);
        assert_eq!(merged.input, json!({"path": "notes.md", "encoding": "utf-8"}));

        let step = PlanStep::new("s1", "read_file", json!("{\"path\": \"a.md\"}"));
        let merged = merge_correction(&step, patch.as_object().unwrap(), &schema);
        assert_eq!(merged.input, json!({"path": "a.md", "encoding": "utf-8"}));
    }

    #[test]
    fn test_parse_corrections_strict_and_recovered() {
        let strict = "```json\n{\"corrections\": [{\"step_id\": \"s1\", \"corrected_input\": {\"query\": \"todo\"}}]}\n```";
        let c = parse_corrections(strict).unwrap();
        assert_eq!(c[0].corrected_input["query"], "todo");

        let broken = "{\"corrections\": [{\"step_id\": 3, \"corrected_input\": {\"a\": 1}}, {\"step_id\": \"s4\"";
        let c = parse_corrections(broken).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].step_id, "3");

        assert!(matches!(
            parse_corrections("I cannot help with that."),
            Err(EngineError::CorrectionParseError(_))
        ));
    }

    #[test]
    fn test_recover_path_from_reason() {
        let patterns = path_patterns(&["md".into(), "txt".into()]);
        assert_eq!(
            recover_path("Read the file 'daily notes.md' for todos", &patterns).as_deref(),
            Some("daily notes.md")
        );
        assert_eq!(
            recover_path("Summarize journal/2024-01-01.md.", &patterns).as_deref(),
            Some("journal/2024-01-01.md")
        );
        assert_eq!(recover_path("Summarize the journal", &patterns), None);
    }

    #[test]
    fn test_refers_to_earlier_step() {
        let earlier: HashSet<String> = ["step1".to_string()].into_iter().collect();
        assert!(refers_to_earlier_step("<step1_latitude>", &earlier));
        assert!(!refers_to_earlier_step("<step2_latitude>", &earlier));
        assert!(!refers_to_earlier_step("<city_name>", &earlier));
    }

    #[test]
    fn test_structured_input_wraps_single_required() {
        let schema = json!({"type": "object", "properties": {"q": {"type": "string"}}, "required": ["q"]});
        assert_eq!(structured_input(&json!("hi"), &schema).unwrap()["q"], "hi");
        let two = json!({"type": "object", "properties": {"a": {}, "b": {}}, "required": ["a", "b"]});
        assert!(structured_input(&json!("hi"), &two).is_none());
    }
}
