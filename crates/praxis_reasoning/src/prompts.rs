use praxis_core::{ExecutionResult, PlaceholderError, PlanStep, ValidationIssue};

pub const CORRECTION_SYSTEM: &str = "You repair tool-call arguments in an execution plan. \
Answer only with JSON. Never invent file paths or example values when the original step already has a real one.";

pub const REGENERATION_SYSTEM: &str = "You repair a single failed step of an execution plan. \
Answer with exactly one JSON object of the form {\"step_id\": ..., \"tool\": ..., \"input\": {...}, \"reason\": ...} and nothing else.";

fn step_json(step: &PlanStep) -> String {
    let shown = serde_json::json!({
        "step_id": step.step_id,
        "tool": step.tool,
        "input": step.input,
        "reason": step.reason,
    });
    serde_json::to_string_pretty(&shown).unwrap_or_default()
}

/// One line per ledger entry: what ran, and what came back.
pub fn format_ledger(entries: &[&ExecutionResult]) -> String {
    if entries.is_empty() {
        return "(no earlier results)".to_string();
    }
    entries
        .iter()
        .map(|e| {
            let status = if e.succeeded() { "ok" } else { "failed" };
            format!(
                "- step {} ({}) [{}]: {}",
                e.step_id,
                e.tool_name,
                status,
                e.observation.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Batched correction request covering every offending step.
pub fn correction_prompt(
    steps: &[&PlanStep],
    issues: &[ValidationIssue],
    tool_reference: &str,
) -> String {
    let mut out = String::from("The following plan steps failed validation.\n\n== STEPS ==\n");
    for step in steps {
        out.push_str(&step_json(step));
        out.push('\n');
    }
    out.push_str("\n== ISSUES ==\n");
    for issue in issues {
        out.push_str(&format!(
            "- step {} ({}): {} Suggestion: {}\n",
            issue.step_id, issue.tool_name, issue.issue, issue.suggestion
        ));
    }
    out.push_str("\n== TOOLS ==\n");
    out.push_str(tool_reference);
    out.push_str(
        "Return only the arguments that must change, in a fenced block:\n\
```json\n{\"corrections\": [{\"step_id\": \"...\", \"corrected_input\": {\"param\": \"value\"}}]}\n```\n\
Replace placeholders like <step1_field> or <name> with concrete values when they can be inferred from the step reason.",
    );
    out
}

/// Retry with fixed parameters after a parameter or validation error.
pub fn fix_parameters_prompt(
    step: &PlanStep,
    error: &str,
    recent: &[&ExecutionResult],
    tool_reference: &str,
) -> String {
    format!(
        "This step failed:\n{}\n\nError: {}\n\n== RECENT RESULTS ==\n{}\n\n== TOOL ==\n{}\
Rewrite the step with corrected input for the same tool and the same goal.",
        step_json(step),
        error,
        format_ledger(recent),
        tool_reference
    )
}

/// Redo the step with a different tool.
pub fn alternate_tool_prompt(
    step: &PlanStep,
    error: &str,
    alternative: &str,
    tool_reference: &str,
) -> String {
    format!(
        "This step failed because its tool could not be used:\n{}\n\nError: {}\n\n\
Use the tool `{}` instead to achieve the same goal.\n\n== TOOL ==\n{}\
Return the replacement step with \"tool\": \"{}\".",
        step_json(step),
        error,
        alternative,
        tool_reference,
        alternative
    )
}

/// Fix a `<stepN_field>` reference that names a field no earlier step produced.
pub fn placeholder_prompt(
    step: &PlanStep,
    error: &PlaceholderError,
    prior: &[&ExecutionResult],
) -> String {
    let fields = if error.available_fields.is_empty() {
        "(none)".to_string()
    } else {
        error.available_fields.join(", ")
    };
    format!(
        "This step references {} but no earlier step produced that field:\n{}\n\n\
Available fields: {}\n\n== EARLIER RESULTS ==\n{}\n\n\
Rewrite the step so it either uses one of the available fields as <stepN_field> \
or embeds the literal value directly instead of a placeholder.",
        error.placeholder,
        step_json(step),
        fields,
        format_ledger(prior)
    )
}
