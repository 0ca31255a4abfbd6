use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// One planned invocation of a named tool.
///
/// `dependencies` is provenance: validation and regeneration replace `tool`
/// and `input` but always carry `dependencies` forward untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(deserialize_with = "string_or_number")]
    pub step_id: String,
    pub tool: String,
    /// Untyped argument blob: usually an object, sometimes a raw string.
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, deserialize_with = "id_set")]
    pub dependencies: BTreeSet<String>,
}

impl PlanStep {
    pub fn new(step_id: impl Into<String>, tool: impl Into<String>, input: Value) -> Self {
        Self {
            step_id: step_id.into(),
            tool: tool.into(),
            input,
            reason: None,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// The input as an object, if it already is one.
    pub fn input_object(&self) -> Option<&Map<String, Value>> {
        self.input.as_object()
    }
}

/// Parse a planner's output: either a bare array of steps or `{"steps": [...]}`.
pub fn parse_plan(text: &str) -> anyhow::Result<Vec<PlanStep>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PlanShape {
        Bare(Vec<PlanStep>),
        Wrapped { steps: Vec<PlanStep> },
    }

    let shape: PlanShape = serde_json::from_str(text)?;
    Ok(match shape {
        PlanShape::Bare(steps) | PlanShape::Wrapped { steps } => steps,
    })
}

/// A problem found by static validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub step_id: String,
    pub tool_name: String,
    pub issue: String,
    pub suggestion: String,
    #[serde(skip)]
    pub kind: IssueKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IssueKind {
    UnknownTool,
    DisabledTool,
    DuplicateStep,
    UnresolvedPlaceholder,
    InvalidFormat,
    #[default]
    Parameters,
}

impl IssueKind {
    /// Whether a model-produced argument patch can fix this class of issue.
    pub fn is_correctable(self) -> bool {
        matches!(
            self,
            IssueKind::UnresolvedPlaceholder | IssueKind::InvalidFormat | IssueKind::Parameters
        )
    }
}

/// A sparse argument patch for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    #[serde(deserialize_with = "string_or_number")]
    pub step_id: String,
    pub corrected_input: Map<String, Value>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number id, got {other}"
        ))),
    }
}

fn id_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids = match Value::deserialize(deserializer)? {
        Value::Null => return Ok(BTreeSet::new()),
        Value::Array(items) => items,
        single => vec![single],
    };
    ids.into_iter()
        .map(|id| match id {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "expected a step id, got {other}"
            ))),
        })
        .collect()
}
