//! Failure classification: which regeneration strategies apply to a failed
//! attempt.
//!
//! Rules are an ordered table of `(name, predicate, strategy)`. Adding a
//! classification means adding a row; the executor tries the strategies in
//! table order and stops at the first that produces a replacement step.

use praxis_core::{EngineError, FailureKind, PlaceholderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Same tool, corrected input.
    FixParameters,
    /// A different tool whose name contains the failed one's.
    AlternateTool,
    /// Point a `<stepN_field>` reference at a field that exists.
    FixPlaceholder,
}

/// Where a failed attempt broke.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOrigin {
    /// Placeholder substitution before dispatch.
    Placeholder(PlaceholderError),
    /// Static validation right before dispatch.
    Validation,
    /// The registry's dispatch.
    Dispatch(FailureKind),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub tool: String,
    pub message: String,
    pub origin: FailureOrigin,
}

impl StepFailure {
    pub fn is_permission(&self) -> bool {
        matches!(self.origin, FailureOrigin::Dispatch(kind) if kind.is_permission())
    }

    pub fn placeholder(&self) -> Option<&PlaceholderError> {
        match &self.origin {
            FailureOrigin::Placeholder(err) => Some(err),
            _ => None,
        }
    }

    /// The taxonomy entry reported for this failure.
    pub fn to_error(&self, step_id: &str) -> EngineError {
        match &self.origin {
            FailureOrigin::Placeholder(err) => EngineError::UnresolvedPlaceholder {
                step_id: step_id.to_string(),
                placeholder: err.placeholder.clone(),
            },
            FailureOrigin::Validation => EngineError::SchemaViolation {
                step_id: step_id.to_string(),
                detail: self.message.clone(),
            },
            FailureOrigin::Dispatch(FailureKind::NotFound) => {
                EngineError::ToolNotFound(self.tool.clone())
            }
            FailureOrigin::Dispatch(FailureKind::Disabled | FailureKind::Declined) => {
                EngineError::ToolDisabledByPermission(self.message.clone())
            }
            FailureOrigin::Dispatch(FailureKind::Call | FailureKind::Result) => {
                EngineError::ToolExecutionError {
                    tool: self.tool.clone(),
                    message: self.message.clone(),
                }
            }
        }
    }
}

type Predicate = fn(&StepFailure, &str) -> bool;

fn mentions_any(lower: &str, words: &[&str]) -> bool {
    words.iter().any(|w| lower.contains(w))
}

fn parameter_problem(failure: &StepFailure, lower: &str) -> bool {
    failure.placeholder().is_none() && mentions_any(lower, &["parameter", "required", "validation"])
}

fn tool_unusable(failure: &StepFailure, lower: &str) -> bool {
    failure.placeholder().is_none() && mentions_any(lower, &["not found", "unavailable", "api key"])
}

fn placeholder_unresolved(failure: &StepFailure, _lower: &str) -> bool {
    failure.placeholder().is_some()
}

const RULES: &[(&str, Predicate, RecoveryStrategy)] = &[
    ("parameter", parameter_problem, RecoveryStrategy::FixParameters),
    ("unusable-tool", tool_unusable, RecoveryStrategy::AlternateTool),
    ("placeholder", placeholder_unresolved, RecoveryStrategy::FixPlaceholder),
];

/// Strategies matching `failure`, in rule order. Permission failures match
/// nothing: enabling a tool is the user's call.
pub fn classify(failure: &StepFailure) -> Vec<RecoveryStrategy> {
    if failure.is_permission() {
        return Vec::new();
    }
    let lower = failure.message.to_lowercase();
    RULES
        .iter()
        .filter(|(_, matches, _)| matches(failure, &lower))
        .map(|(name, _, strategy)| {
            tracing::debug!(rule = *name, "failure classified");
            *strategy
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatch(message: &str, kind: FailureKind) -> StepFailure {
        StepFailure {
            tool: "web_search".into(),
            message: message.into(),
            origin: FailureOrigin::Dispatch(kind),
        }
    }

    #[test]
    fn test_keyword_rules_case_insensitive() {
        assert_eq!(
            classify(&dispatch("Missing REQUIRED field", FailureKind::Call)),
            vec![RecoveryStrategy::FixParameters]
        );
        assert_eq!(
            classify(&dispatch("Tool not found: web_search", FailureKind::NotFound)),
            vec![RecoveryStrategy::AlternateTool]
        );
        assert_eq!(
            classify(&dispatch("Invalid API key", FailureKind::Result)),
            vec![RecoveryStrategy::AlternateTool]
        );
    }

    #[test]
    fn test_rule_order_preserved() {
        let f = dispatch("validation failed: endpoint unavailable", FailureKind::Call);
        assert_eq!(
            classify(&f),
            vec![RecoveryStrategy::FixParameters, RecoveryStrategy::AlternateTool]
        );
    }

    #[test]
    fn test_unmatched_and_permission() {
        assert!(classify(&dispatch("connection reset", FailureKind::Call)).is_empty());
        // Contains "unavailable" but permission failures are never regenerated.
        let f = dispatch("Tool 'x' is unavailable: server 'y' is disabled", FailureKind::Disabled);
        assert!(classify(&f).is_empty());
        assert!(matches!(f.to_error("s1"), EngineError::ToolDisabledByPermission(_)));
    }

    #[test]
    fn test_placeholder_only_matches_placeholder_rule() {
        let err = PlaceholderError {
            placeholder: "<step1_lat>".into(),
            available_fields: vec!["step1_latitude".into()],
        };
        let f = StepFailure {
            tool: "weather".into(),
            message: err.to_string(),
            origin: FailureOrigin::Placeholder(err),
        };
        assert_eq!(classify(&f), vec![RecoveryStrategy::FixPlaceholder]);
        assert!(matches!(
            f.to_error("s2"),
            EngineError::UnresolvedPlaceholder { ref placeholder, .. } if placeholder == "<step1_lat>"
        ));
    }
}
