//! Error taxonomy shared by the validator, the executor and the registry.

use thiserror::Error;

/// A `<stepN_field>` reference that could not be resolved against the ledger.
///
/// Raised by placeholder substitution before a step is dispatched. It carries
/// the field names that *are* available so recovery can point the model at
/// a real one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not resolve {placeholder} from earlier step results (available fields: {})", format_fields(.available_fields))]
pub struct PlaceholderError {
    pub placeholder: String,
    pub available_fields: Vec<String>,
}

fn format_fields(fields: &[String]) -> String {
    if fields.is_empty() {
        "none".to_string()
    } else {
        fields.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Missing or unknown parameters for the target tool.
    #[error("schema violation in step '{step_id}': {detail}")]
    SchemaViolation { step_id: String, detail: String },

    /// A step-output or generic placeholder survived into the step input.
    #[error("unresolved placeholder in step '{step_id}': {placeholder}")]
    UnresolvedPlaceholder { step_id: String, placeholder: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Surfaced verbatim; enabling a tool is the user's decision.
    #[error("{0}")]
    ToolDisabledByPermission(String),

    #[error("tool '{tool}' failed: {message}")]
    ToolExecutionError { tool: String, message: String },

    #[error("could not recover corrections from model output: {0}")]
    CorrectionParseError(String),

    #[error("could not recover a replacement step from model output: {0}")]
    RegenerationParseError(String),

    #[error("language model call failed: {0}")]
    Llm(String),

    #[error("plan run cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_error_lists_fields() {
        let err = PlaceholderError {
            placeholder: "<step1_lat>".into(),
            available_fields: vec!["step1_latitude".into(), "step1_longitude".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("<step1_lat>"));
        assert!(msg.contains("step1_latitude, step1_longitude"));
    }

    #[test]
    fn test_placeholder_error_without_fields() {
        let err = PlaceholderError {
            placeholder: "<step4_x>".into(),
            available_fields: vec![],
        };
        assert!(err.to_string().contains("available fields: none"));
    }

    #[test]
    fn test_tool_not_found_message() {
        assert_eq!(
            EngineError::ToolNotFound("web_search".into()).to_string(),
            "Tool not found: web_search"
        );
    }
}
