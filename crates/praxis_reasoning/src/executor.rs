use crate::input_mapping::map_input;
use crate::json_recovery::first_object;
use crate::llm::{complete_text, ChunkCallback, CompletionParams, LlmClient, Message};
use crate::placeholder::substitute;
use crate::prompts;
use crate::recovery::{classify, FailureOrigin, RecoveryStrategy, StepFailure};
use crate::tool_registry::ToolRegistry;
use crate::validator::PlanValidator;
use chrono::Utc;
use praxis_core::config::{RecoveryConfig, UnmatchedFailure};
use praxis_core::ledger::summarize_observation;
use praxis_core::schema::empty_object_schema;
use praxis_core::{
    EngineError, ExecutionLedger, ExecutionResult, FailureKind, PlanStep, ValidationIssue,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    /// Not run because a dependency did not complete.
    Skipped,
    Cancelled,
}

/// What finally happened to one plan step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step_id: String,
    pub status: StepStatus,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// The step as last attempted, after corrections and regenerations.
    pub final_step: PlanStep,
    pub result: Option<Value>,
    pub last_error: Option<String>,
    pub error: Option<EngineError>,
}

impl StepOutcome {
    pub fn skipped(step: &PlanStep, reason: String) -> Self {
        Self {
            step_id: step.step_id.clone(),
            status: StepStatus::Skipped,
            attempts: 0,
            final_step: step.clone(),
            result: None,
            last_error: Some(reason),
            error: None,
        }
    }

    pub fn cancelled(step: &PlanStep, attempts: u32) -> Self {
        Self {
            step_id: step.step_id.clone(),
            status: StepStatus::Cancelled,
            attempts,
            final_step: step.clone(),
            result: None,
            last_error: None,
            error: Some(EngineError::Cancelled),
        }
    }

    fn failed(step: PlanStep, attempts: u32, failure: &StepFailure) -> Self {
        Self {
            step_id: step.step_id.clone(),
            status: StepStatus::Failed,
            attempts,
            error: Some(failure.to_error(&step.step_id)),
            final_step: step,
            result: None,
            last_error: Some(failure.message.clone()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// Outcome of asking the model for a replacement step.
#[derive(Debug, Clone, PartialEq)]
pub enum Regeneration {
    Replaced(PlanStep),
    /// No strategy applied, the model call failed, or the reply held no
    /// usable step.
    Unchanged,
}

enum AttemptError {
    Failed(Box<StepFailure>, PlanStep),
    Cancelled,
}

pub struct SelfHealingExecutor {
    registry: Arc<ToolRegistry>,
    validator: Arc<PlanValidator>,
    llm: Arc<dyn LlmClient>,
    params: CompletionParams,
    config: RecoveryConfig,
    on_chunk: Option<ChunkCallback>,
}

impl SelfHealingExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        validator: Arc<PlanValidator>,
        llm: Arc<dyn LlmClient>,
        params: CompletionParams,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            registry,
            validator,
            llm,
            params,
            config,
            on_chunk: None,
        }
    }

    pub fn with_chunk_callback(mut self, on_chunk: ChunkCallback) -> Self {
        self.on_chunk = Some(on_chunk);
        self
    }

    /// Run one step to completion or failure, regenerating it on failure
    /// within the configured budget. Every dispatched attempt is appended to
    /// `ledger`.
    pub async fn execute_step(
        &self,
        step: &PlanStep,
        step_index: usize,
        ledger: &mut ExecutionLedger,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        self.run_step(step, step_index, ledger, cancel, false).await
    }

    /// Like [`execute_step`](Self::execute_step) for a step the plan-level
    /// correction pass already tried to fix. Its remaining issues go
    /// straight to regeneration instead of a second correction call.
    pub async fn execute_corrected_step(
        &self,
        step: &PlanStep,
        step_index: usize,
        ledger: &mut ExecutionLedger,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        self.run_step(step, step_index, ledger, cancel, true).await
    }

    #[tracing::instrument(skip(self, step, ledger, cancel), fields(step = %step.step_id, tool = %step.tool))]
    async fn run_step(
        &self,
        step: &PlanStep,
        step_index: usize,
        ledger: &mut ExecutionLedger,
        cancel: &CancellationToken,
        already_corrected: bool,
    ) -> StepOutcome {
        let mut current = step.clone();
        let mut attempts = 0;
        let mut regenerations = 0;

        loop {
            if cancel.is_cancelled() {
                return StepOutcome::cancelled(&current, attempts);
            }
            attempts += 1;

            let correct = !(already_corrected && current == *step);
            let (failure, attempted) = match self.attempt(&current, step_index, ledger, correct, cancel).await {
                Ok((done, result)) => {
                    tracing::info!("Step '{}' completed on attempt {}", step.step_id, attempts);
                    return StepOutcome {
                        step_id: step.step_id.clone(),
                        status: StepStatus::Completed,
                        attempts,
                        final_step: done,
                        result: Some(result),
                        last_error: None,
                        error: None,
                    };
                }
                Err(AttemptError::Cancelled) => return StepOutcome::cancelled(&current, attempts),
                Err(AttemptError::Failed(failure, attempted)) => (failure, attempted),
            };
            tracing::warn!("Step '{}' attempt {} failed: {}", step.step_id, attempts, failure.message);

            if failure.is_permission() {
                return StepOutcome::failed(attempted, attempts, &failure);
            }
            if regenerations >= self.config.max_regenerations {
                tracing::warn!("Step '{}' exhausted its regeneration budget", step.step_id);
                return StepOutcome::failed(attempted, attempts, &failure);
            }
            regenerations += 1;

            match self.regenerate(&attempted, step, &failure, step_index, ledger, cancel).await {
                Err(_) => return StepOutcome::cancelled(&attempted, attempts),
                Ok(Regeneration::Replaced(next)) => {
                    tracing::info!(
                        "Step '{}' regenerated: {} -> {}",
                        step.step_id,
                        attempted.tool,
                        next.tool
                    );
                    current = next;
                }
                Ok(Regeneration::Unchanged) => match self.config.on_unmatched_failure {
                    UnmatchedFailure::MarkFailed => {
                        return StepOutcome::failed(attempted, attempts, &failure);
                    }
                    UnmatchedFailure::RetryOriginal => {
                        tracing::debug!("Retrying step '{}' unchanged", step.step_id);
                    }
                },
            }
        }
    }

    /// Substitute, map, validate (correcting once if `correct`), dispatch.
    async fn attempt(
        &self,
        step: &PlanStep,
        step_index: usize,
        ledger: &mut ExecutionLedger,
        correct: bool,
        cancel: &CancellationToken,
    ) -> Result<(PlanStep, Value), AttemptError> {
        let mut prepared = self.prepare(step, ledger)?;

        let issues = correctable_issues(self.validator.validate_step(&prepared));
        if !issues.is_empty() {
            if correct {
                tracing::info!("Step '{}' has {} issue(s) before dispatch, correcting", step.step_id, issues.len());
                let corrected = match self.validator.correct_step(&prepared, &issues, cancel).await {
                    Ok(c) => c,
                    Err(EngineError::Cancelled) => return Err(AttemptError::Cancelled),
                    Err(_) => prepared.clone(),
                };
                prepared = self.prepare(&corrected, ledger)?;
            }
            let still = correctable_issues(self.validator.validate_step(&prepared));
            if !still.is_empty() {
                let detail: Vec<String> = still.iter().map(|i| i.issue.clone()).collect();
                let failure = StepFailure {
                    tool: prepared.tool.clone(),
                    message: format!("validation failed: {}", detail.join(" ")),
                    origin: FailureOrigin::Validation,
                };
                return Err(AttemptError::Failed(Box::new(failure), prepared));
            }
        }

        let execution = self.registry.execute(&prepared.tool, &prepared.input).await;
        ledger.append(ExecutionResult {
            step_id: prepared.step_id.clone(),
            tool_name: prepared.tool.clone(),
            tool_args: prepared.input.clone(),
            observation: summarize_observation(execution.result.as_ref(), execution.error.as_deref()),
            tool_result: execution.result.clone(),
            tool_error: execution.error.clone(),
            timestamp: Utc::now(),
            step_index,
        });

        if execution.success {
            return Ok((prepared, execution.result.unwrap_or(Value::Null)));
        }
        let failure = StepFailure {
            tool: prepared.tool.clone(),
            message: execution
                .error
                .unwrap_or_else(|| format!("Tool '{}' failed", prepared.tool)),
            origin: FailureOrigin::Dispatch(execution.failure.unwrap_or(FailureKind::Call)),
        };
        Err(AttemptError::Failed(Box::new(failure), prepared))
    }

    /// Resolve step references and shape the input for the target tool.
    fn prepare(&self, step: &PlanStep, ledger: &ExecutionLedger) -> Result<PlanStep, AttemptError> {
        let substituted = match substitute(&step.input, ledger) {
            Ok(v) => v,
            Err(err) => {
                let failure = StepFailure {
                    tool: step.tool.clone(),
                    message: err.to_string(),
                    origin: FailureOrigin::Placeholder(err),
                };
                return Err(AttemptError::Failed(Box::new(failure), step.clone()));
            }
        };
        if self.registry.is_meta_tool(&step.tool) {
            return Ok(PlanStep {
                input: substituted,
                ..step.clone()
            });
        }
        let schema = self
            .registry
            .descriptor(&step.tool)
            .map(|d| d.input_schema)
            .unwrap_or_else(empty_object_schema);
        Ok(PlanStep {
            input: Value::Object(map_input(&substituted, &schema)),
            ..step.clone()
        })
    }

    /// Ask the model for a replacement of `failed`.
    ///
    /// Strategies are tried in classification order; the first one that can
    /// build a prompt gets the single model call. Only cancellation is an
    /// error.
    pub async fn regenerate(
        &self,
        failed: &PlanStep,
        original: &PlanStep,
        failure: &StepFailure,
        step_index: usize,
        ledger: &ExecutionLedger,
        cancel: &CancellationToken,
    ) -> Result<Regeneration, EngineError> {
        let context = self.config.ledger_context;

        for strategy in classify(failure) {
            let prompt = match strategy {
                RecoveryStrategy::FixParameters => {
                    let recent: Vec<&ExecutionResult> = ledger.recent(context).iter().collect();
                    let reference = self.registry.tool_reference(&[failed.tool.as_str()]);
                    prompts::fix_parameters_prompt(failed, &failure.message, &recent, &reference)
                }
                RecoveryStrategy::AlternateTool => {
                    let Some(alternative) = self.find_alternative(&failed.tool) else {
                        tracing::debug!("No alternative for '{}', trying next rule", failed.tool);
                        continue;
                    };
                    let reference = self.registry.tool_reference(&[alternative.as_str()]);
                    prompts::alternate_tool_prompt(failed, &failure.message, &alternative, &reference)
                }
                RecoveryStrategy::FixPlaceholder => {
                    let Some(err) = failure.placeholder() else {
                        continue;
                    };
                    let prior = ledger.recent_before(step_index, context);
                    prompts::placeholder_prompt(failed, err, &prior)
                }
            };
            tracing::info!(?strategy, "Regenerating step '{}'", failed.step_id);

            let reply = match complete_text(
                self.llm.as_ref(),
                prompts::REGENERATION_SYSTEM,
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
                    tracing::warn!("Regeneration call failed: {}", e);
                    return Ok(Regeneration::Unchanged);
                }
            };
            return Ok(parse_replacement(&reply, failed, original));
        }

        tracing::info!("No regeneration strategy matched: {}", failure.message);
        Ok(Regeneration::Unchanged)
    }

    /// Declared alternatives first, then the substring heuristic if enabled.
    pub fn find_alternative(&self, failed_tool: &str) -> Option<String> {
        let available = self.registry.available_names();
        if let Some(declared) = self.config.alternatives.get(failed_tool) {
            if let Some(found) = declared
                .iter()
                .find(|alt| alt.as_str() != failed_tool && available.contains(alt))
            {
                return Some(found.clone());
            }
        }
        if !self.config.substring_alternatives {
            return None;
        }
        available
            .into_iter()
            .find(|name| name != failed_tool && name.contains(failed_tool))
    }
}

fn correctable_issues(issues: Vec<ValidationIssue>) -> Vec<ValidationIssue> {
    issues
        .into_iter()
        .filter(|i| i.kind.is_correctable())
        .collect()
}

/// Build the replacement from the first object in the reply. `step_id` and
/// `dependencies` always come from the original step.
pub fn parse_replacement(reply: &str, failed: &PlanStep, original: &PlanStep) -> Regeneration {
    let Some(obj) = first_object(reply) else {
        let err = EngineError::RegenerationParseError(reply.chars().take(200).collect());
        tracing::warn!("{}", err);
        return Regeneration::Unchanged;
    };

    let tool = obj
        .get("tool")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .unwrap_or_else(|| failed.tool.clone());
    let input = obj
        .get("input")
        .or_else(|| obj.get("arguments"))
        .cloned()
        .unwrap_or_else(|| failed.input.clone());
    let reason = obj
        .get("reason")
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| failed.reason.clone());

    if tool == failed.tool && input == failed.input {
        tracing::debug!("Model returned the failed step unchanged");
        return Regeneration::Unchanged;
    }
    Regeneration::Replaced(PlanStep {
        step_id: original.step_id.clone(),
        tool,
        input,
        reason,
        dependencies: original.dependencies.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_replacement_reattaches_identity() {
        let original = PlanStep::new("s2", "weather", json!({"lat": "<step1_lat>"})).with_dependencies(["s1"]);
        let reply = "Sure:\n{\"step_id\": \"zzz\", \"tool\": \"weather\", \"input\": {\"lat\": \"<step1_latitude>\"}, \"dependencies\": []}";
        let Regeneration::Replaced(next) = parse_replacement(reply, &original, &original) else {
            panic!("expected a replacement");
        };
        assert_eq!(next.step_id, "s2");
        assert_eq!(next.dependencies, original.dependencies);
        assert_eq!(next.input["lat"], "<step1_latitude>");
    }

    #[test]
    fn test_parse_replacement_accepts_arguments_key() {
        let original = PlanStep::new("s1", "search", json!({}));
        let reply = "{\"tool\": \"search_v2\", \"arguments\": {\"query\": \"x\"}}";
        let Regeneration::Replaced(next) = parse_replacement(reply, &original, &original) else {
            panic!("expected a replacement");
        };
        assert_eq!(next.tool, "search_v2");
        assert_eq!(next.input, json!({"query": "x"}));
    }

    #[test]
    fn test_parse_replacement_unchanged_cases() {
        let original = PlanStep::new("s1", "search", json!({"query": "x"}));
        assert_eq!(parse_replacement("no idea", &original, &original), Regeneration::Unchanged);
        let same = "{\"tool\": \"search\", \"input\": {\"query\": \"x\"}}";
        assert_eq!(parse_replacement(same, &original, &original), Regeneration::Unchanged);
    }
}
