use crate::executor::{SelfHealingExecutor, StepOutcome, StepStatus};
use crate::validator::{PlanValidator, ValidationReport};
use praxis_core::{EngineError, ExecutionLedger, ExecutionResult, PlanStep, ValidationIssue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a caller needs to render a finished run.
#[derive(Debug, Clone)]
pub struct PlanRunReport {
    /// Issues found by static validation before any correction.
    pub issues: Vec<ValidationIssue>,
    /// Issues still present after the correction pass.
    pub remaining_issues: Vec<ValidationIssue>,
    pub issues_fixed: usize,
    pub corrections_applied: usize,
    /// One outcome per plan step, in declared order.
    pub steps: Vec<StepOutcome>,
    pub ledger: ExecutionLedger,
    pub cancelled: bool,
}

impl PlanRunReport {
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub fn all_completed(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(StepOutcome::is_completed)
    }

    pub fn outcome(&self, step_id: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Latest ledger entry per step, i.e. what finally happened.
    pub fn latest_results(&self) -> Vec<&ExecutionResult> {
        self.ledger.latest_by_step()
    }
}

/// Validates a plan, then runs its steps one at a time in declared order.
pub struct PlanRunner {
    validator: Arc<PlanValidator>,
    executor: SelfHealingExecutor,
}

impl PlanRunner {
    pub fn new(validator: Arc<PlanValidator>, executor: SelfHealingExecutor) -> Self {
        Self {
            validator,
            executor,
        }
    }

    /// Validation and correction only, nothing is executed.
    pub async fn validate(
        &self,
        steps: Vec<PlanStep>,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport, EngineError> {
        self.validator.validate_and_correct(steps, cancel).await
    }

    #[tracing::instrument(skip_all, fields(steps = steps.len()))]
    pub async fn run(&self, steps: Vec<PlanStep>, cancel: &CancellationToken) -> PlanRunReport {
        let validation = match self.validator.validate_and_correct(steps.clone(), cancel).await {
            Ok(v) => v,
            Err(_) => {
                tracing::info!("Plan run cancelled during validation");
                return PlanRunReport {
                    issues: Vec::new(),
                    remaining_issues: Vec::new(),
                    issues_fixed: 0,
                    corrections_applied: 0,
                    steps: steps.iter().map(|s| StepOutcome::cancelled(s, 0)).collect(),
                    ledger: ExecutionLedger::new(),
                    cancelled: true,
                };
            }
        };
        if validation.issues_fixed > 0 {
            tracing::info!("Auto-corrected {} validation issue(s)", validation.issues_fixed);
        }

        let plan_ids: HashSet<&str> = validation.steps.iter().map(|s| s.step_id.as_str()).collect();
        let corrected_ids: HashSet<&str> = validation
            .issues
            .iter()
            .filter(|i| i.kind.is_correctable())
            .map(|i| i.step_id.as_str())
            .collect();
        let mut status: HashMap<String, StepStatus> = HashMap::new();
        let mut outcomes = Vec::with_capacity(validation.steps.len());
        let mut ledger = ExecutionLedger::new();
        let mut cancelled = false;

        for (index, step) in validation.steps.iter().enumerate() {
            if cancelled || cancel.is_cancelled() {
                cancelled = true;
                outcomes.push(StepOutcome::cancelled(step, 0));
                continue;
            }
            if status.contains_key(&step.step_id) {
                outcomes.push(StepOutcome::skipped(
                    step,
                    format!("duplicate step id '{}'", step.step_id),
                ));
                continue;
            }

            let blocked = step.dependencies.iter().find(|dep| {
                if !plan_ids.contains(dep.as_str()) {
                    tracing::warn!("Step '{}' depends on unknown step '{}', ignoring", step.step_id, dep);
                    return false;
                }
                status.get(dep.as_str()) != Some(&StepStatus::Completed)
            });
            if let Some(dep) = blocked {
                tracing::info!("Skipping step '{}': dependency '{}' did not complete", step.step_id, dep);
                let outcome = StepOutcome::skipped(step, format!("dependency '{dep}' did not complete"));
                status.insert(step.step_id.clone(), StepStatus::Skipped);
                outcomes.push(outcome);
                continue;
            }

            let outcome = if corrected_ids.contains(step.step_id.as_str()) {
                self.executor.execute_corrected_step(step, index, &mut ledger, cancel).await
            } else {
                self.executor.execute_step(step, index, &mut ledger, cancel).await
            };
            if outcome.status == StepStatus::Cancelled {
                cancelled = true;
            }
            status.insert(step.step_id.clone(), outcome.status);
            outcomes.push(outcome);
        }

        PlanRunReport {
            issues: validation.issues,
            remaining_issues: validation.remaining,
            issues_fixed: validation.issues_fixed,
            corrections_applied: validation.corrections_applied,
            steps: outcomes,
            ledger,
            cancelled,
        }
    }
}
