//! The plan-execution engine: a permission-gated tool registry, a plan
//! validator with model-driven correction, and a self-healing step executor.

pub mod executor;
pub mod input_mapping;
pub mod json_recovery;
pub mod llm;
pub mod placeholder;
pub mod prompts;
pub mod providers;
pub mod recovery;
pub mod retry;
pub mod runner;
pub mod tool_registry;
pub mod validator;

pub use executor::{Regeneration, SelfHealingExecutor, StepOutcome, StepStatus};
pub use llm::{ChunkCallback, CompletionParams, LlmClient, Message, StreamEvent};
pub use runner::{PlanRunReport, PlanRunner};
pub use tool_registry::ToolRegistry;
pub use validator::{PlanValidator, ValidationReport};
