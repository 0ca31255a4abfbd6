//! Shared vocabulary of the praxis plan engine: tool descriptors, plan
//! steps, the execution ledger, canonical schemas and the permission
//! contract.

pub mod config;
pub mod error;
pub mod ledger;
pub mod permissions;
pub mod plan;
pub mod schema;
pub mod tools;

pub use config::PraxisConfig;
pub use error::{EngineError, PlaceholderError};
pub use ledger::{ExecutionLedger, ExecutionResult};
pub use permissions::{ConfirmationHandler, LivePermissions, PermissionStore};
pub use plan::{Correction, IssueKind, PlanStep, ValidationIssue};
pub use tools::{
    FailureKind, RemoteCallResult, RemoteTool, RemoteToolSource, ToolDescriptor, ToolExecution,
    ToolHandler, ToolSource,
};
