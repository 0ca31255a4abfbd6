//! Tool abstraction types shared by the registry, the executor and the
//! remote catalog bridge.
//!
//! Lives in `praxis_core` so that `praxis_mcp` can provide a remote source
//! without depending on the reasoning crate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a tool comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolSource {
    BuiltIn,
    RemoteServer { server_id: String },
}

/// A tool as exposed by the registry. `input_schema` is always canonical
/// (see [`crate::schema`]), except for meta tools which pass through as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    pub source: ToolSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl ToolDescriptor {
    pub fn server_id(&self) -> Option<&str> {
        match &self.source {
            ToolSource::BuiltIn => None,
            ToolSource::RemoteServer { server_id } => Some(server_id),
        }
    }
}

/// Why a dispatch did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No catalog knows the name.
    NotFound,
    /// The tool (or its server) is switched off in the permission store.
    Disabled,
    /// Confirmation was required and refused.
    Declined,
    /// The call itself errored or panicked.
    Call,
    /// The call returned, but its payload reports failure.
    Result,
}

impl FailureKind {
    /// Permission outcomes are never auto-corrected.
    pub fn is_permission(self) -> bool {
        matches!(self, FailureKind::Disabled | FailureKind::Declined)
    }
}

/// Uniform outcome of `ToolRegistry::execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock milliseconds spent inside the dispatch boundary.
    pub execution_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ToolExecution {
    pub fn ok(result: Value, execution_time: u64) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            execution_time,
            failure: None,
        }
    }

    pub fn failed(kind: FailureKind, error: String, execution_time: u64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            execution_time,
            failure: Some(kind),
        }
    }

    /// Result-level failure keeps the payload for the ledger.
    pub fn failed_with_result(result: Value, error: String, execution_time: u64) -> Self {
        Self {
            success: false,
            result: Some(result),
            error: Some(error),
            execution_time,
            failure: Some(FailureKind::Result),
        }
    }
}

/// An in-process tool.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Unique name used for dispatch.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Raw JSON schema for the input. The registry normalizes it.
    fn input_schema(&self) -> Value;

    fn output_schema(&self) -> Option<Value> {
        None
    }

    fn category(&self) -> Option<&str> {
        None
    }

    /// Execute the tool. Errors become `success: false` at the registry
    /// boundary; so does a returned object carrying `"success": false`.
    async fn execute(&self, input: &Value) -> anyhow::Result<Value>;
}

/// A tool advertised by a remote server, schema still raw.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTool {
    pub server_id: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Option<Value>,
}

/// Payload returned by a remote call. `is_error` is the server's own
/// failure flag.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCallResult {
    pub content: Value,
    pub is_error: bool,
}

/// A server-backed tool catalog.
#[async_trait::async_trait]
pub trait RemoteToolSource: Send + Sync {
    /// Current snapshot of the catalog. May change between calls.
    fn tools(&self) -> Vec<RemoteTool>;

    async fn call(&self, server_id: &str, tool: &str, args: &Value)
        -> anyhow::Result<RemoteCallResult>;
}
