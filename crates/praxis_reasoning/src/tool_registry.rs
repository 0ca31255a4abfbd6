use futures_util::FutureExt;
use praxis_core::permissions::AutoDeny;
use praxis_core::schema::normalize_input_schema;
use praxis_core::{
    ConfirmationHandler, FailureKind, PermissionStore, RemoteToolSource, ToolDescriptor,
    ToolExecution, ToolHandler, ToolSource,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;

// ============================================================================
// ToolRegistry
// ============================================================================

/// One namespace over the in-process handlers and any number of remote
/// catalogs.
///
/// Local handlers are always registered ahead of remote tools, and on a name
/// collision the first registration wins. Remote catalogs are re-read on
/// every call because their owners may rebuild them at any time; permission
/// answers are likewise never cached.
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    order: Vec<String>,
    remotes: Vec<Arc<dyn RemoteToolSource>>,
    permissions: Arc<dyn PermissionStore>,
    confirmation: Arc<dyn ConfirmationHandler>,
    meta_tools: HashSet<String>,
    reported_collisions: Mutex<HashSet<String>>,
}

impl ToolRegistry {
    pub fn new(permissions: Arc<dyn PermissionStore>) -> Self {
        Self {
            handlers: HashMap::new(),
            order: Vec::new(),
            remotes: Vec::new(),
            permissions,
            confirmation: Arc::new(AutoDeny),
            meta_tools: HashSet::new(),
            reported_collisions: Mutex::new(HashSet::new()),
        }
    }

    /// Who to ask when a tool requires confirmation. Defaults to refusing.
    pub fn with_confirmation(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = handler;
        self
    }

    /// Tools whose schema is passed through without normalization.
    pub fn with_meta_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta_tools = names.into_iter().map(Into::into).collect();
        self
    }

    /// Register an in-process tool. A second tool with the same name is
    /// dropped.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.name().to_string();
        if self.handlers.contains_key(&name) {
            tracing::warn!("Tool '{}' already registered, ignoring duplicate", name);
            return;
        }
        tracing::debug!("Registered tool: {}", name);
        self.order.push(name.clone());
        self.handlers.insert(name, handler);
    }

    pub fn add_remote_source(&mut self, source: Arc<dyn RemoteToolSource>) {
        self.remotes.push(source);
    }

    pub fn permissions(&self) -> &dyn PermissionStore {
        self.permissions.as_ref()
    }

    pub fn is_meta_tool(&self, name: &str) -> bool {
        self.meta_tools.contains(name)
    }

    fn schema_for(&self, name: &str, raw: Value) -> Value {
        if self.is_meta_tool(name) {
            raw
        } else {
            normalize_input_schema(Some(&raw))
        }
    }

    fn note_collision(&self, name: &str, server_id: &str) {
        let Ok(mut reported) = self.reported_collisions.lock() else {
            return;
        };
        if reported.insert(format!("{server_id}/{name}")) {
            tracing::warn!(
                "Remote tool '{}' from server '{}' collides with an earlier registration, dropped",
                name,
                server_id
            );
        }
    }

    /// Every known tool, enabled or not: local handlers in registration
    /// order, then remote tools.
    pub fn list_all(&self) -> Vec<ToolDescriptor> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();

        for name in &self.order {
            let Some(handler) = self.handlers.get(name) else {
                continue;
            };
            seen.insert(name.clone());
            out.push(ToolDescriptor {
                name: name.clone(),
                description: handler.description().to_string(),
                input_schema: self.schema_for(name, handler.input_schema()),
                output_schema: handler.output_schema(),
                source: ToolSource::BuiltIn,
                category: handler.category().map(String::from),
            });
        }

        for source in &self.remotes {
            for tool in source.tools() {
                if !seen.insert(tool.name.clone()) {
                    self.note_collision(&tool.name, &tool.server_id);
                    continue;
                }
                out.push(ToolDescriptor {
                    input_schema: self.schema_for(&tool.name, tool.input_schema),
                    name: tool.name,
                    description: tool.description,
                    output_schema: tool.output_schema,
                    source: ToolSource::RemoteServer {
                        server_id: tool.server_id,
                    },
                    category: None,
                });
            }
        }
        out
    }

    /// Whether the permission store currently allows this tool.
    pub fn is_enabled(&self, descriptor: &ToolDescriptor) -> bool {
        match descriptor.server_id() {
            None => self.permissions.is_enabled(&descriptor.name, None),
            Some(server) => {
                self.permissions.is_server_enabled(server)
                    && self.permissions.is_enabled(&descriptor.name, Some(server))
            }
        }
    }

    /// Tools the permission store currently allows.
    pub fn list_available(&self) -> Vec<ToolDescriptor> {
        self.list_all()
            .into_iter()
            .filter(|d| self.is_enabled(d))
            .collect()
    }

    pub fn available_names(&self) -> Vec<String> {
        self.list_available().into_iter().map(|d| d.name).collect()
    }

    /// Look up a tool regardless of its permission state.
    pub fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.list_all().into_iter().find(|d| d.name == name)
    }

    /// Markdown reference for the named tools, as shown to the model.
    pub fn tool_reference(&self, names: &[&str]) -> String {
        let mut out = String::new();
        for desc in self.list_all().iter().filter(|d| names.contains(&d.name.as_str())) {
            let schema = serde_json::to_string(&desc.input_schema).unwrap_or_default();
            out.push_str(&format!(
                "### {}\n{}\nInput schema: {}\n\n",
                desc.name, desc.description, schema
            ));
        }
        out
    }

    async fn confirmed(&self, name: &str, server: Option<&str>, args: &Value) -> bool {
        if !self.permissions.is_confirmation_required(name, server) {
            return true;
        }
        self.confirmation.confirm(name, args).await
    }

    /// Run a tool. Never panics or returns an error: every failure, including
    /// a panicking handler, comes back as `success: false`.
    #[tracing::instrument(skip(self, args), fields(tool = name))]
    pub async fn execute(&self, name: &str, args: &Value) -> ToolExecution {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;

        if let Some(handler) = self.handlers.get(name) {
            if !self.permissions.is_enabled(name, None) {
                return ToolExecution::failed(FailureKind::Disabled, disabled_message(name), elapsed());
            }
            if !self.confirmed(name, None, args).await {
                return ToolExecution::failed(FailureKind::Declined, declined_message(name), elapsed());
            }
            let call = AssertUnwindSafe(handler.execute(args)).catch_unwind().await;
            return match call {
                Ok(Ok(result)) => match result_failure(&result) {
                    Some(error) => ToolExecution::failed_with_result(result, error, elapsed()),
                    None => ToolExecution::ok(result, elapsed()),
                },
                Ok(Err(e)) => ToolExecution::failed(FailureKind::Call, format!("{e:#}"), elapsed()),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!("Tool '{}' panicked: {}", name, message);
                    ToolExecution::failed(FailureKind::Call, message, elapsed())
                }
            };
        }

        let remote = self.remotes.iter().find_map(|source| {
            source
                .tools()
                .into_iter()
                .find(|t| t.name == name)
                .map(|t| (source, t.server_id))
        });
        let Some((source, server_id)) = remote else {
            return ToolExecution::failed(FailureKind::NotFound, format!("Tool not found: {name}"), elapsed());
        };

        if !self.permissions.is_server_enabled(&server_id) {
            return ToolExecution::failed(
                FailureKind::Disabled,
                format!("Tool '{name}' is unavailable: server '{server_id}' is disabled"),
                elapsed(),
            );
        }
        if !self.permissions.is_enabled(name, Some(&server_id)) {
            return ToolExecution::failed(FailureKind::Disabled, disabled_message(name), elapsed());
        }
        if !self.confirmed(name, Some(&server_id), args).await {
            return ToolExecution::failed(FailureKind::Declined, declined_message(name), elapsed());
        }

        let call = AssertUnwindSafe(source.call(&server_id, name, args))
            .catch_unwind()
            .await;
        match call {
            Ok(Ok(reply)) if reply.is_error => {
                let error = match &reply.content {
                    Value::String(s) if !s.is_empty() => s.clone(),
                    _ => format!("Tool '{name}' reported an error"),
                };
                ToolExecution::failed_with_result(reply.content, error, elapsed())
            }
            Ok(Ok(reply)) => match result_failure(&reply.content) {
                Some(error) => ToolExecution::failed_with_result(reply.content, error, elapsed()),
                None => ToolExecution::ok(reply.content, elapsed()),
            },
            Ok(Err(e)) => ToolExecution::failed(FailureKind::Call, format!("{e:#}"), elapsed()),
            Err(panic) => ToolExecution::failed(FailureKind::Call, panic_message(panic.as_ref()), elapsed()),
        }
    }
}

fn disabled_message(name: &str) -> String {
    format!("Tool '{name}' is disabled in permission settings")
}

fn declined_message(name: &str) -> String {
    format!("Tool '{name}' requires confirmation and was declined")
}

/// Failure reported inside an otherwise successful return value.
fn result_failure(result: &Value) -> Option<String> {
    let obj = result.as_object()?;
    let flagged = obj.get("success").and_then(Value::as_bool) == Some(false)
        || obj.get("is_error").and_then(Value::as_bool) == Some(true)
        || obj.get("isError").and_then(Value::as_bool) == Some(true);
    if !flagged {
        return None;
    }
    let message = ["error", "message"]
        .iter()
        .find_map(|k| obj.get(*k))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "tool reported failure".to_string());
    Some(message)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("tool panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("tool panicked: {s}")
    } else {
        "tool panicked".to_string()
    }
}
