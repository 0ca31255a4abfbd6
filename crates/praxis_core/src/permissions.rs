//! Tool permission contract.
//!
//! The engine never caches permission answers: every listing and every
//! dispatch asks the store again, so a toggle takes effect on the very next
//! call. Implementations must therefore answer from their current state and
//! keep lookups cheap.

use crate::config::PermissionsConfig;
use arc_swap::ArcSwap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Read-only, always-live view of tool permissions.
pub trait PermissionStore: Send + Sync {
    fn is_enabled(&self, tool: &str, server_id: Option<&str>) -> bool;

    fn is_confirmation_required(&self, tool: &str, server_id: Option<&str>) -> bool;

    fn is_server_enabled(&self, _server_id: &str) -> bool {
        true
    }
}

/// Asked before running a tool whose permission requires confirmation.
#[async_trait::async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm(&self, tool: &str, args: &Value) -> bool;
}

pub struct AutoApprove;

#[async_trait::async_trait]
impl ConfirmationHandler for AutoApprove {
    async fn confirm(&self, tool: &str, _args: &Value) -> bool {
        tracing::debug!("Auto-approving confirmation for '{}'", tool);
        true
    }
}

pub struct AutoDeny;

#[async_trait::async_trait]
impl ConfirmationHandler for AutoDeny {
    async fn confirm(&self, tool: &str, _args: &Value) -> bool {
        tracing::info!("Confirmation required for '{}', denying (non-interactive)", tool);
        false
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolPermission {
    pub enabled: bool,
    pub require_confirmation: bool,
}

impl Default for ToolPermission {
    fn default() -> Self {
        Self {
            enabled: true,
            require_confirmation: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PermissionKey {
    tool: String,
    server: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PermissionTable {
    tools: HashMap<PermissionKey, ToolPermission>,
    disabled_servers: HashSet<String>,
}

impl PermissionTable {
    pub fn from_config(config: &PermissionsConfig) -> Self {
        let mut table = Self::default();
        for tool in &config.disabled_tools {
            table.entry(tool, None).enabled = false;
        }
        for tool in &config.confirm_tools {
            table.entry(tool, None).require_confirmation = true;
        }
        for scoped in &config.server_tools {
            let entry = table.entry(&scoped.tool, Some(&scoped.server));
            entry.enabled = scoped.enabled;
            entry.require_confirmation = scoped.require_confirmation;
        }
        table.disabled_servers = config.disabled_servers.iter().cloned().collect();
        table
    }

    fn entry(&mut self, tool: &str, server: Option<&str>) -> &mut ToolPermission {
        self.tools
            .entry(PermissionKey {
                tool: tool.to_string(),
                server: server.map(String::from),
            })
            .or_default()
    }

    /// Server-scoped entry first, then the unscoped one, then the default.
    fn lookup(&self, tool: &str, server: Option<&str>) -> ToolPermission {
        let mut key = PermissionKey {
            tool: tool.to_string(),
            server: server.map(String::from),
        };
        if let Some(p) = self.tools.get(&key) {
            return *p;
        }
        if key.server.is_some() {
            key.server = None;
            if let Some(p) = self.tools.get(&key) {
                return *p;
            }
        }
        ToolPermission::default()
    }
}

/// Permission store whose table can be swapped or edited while the engine
/// runs. Reads are lock-free snapshots of the current table.
#[derive(Default)]
pub struct LivePermissions {
    table: ArcSwap<PermissionTable>,
}

impl LivePermissions {
    pub fn new(table: PermissionTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
        }
    }

    pub fn from_config(config: &PermissionsConfig) -> Self {
        Self::new(PermissionTable::from_config(config))
    }

    /// Replace the whole table, e.g. after the user edits settings.
    pub fn replace(&self, table: PermissionTable) {
        self.table.store(Arc::new(table));
    }

    pub fn set_enabled(&self, tool: &str, server_id: Option<&str>, enabled: bool) {
        self.table.rcu(|current| {
            let mut next = PermissionTable::clone(current);
            next.entry(tool, server_id).enabled = enabled;
            next
        });
        tracing::info!(tool, server = ?server_id, enabled, "tool permission changed");
    }

    pub fn set_confirmation_required(&self, tool: &str, server_id: Option<&str>, required: bool) {
        self.table.rcu(|current| {
            let mut next = PermissionTable::clone(current);
            next.entry(tool, server_id).require_confirmation = required;
            next
        });
    }

    pub fn set_server_enabled(&self, server_id: &str, enabled: bool) {
        self.table.rcu(|current| {
            let mut next = PermissionTable::clone(current);
            if enabled {
                next.disabled_servers.remove(server_id);
            } else {
                next.disabled_servers.insert(server_id.to_string());
            }
            next
        });
        tracing::info!(server = server_id, enabled, "server permission changed");
    }
}

impl PermissionStore for LivePermissions {
    fn is_enabled(&self, tool: &str, server_id: Option<&str>) -> bool {
        self.table.load().lookup(tool, server_id).enabled
    }

    fn is_confirmation_required(&self, tool: &str, server_id: Option<&str>) -> bool {
        self.table.load().lookup(tool, server_id).require_confirmation
    }

    fn is_server_enabled(&self, server_id: &str) -> bool {
        !self.table.load().disabled_servers.contains(server_id)
    }
}
