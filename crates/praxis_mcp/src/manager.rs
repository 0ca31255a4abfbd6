use crate::bridge::{call_result, remote_tool};
use anyhow::Context;
use arc_swap::ArcSwap;
use praxis_core::config::McpServerConfig;
use praxis_core::{RemoteCallResult, RemoteTool, RemoteToolSource};
use rmcp::model::CallToolRequestParams;
use rmcp::service::{Peer, RoleClient, RunningService, ServiceExt};
use rmcp::transport::TokioChildProcess;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;

/// A connected MCP server with its running service.
struct ConnectedServer {
    name: String,
    service: RunningService<RoleClient, ()>,
}

/// Tools of every connected MCP server, served as one remote catalog.
///
/// Readers see lock-free snapshots: connecting or disconnecting a server
/// swaps in a new tool list and peer map, so the registry picks up the
/// change on its next lookup.
pub struct McpCatalog {
    configs: Vec<McpServerConfig>,
    tools: ArcSwap<Vec<RemoteTool>>,
    peers: ArcSwap<HashMap<String, Peer<RoleClient>>>,
    servers: Mutex<Vec<ConnectedServer>>,
}

impl McpCatalog {
    pub fn new(configs: Vec<McpServerConfig>) -> Self {
        Self {
            configs,
            tools: ArcSwap::from_pointee(Vec::new()),
            peers: ArcSwap::from_pointee(HashMap::new()),
            servers: Mutex::new(Vec::new()),
        }
    }

    /// Connect every configured server with `auto_connect`. A server that
    /// fails to start is logged and skipped. Returns the number connected.
    pub async fn connect_all(&self) -> usize {
        let mut connected = 0;
        for config in &self.configs {
            if !config.auto_connect {
                tracing::info!("Skipping MCP server '{}' (auto_connect=false)", config.name);
                continue;
            }
            match self.connect_one(config).await {
                Ok(count) => {
                    tracing::info!("MCP server '{}': {} tool(s) discovered", config.name, count);
                    connected += 1;
                }
                Err(e) => {
                    tracing::error!("Failed to connect MCP server '{}': {:#}", config.name, e);
                }
            }
        }
        connected
    }

    /// Spawn one server, discover its tools and add them to the catalog.
    /// Reconnecting a server replaces its previous tools.
    pub async fn connect_one(&self, config: &McpServerConfig) -> anyhow::Result<usize> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        for (k, v) in &config.env {
            cmd.env(k, v);
        }

        let transport = TokioChildProcess::new(cmd)
            .with_context(|| format!("failed to spawn MCP server '{}'", config.name))?;
        let service = ()
            .serve(transport)
            .await
            .map_err(|e| anyhow::anyhow!("MCP handshake failed for '{}': {}", config.name, e))?;

        let discovered = service
            .peer()
            .list_all_tools()
            .await
            .map_err(|e| anyhow::anyhow!("list_tools failed for '{}': {}", config.name, e))?;
        let tools: Vec<RemoteTool> = discovered
            .iter()
            .map(|t| {
                tracing::debug!("  → tool '{}' from server '{}'", t.name, config.name);
                remote_tool(&config.name, t)
            })
            .collect();
        let count = tools.len();

        let peer = service.peer().clone();
        self.peers.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(config.name.clone(), peer.clone());
            next
        });
        self.tools.rcu(|current| {
            let mut next: Vec<RemoteTool> = current
                .iter()
                .filter(|t| t.server_id != config.name)
                .cloned()
                .collect();
            next.extend(tools.iter().cloned());
            next
        });

        let mut servers = self.servers.lock().await;
        if let Some(pos) = servers.iter().position(|s| s.name == config.name) {
            let old = servers.remove(pos);
            if let Err(e) = old.service.cancel().await {
                tracing::warn!("Error cancelling replaced MCP server '{}': {:?}", old.name, e);
            }
        }
        servers.push(ConnectedServer {
            name: config.name.clone(),
            service,
        });
        Ok(count)
    }

    /// Disconnect every server. In-flight lookups see an empty catalog.
    pub async fn disconnect_all(&self) {
        self.tools.store(Arc::new(Vec::new()));
        self.peers.store(Arc::new(HashMap::new()));

        let mut servers = self.servers.lock().await;
        for server in servers.drain(..) {
            if let Err(e) = server.service.cancel().await {
                tracing::warn!("Error cancelling MCP server '{}': {:?}", server.name, e);
            }
            tracing::info!("MCP server '{}' disconnected", server.name);
        }
    }
}

#[async_trait::async_trait]
impl RemoteToolSource for McpCatalog {
    fn tools(&self) -> Vec<RemoteTool> {
        Vec::clone(&self.tools.load())
    }

    async fn call(
        &self,
        server_id: &str,
        tool: &str,
        args: &Value,
    ) -> anyhow::Result<RemoteCallResult> {
        let Some(peer) = self.peers.load().get(server_id).cloned() else {
            anyhow::bail!("MCP server '{}' is not connected", server_id);
        };

        let params = CallToolRequestParams {
            meta: None,
            name: tool.to_string().into(),
            arguments: args.as_object().cloned(),
            task: None,
        };
        let result = peer
            .call_tool(params)
            .await
            .map_err(|e| anyhow::anyhow!("MCP tool '{}' failed: {}", tool, e))?;
        Ok(call_result(result))
    }
}
