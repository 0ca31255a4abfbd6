//! MCP servers exposed to the plan engine as a remote tool catalog.

pub mod bridge;
pub mod manager;

pub use manager::McpCatalog;
