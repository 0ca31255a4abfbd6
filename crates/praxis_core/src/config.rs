use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PraxisConfig {
    pub llm: LlmConfig,
    pub recovery: RecoveryConfig,
    pub validation: ValidationConfig,
    pub permissions: PermissionsConfig,
    pub workspace: WorkspaceConfig,
    pub mcp_servers: Vec<McpServerConfig>,
}

impl PraxisConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))
    }

    /// Load from path; only a missing file falls back to defaults with env
    /// overrides. A file that exists but cannot be read or parsed is an error,
    /// since defaults would drop the user's permission restrictions.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Config file {} not found, using defaults", path.display());
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                Ok(cfg)
            }
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read config file: {}", path.display())),
        }
    }

    fn from_toml(content: &str) -> Result<Self> {
        let mut config: PraxisConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_MAX_TOKENS") {
            if let Ok(n) = v.parse() {
                self.llm.max_tokens = n;
            }
        }
        if let Ok(v) = std::env::var("LLM_TEMPERATURE") {
            if let Ok(n) = v.parse() {
                self.llm.temperature = n;
            }
        }
        if let Ok(v) = std::env::var("PRAXIS_MAX_REGENERATIONS") {
            if let Ok(n) = v.parse() {
                self.recovery.max_regenerations = n;
            }
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `openai` (any OpenAI-compatible endpoint) or `mock`.
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    /// Correction and regeneration want deterministic output.
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            max_tokens: 2048,
            temperature: 0.1,
            request_timeout_secs: 120,
            max_attempts: 3,
        }
    }
}

/// What to do when a failure matches no regeneration strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedFailure {
    /// Stop retrying and report the step as failed.
    #[default]
    MarkFailed,
    /// Re-run the unchanged step until the retry budget is spent.
    RetryOriginal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Regenerations allowed per step after the first attempt.
    pub max_regenerations: u32,
    /// Ledger entries shown to the model as context.
    pub ledger_context: usize,
    pub on_unmatched_failure: UnmatchedFailure,
    /// Fall back to substring name matching when no alternative is declared.
    pub substring_alternatives: bool,
    /// Declared alternatives, tool name → candidates in preference order.
    pub alternatives: HashMap<String, Vec<String>>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_regenerations: 2,
            ledger_context: 3,
            on_unmatched_failure: UnmatchedFailure::MarkFailed,
            substring_alternatives: true,
            alternatives: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Tools that operate on a `path`; a missing path is recovered from the step reason.
    pub file_tools: Vec<String>,
    /// Extensions recognised when recovering a file name from free text.
    pub path_extensions: Vec<String>,
    /// Tools whose schema is intentionally polymorphic and passed through as-is.
    pub meta_tools: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            file_tools: [
                "read_file",
                "write_file",
                "edit_file",
                "append_file",
                "create_file",
                "delete_file",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            path_extensions: [
                "md", "txt", "json", "csv", "yaml", "yml", "toml", "html", "pdf", "canvas", "rs",
                "py", "js", "ts",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            meta_tools: vec!["for_each".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub disabled_tools: Vec<String>,
    pub disabled_servers: Vec<String>,
    pub confirm_tools: Vec<String>,
    pub server_tools: Vec<ServerToolPermission>,
}

/// Permission entry scoped to one remote server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerToolPermission {
    pub server: String,
    pub tool: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub require_confirmation: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Root directory the built-in file tools operate in.
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let cfg = PraxisConfig::default();
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.recovery.max_regenerations, 2);
        assert_eq!(cfg.recovery.ledger_context, 3);
        assert_eq!(cfg.recovery.on_unmatched_failure, UnmatchedFailure::MarkFailed);
        assert!(cfg.recovery.substring_alternatives);
        assert!(cfg.validation.meta_tools.contains(&"for_each".to_string()));
        assert!(cfg.mcp_servers.is_empty());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[llm]
provider = "mock"
"#;
        let cfg: PraxisConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.llm.max_tokens, 2048);
        assert!(cfg.validation.file_tools.contains(&"read_file".to_string()));
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[llm]
provider = "openai"
model = "qwen2.5"
base_url = "http://localhost:11434/v1"
max_tokens = 1024
temperature = 0.0

[recovery]
max_regenerations = 4
ledger_context = 5
on_unmatched_failure = "retry_original"
substring_alternatives = false

[recovery.alternatives]
web_search = ["web_search_v2", "news_search"]

[validation]
file_tools = ["read_note"]
meta_tools = []

[permissions]
disabled_tools = ["delete_file"]
disabled_servers = ["flaky"]
confirm_tools = ["write_file"]

[[permissions.server_tools]]
server = "market"
tool = "quote"
enabled = false

[workspace]
root = "/tmp/vault"

[[mcp_servers]]
name = "fs"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
"#;
        let cfg: PraxisConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.model, "qwen2.5");
        assert_eq!(cfg.recovery.max_regenerations, 4);
        assert_eq!(cfg.recovery.on_unmatched_failure, UnmatchedFailure::RetryOriginal);
        assert!(!cfg.recovery.substring_alternatives);
        assert_eq!(cfg.recovery.alternatives["web_search"].len(), 2);
        assert!(cfg.validation.meta_tools.is_empty());
        assert_eq!(cfg.permissions.server_tools[0].server, "market");
        assert!(!cfg.permissions.server_tools[0].enabled);
        assert_eq!(cfg.workspace.root, PathBuf::from("/tmp/vault"));
        assert_eq!(cfg.mcp_servers[0].args.len(), 3);
        assert!(cfg.mcp_servers[0].auto_connect);
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[recovery]\nledger_context = 7").unwrap();
        let cfg = PraxisConfig::load(file.path()).unwrap();
        assert_eq!(cfg.recovery.ledger_context, 7);

        assert!(PraxisConfig::load("/nonexistent/praxis.toml").is_err());
        let cfg = PraxisConfig::load_or_default("/nonexistent/praxis.toml").unwrap();
        assert_eq!(cfg.recovery.ledger_context, 3);
    }

    #[test]
    fn test_malformed_permissions_are_an_error_not_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[permissions]\ndisabled_tools = [\"delete_file\"]\nconfirm_tools = \"write_file\""
        )
        .unwrap();
        let err = PraxisConfig::load_or_default(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
        assert!(PraxisConfig::load(file.path()).is_err());
    }
}
