use anyhow::Context;
use praxis_core::ToolHandler;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// The local catalog shipped with the binary. File tools are confined to
/// `root`.
pub fn builtin_tools(root: &Path) -> Vec<Arc<dyn ToolHandler>> {
    let root = root.to_path_buf();
    vec![
        Arc::new(EchoTool),
        Arc::new(ReadFileTool { root: root.clone() }),
        Arc::new(WriteFileTool { root: root.clone() }),
        Arc::new(ListFilesTool { root }),
        Arc::new(ForEachTool),
    ]
}

/// Join a workspace-relative path onto `root`, refusing anything that
/// could escape it.
fn resolve(root: &Path, relative: &str) -> anyhow::Result<PathBuf> {
    let rel = Path::new(relative);
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        anyhow::bail!("path '{}' must stay inside the workspace", relative);
    }
    Ok(root.join(rel))
}

fn required_str<'a>(input: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .with_context(|| format!("Missing required parameter: \"{key}\""))
}

pub struct EchoTool;

#[async_trait::async_trait]
impl ToolHandler for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given text unchanged"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "Text to return"}
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, input: &Value) -> anyhow::Result<Value> {
        Ok(json!({ "text": required_str(input, "text")? }))
    }
}

pub struct ReadFileTool {
    root: PathBuf,
}

#[async_trait::async_trait]
impl ToolHandler for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file from the workspace"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path relative to the workspace root"}
            },
            "required": ["path"]
        })
    }

    fn category(&self) -> Option<&str> {
        Some("files")
    }

    async fn execute(&self, input: &Value) -> anyhow::Result<Value> {
        let path = required_str(input, "path")?;
        let full = resolve(&self.root, path)?;
        let content = tokio::fs::read_to_string(&full)
            .await
            .with_context(|| format!("File not found or unreadable: {path}"))?;
        Ok(json!({ "path": path, "content": content, "bytes": content.len() }))
    }
}

pub struct WriteFileTool {
    root: PathBuf,
}

#[async_trait::async_trait]
impl ToolHandler for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a text file in the workspace"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path relative to the workspace root"},
                "content": {"type": "string", "description": "Full file contents"}
            },
            "required": ["path", "content"]
        })
    }

    fn category(&self) -> Option<&str> {
        Some("files")
    }

    async fn execute(&self, input: &Value) -> anyhow::Result<Value> {
        let path = required_str(input, "path")?;
        let content = required_str(input, "content")?;
        let full = resolve(&self.root, path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory for {path}"))?;
        }
        tokio::fs::write(&full, content)
            .await
            .with_context(|| format!("Failed to write {path}"))?;
        tracing::info!("Wrote {} byte(s) to {}", content.len(), full.display());
        Ok(json!({ "path": path, "bytes": content.len() }))
    }
}

pub struct ListFilesTool {
    root: PathBuf,
}

#[async_trait::async_trait]
impl ToolHandler for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the entries of a workspace directory"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory relative to the workspace root (default: the root)"}
            }
        })
    }

    fn category(&self) -> Option<&str> {
        Some("files")
    }

    async fn execute(&self, input: &Value) -> anyhow::Result<Value> {
        let path = input.get("path").and_then(Value::as_str).unwrap_or(".");
        let full = resolve(&self.root, path)?;
        let mut dir = tokio::fs::read_dir(&full)
            .await
            .with_context(|| format!("Directory not found: {path}"))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();
        Ok(json!({ "path": path, "count": entries.len(), "entries": entries }))
    }
}

/// Render a template once per item. `{item}` in the template (or in any
/// string value of an object template) is replaced by the item.
///
/// Registered as a meta tool: its schema is polymorphic and passes through
/// the registry unnormalized.
pub struct ForEachTool;

fn render(template: &Value, item: &str) -> Value {
    match template {
        Value::String(s) => Value::String(s.replace("{item}", item)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render(v, item)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render(v, item)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[async_trait::async_trait]
impl ToolHandler for ForEachTool {
    fn name(&self) -> &str {
        "for_each"
    }

    fn description(&self) -> &str {
        "Apply a template to every item of a list"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "items": {"type": "array", "items": {}},
                "template": {"oneOf": [{"type": "string"}, {"type": "object"}]}
            },
            "required": ["items", "template"]
        })
    }

    async fn execute(&self, input: &Value) -> anyhow::Result<Value> {
        let items = input
            .get("items")
            .and_then(Value::as_array)
            .context("Missing required parameter: \"items\" (an array)")?;
        let template = input
            .get("template")
            .context("Missing required parameter: \"template\"")?;

        let results: Vec<Value> = items
            .iter()
            .map(|item| {
                let text = match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                render(template, &text)
            })
            .collect();
        Ok(json!({ "count": results.len(), "results": results }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_escapes() {
        let root = Path::new("/work");
        assert_eq!(resolve(root, "notes/a.md").unwrap(), PathBuf::from("/work/notes/a.md"));
        assert!(resolve(root, "../secret").is_err());
        assert!(resolve(root, "/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_write_read_list_roundtrip_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let tools = builtin_tools(dir.path());
        let find = |name: &str| tools.iter().find(|t| t.name() == name).unwrap().clone();

        find("write_file")
            .execute(&json!({"path": "notes/today.md", "content": "# Today"}))
            .await
            .unwrap();
        let read = find("read_file")
            .execute(&json!({"path": "notes/today.md"}))
            .await
            .unwrap();
        assert_eq!(read["content"], "# Today");

        let listed = find("list_files").execute(&json!({})).await.unwrap();
        assert_eq!(listed["entries"], json!(["notes/"]));
    }

    #[tokio::test]
    async fn test_read_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool {
            root: dir.path().to_path_buf(),
        };
        let err = tool.execute(&json!({"path": "nope.md"})).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_for_each_renders_templates() {
        let out = ForEachTool
            .execute(&json!({"items": ["a", 2], "template": {"query": "about {item}"}}))
            .await
            .unwrap();
        assert_eq!(out["count"], 2);
        assert_eq!(out["results"][0]["query"], "about a");
        assert_eq!(out["results"][1]["query"], "about 2");
    }
}
