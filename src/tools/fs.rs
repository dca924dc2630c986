//! File-system scaffolding tool.
//!
//! `create_path` mirrors what the generated project needs from the pipeline:
//! create a directory when no content is given, or a file (with parent
//! directories) when content is given. Everything is rooted under the
//! execution context's workspace root.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};

use super::{ExecutionContext, Tool, ToolError, ToolOutcome};

/// Validate a relative path and resolve it under the workspace root.
///
/// Rejects absolute paths, empty paths, null bytes, and `..` components so a
/// confused model cannot write outside the workspace.
fn resolve_path(root: &Path, raw: &str) -> Result<PathBuf, ToolError> {
    if raw.trim().is_empty() {
        return Err(ToolError::InvalidPath("path is empty".to_string()));
    }

    if raw.contains('\0') {
        return Err(ToolError::InvalidPath(
            "path contains a null character".to_string(),
        ));
    }

    let candidate = Path::new(raw);
    if candidate.is_absolute() {
        return Err(ToolError::InvalidPath(format!(
            "absolute paths are not allowed: {}",
            raw
        )));
    }

    for component in candidate.components() {
        if matches!(component, Component::ParentDir) {
            return Err(ToolError::InvalidPath(format!(
                "path escapes the workspace: {}",
                raw
            )));
        }
    }

    Ok(root.join(candidate))
}

/// Tool that creates a directory or a file under the workspace root.
pub struct CreatePathTool;

impl CreatePathTool {
    /// Create a new `create_path` tool.
    pub fn new() -> Self {
        Self
    }
}

impl Default for CreatePathTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CreatePathTool {
    fn name(&self) -> &str {
        "create_path"
    }

    fn description(&self) -> &str {
        "Create a folder or file at the given relative path. If 'content' is provided, \
         a file is created with that content (parent directories are created as needed). \
         Without 'content', a folder is created."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Relative path of the folder or file to create"
                },
                "content": {
                    "type": "string",
                    "description": "Optional file content. Omit to create a folder."
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        args: Value,
        ctx: &ExecutionContext,
    ) -> Result<ToolOutcome, ToolError> {
        let raw_path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ToolError::InvalidParameters("missing required parameter 'path'".to_string())
            })?
            .to_string();

        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let target = resolve_path(&ctx.workspace_root, &raw_path)?;

        if target.exists() {
            return Err(ToolError::AlreadyExists(raw_path));
        }

        match content {
            None => {
                tokio::fs::create_dir_all(&target).await?;
                Ok(ToolOutcome::success(format!(
                    "Successfully created folder: {}",
                    raw_path
                )))
            }
            Some(content) => {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&target, content).await?;
                Ok(ToolOutcome::success(format!(
                    "Successfully created file: {}",
                    raw_path
                )))
            }
        }
    }
}
