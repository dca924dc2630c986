//! Tool definitions and registry for the generation pipeline.
//!
//! This module defines the `Tool` trait and provides a registry for managing
//! the side-effecting capabilities that stages may invoke. Dispatch is by
//! name; each stage carries its own allowed subset, validated by the stage
//! loop before the registry is consulted.

pub mod fs;

pub use fs::CreatePathTool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool registered under the requested name. A programming or
    /// configuration error, never surfaced back to the model.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Invalid parameters provided to the tool.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Target path already exists.
    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    /// Path is malformed or escapes the workspace.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// File system error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Whether the error should be fed back to the model as context rather
    /// than aborting the run. Only `UnknownTool` is unconditionally fatal;
    /// everything else describes the environment and the model can adapt.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ToolError::UnknownTool(_))
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Whether the tool execution was successful.
    pub success: bool,
    /// Output from the tool execution.
    pub output: String,
    /// Error message if execution failed.
    pub error: Option<String>,
}

impl ToolOutcome {
    /// Create a successful tool outcome.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    /// Create a failed tool outcome.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

/// Context for tool execution.
///
/// All file-system effects are rooted under `workspace_root`; tools reject
/// paths that resolve outside it.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Root directory under which generated files are created.
    pub workspace_root: PathBuf,
}

impl ExecutionContext {
    /// Create a new execution context rooted at the given directory.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

/// Trait for tools that can be executed by a pipeline stage.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the unique name of the tool.
    fn name(&self) -> &str;

    /// Returns a description of what the tool does.
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments and context.
    ///
    /// A recoverable failure (bad path, existing file) is an `Err` whose
    /// [`ToolError::is_recoverable`] is true; the caller decides whether to
    /// surface it to the model or abort.
    async fn execute(&self, args: Value, ctx: &ExecutionContext)
        -> Result<ToolOutcome, ToolError>;
}

/// Registry for managing available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Create a registry with the default set of tools.
    pub fn with_default_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CreatePathTool::new()));
        registry
    }

    /// Register a new tool in the registry.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Invoke a registered tool by name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] if no tool is registered under
    /// `name`; otherwise whatever the handler returns. The side effect
    /// happens at most once — the registry never retries.
    pub async fn invoke(
        &self,
        name: &str,
        args: Value,
        ctx: &ExecutionContext,
    ) -> Result<ToolOutcome, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.execute(args, ctx).await
    }

    /// List all registered tool names.
    pub fn list_tools(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Generate a JSON schema for a subset of registered tools.
    ///
    /// Returns a JSON array of tool definitions suitable for prompting,
    /// restricted to `allowed` so a stage never advertises tools it may not
    /// call.
    pub fn to_json_schema(&self, allowed: &[String]) -> Value {
        let tools: Vec<Value> = self
            .tools
            .values()
            .filter(|tool| allowed.iter().any(|name| name == tool.name()))
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters_schema()
                    }
                })
            })
            .collect();

        Value::Array(tools)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_outcome_success() {
        let outcome = ToolOutcome::success("created");
        assert!(outcome.success);
        assert_eq!(outcome.output, "created");
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_tool_outcome_failure() {
        let outcome = ToolOutcome::failure("path exists");
        assert!(!outcome.success);
        assert!(outcome.output.is_empty());
        assert_eq!(outcome.error, Some("path exists".to_string()));
    }

    #[test]
    fn test_registry_with_default_tools() {
        let registry = ToolRegistry::with_default_tools();
        assert!(!registry.is_empty());
        assert!(registry.get("create_path").is_some());
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = ToolRegistry::new();
        let ctx = ExecutionContext::new("/tmp");

        let result = registry
            .invoke("no_such_tool", serde_json::json!({}), &ctx)
            .await;

        match result {
            Err(ToolError::UnknownTool(name)) => assert_eq!(name, "no_such_tool"),
            other => panic!("expected UnknownTool, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tool_is_fatal() {
        assert!(!ToolError::UnknownTool("x".to_string()).is_recoverable());
        assert!(ToolError::AlreadyExists("p".to_string()).is_recoverable());
        assert!(ToolError::InvalidPath("p".to_string()).is_recoverable());
    }

    #[test]
    fn test_schema_restricted_to_allowed_set() {
        let registry = ToolRegistry::with_default_tools();

        let schema = registry.to_json_schema(&["create_path".to_string()]);
        let arr = schema.as_array().expect("schema should be an array");
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["function"]["name"], "create_path");

        let empty = registry.to_json_schema(&[]);
        assert!(empty.as_array().unwrap().is_empty());
    }
}
