//! Tool-call extraction from raw LLM completions.
//!
//! Stage prompts instruct the model to request a tool by emitting a JSON
//! object with `tool` and `arguments` keys. Models are inconsistent about
//! where that object lands (inline, fenced code block, or a bare function
//! call), so the parser tries each format in turn.

use serde_json::Value;

use crate::error::LlmError;

/// A tool call extracted from an LLM response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    pub arguments: Value,
}

/// Trait for parsing tool calls from LLM responses.
pub trait ToolCallParser: Send + Sync {
    /// Parse a tool call from an LLM response, if one is present.
    fn parse(&self, response: &str) -> Result<Option<ParsedToolCall>, LlmError>;
}

/// Default tool call parser that looks for JSON function calls.
#[derive(Default)]
pub struct JsonToolCallParser;

impl ToolCallParser for JsonToolCallParser {
    fn parse(&self, response: &str) -> Result<Option<ParsedToolCall>, LlmError> {
        // Fenced ```json blocks first: they are the least ambiguous.
        if let Some(call) = self.parse_code_block_format(response) {
            return Ok(Some(call));
        }

        if let Some(call) = self.parse_json_format(response) {
            return Ok(Some(call));
        }

        if let Some(call) = self.parse_function_format(response) {
            return Ok(Some(call));
        }

        Ok(None)
    }
}

impl JsonToolCallParser {
    /// Parse inline JSON objects with `tool`/`arguments` (or `name`/`parameters`) keys.
    fn parse_json_format(&self, response: &str) -> Option<ParsedToolCall> {
        let mut depth = 0;
        let mut start = None;

        for (i, c) in response.char_indices() {
            match c {
                '{' => {
                    if depth == 0 {
                        start = Some(i);
                    }
                    depth += 1;
                }
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start {
                            let json_str = &response[s..=i];
                            if let Ok(value) = serde_json::from_str::<Value>(json_str) {
                                if let Some(call) = tool_call_from_value(&value) {
                                    return Some(call);
                                }
                            }
                        }
                        start = None;
                    }
                }
                _ => {}
            }
        }

        None
    }

    /// Parse function call format like `create_path({"path": "x"})`.
    fn parse_function_format(&self, response: &str) -> Option<ParsedToolCall> {
        let tool_names = ["create_path"];

        for tool_name in &tool_names {
            let pattern = format!("{}(", tool_name);
            if let Some(start) = response.find(&pattern) {
                let args_start = start + pattern.len();
                let remaining = &response[args_start..];

                // Find the matching closing paren.
                let mut depth = 1;
                let mut end = None;
                for (i, c) in remaining.char_indices() {
                    match c {
                        '(' => depth += 1,
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                end = Some(i);
                                break;
                            }
                        }
                        _ => {}
                    }
                }

                if let Some(e) = end {
                    let args_str = &remaining[..e];
                    if let Ok(arguments) = serde_json::from_str(args_str) {
                        return Some(ParsedToolCall {
                            name: tool_name.to_string(),
                            arguments,
                        });
                    }
                }
            }
        }

        None
    }

    /// Parse tool calls from fenced ```json blocks.
    fn parse_code_block_format(&self, response: &str) -> Option<ParsedToolCall> {
        let json_block_start = "```json";
        let block_end = "```";

        let start = response.find(json_block_start)?;
        let content_start = start + json_block_start.len();
        let remaining = &response[content_start..];
        let end = remaining.find(block_end)?;
        let json_str = remaining[..end].trim();
        let value = serde_json::from_str::<Value>(json_str).ok()?;
        tool_call_from_value(&value)
    }
}

/// Interpret a JSON value as a tool call if it has the expected shape.
fn tool_call_from_value(value: &Value) -> Option<ParsedToolCall> {
    if let Some(tool_name) = value.get("tool").and_then(|v| v.as_str()) {
        let arguments = value
            .get("arguments")
            .cloned()
            .unwrap_or(Value::Object(serde_json::Map::new()));
        return Some(ParsedToolCall {
            name: tool_name.to_string(),
            arguments,
        });
    }

    if let Some(tool_name) = value.get("name").and_then(|v| v.as_str()) {
        let arguments = value
            .get("parameters")
            .or_else(|| value.get("args"))
            .cloned()
            .unwrap_or(Value::Object(serde_json::Map::new()));
        return Some(ParsedToolCall {
            name: tool_name.to_string(),
            arguments,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_format() {
        let parser = JsonToolCallParser;
        let response = r#"Creating the module directory now: {"tool": "create_path", "arguments": {"path": "proj/modules/fastqc"}}"#;

        let call = parser.parse(response).unwrap().unwrap();
        assert_eq!(call.name, "create_path");
        assert_eq!(call.arguments["path"], "proj/modules/fastqc");
    }

    #[test]
    fn test_parse_name_parameters_format() {
        let parser = JsonToolCallParser;
        let response = r#"{"name": "create_path", "parameters": {"path": "proj/main.nf", "content": "workflow {}"}}"#;

        let call = parser.parse(response).unwrap().unwrap();
        assert_eq!(call.name, "create_path");
        assert_eq!(call.arguments["content"], "workflow {}");
    }

    #[test]
    fn test_parse_function_format() {
        let parser = JsonToolCallParser;
        let response = r#"Running: create_path({"path": "proj/modules"})"#;

        let call = parser.parse(response).unwrap().unwrap();
        assert_eq!(call.name, "create_path");
        assert_eq!(call.arguments["path"], "proj/modules");
    }

    #[test]
    fn test_parse_code_block_format() {
        let parser = JsonToolCallParser;
        let response = r#"
I will create the config file:

```json
{"tool": "create_path", "arguments": {"path": "proj/nextflow.config", "content": "profiles {}"}}
```
"#;

        let call = parser.parse(response).unwrap().unwrap();
        assert_eq!(call.name, "create_path");
        assert_eq!(call.arguments["path"], "proj/nextflow.config");
    }

    #[test]
    fn test_no_tool_call() {
        let parser = JsonToolCallParser;
        let response = "PROJECT_NAME: fastqc_pipeline\nPROCESS_NAME: fastqc\n\nTODO LIST:\n1. Create module";

        assert!(parser.parse(response).unwrap().is_none());
    }

    #[test]
    fn test_plain_json_without_tool_keys_is_not_a_call() {
        let parser = JsonToolCallParser;
        let response = r#"Here is a summary: {"project": "fastqc_pipeline"}"#;

        assert!(parser.parse(response).unwrap().is_none());
    }
}
