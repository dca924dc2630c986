//! The generic LLM-driven stage.
//!
//! All five pipeline stages are configurations of the one [`LlmStage`] shape:
//! a role instruction, an allowed tool subset, and an output key. A stage run
//! is a bounded loop of generation rounds — each round either requests a tool
//! (executed, recorded, and made visible to the next round) or produces the
//! stage's final answer.

use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::PipelineConfig;
use super::error::{PipelineError, PipelineResult};
use crate::context::{ContextStore, ContextView, EventPayload};
use crate::error::LlmError;
use crate::llm::{
    GenerationRequest, JsonToolCallParser, LlmProvider, Message, ParsedToolCall, ToolCallParser,
};
use crate::tools::{ExecutionContext, ToolRegistry};

/// Immutable description of one pipeline stage.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// Stage id, e.g. `StructureAgent`. Also the author tag on its events.
    pub id: String,
    /// Position in the pipeline, 0-based.
    pub ordinal: usize,
    /// One-line capability description.
    pub description: String,
    /// Role instruction used as the system prompt.
    pub instruction: String,
    /// Names of tools this stage may invoke. Empty means none.
    pub allowed_tools: Vec<String>,
    /// Label under which the stage's final output is recorded.
    pub output_key: String,
}

/// Final result of one stage run.
#[derive(Debug, Clone)]
pub struct StageResult {
    /// The stage's final narrative answer.
    pub narrative: String,
    /// Tool calls the stage successfully made, in order.
    pub tool_calls_made: Vec<ParsedToolCall>,
    /// Fields extracted from the narrative.
    pub structured_output: Value,
}

/// A named, model-driven unit of work over the shared context.
pub struct LlmStage {
    spec: StageSpec,
    parser: Box<dyn ToolCallParser>,
}

impl LlmStage {
    /// Create a stage from its spec with the default tool-call parser.
    pub fn new(spec: StageSpec) -> Self {
        Self {
            spec,
            parser: Box::new(JsonToolCallParser),
        }
    }

    /// The stage id.
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// The stage spec.
    pub fn spec(&self) -> &StageSpec {
        &self.spec
    }

    /// Run the stage against the shared context.
    ///
    /// Tool execution failures are appended as failed tool-result events and
    /// fed back to the model; only `UnknownTool` and out-of-set requests are
    /// fatal. Exhausting the round budget yields
    /// [`PipelineError::StageExhausted`].
    pub async fn run(
        &self,
        store: &ContextStore,
        registry: &ToolRegistry,
        provider: &Arc<dyn LlmProvider>,
        exec_ctx: &ExecutionContext,
        config: &PipelineConfig,
    ) -> PipelineResult<StageResult> {
        let mut tool_calls_made = Vec::new();

        for round in 0..config.max_tool_rounds {
            let view = store.current_view();
            let size = view.size_chars();
            if size > config.max_context_chars {
                return Err(PipelineError::ContextTooLarge {
                    stage: self.spec.id.clone(),
                    size,
                    limit: config.max_context_chars,
                });
            }

            let messages = self.build_messages(&view, registry);
            let request = GenerationRequest::new(config.model.clone(), messages)
                .with_temperature(config.temperature)
                .with_max_tokens(config.max_tokens);

            let response = provider.generate(request).await?;
            let text = response
                .first_content()
                .ok_or_else(|| LlmError::ParseError("empty LLM response".to_string()))?
                .to_string();

            match self.parser.parse(&text)? {
                Some(call) => {
                    debug!(stage = %self.spec.id, tool = %call.name, round, "tool requested");
                    self.execute_tool_call(store, registry, exec_ctx, call, &mut tool_calls_made)
                        .await?;
                    // Loop: the tool result is now part of the view.
                }
                None => {
                    let structured = extract_structured_fields(&text);
                    store.append(
                        self.spec.id.clone(),
                        EventPayload::StageOutput {
                            output_key: self.spec.output_key.clone(),
                            narrative: text.clone(),
                            structured: structured.clone(),
                        },
                    );
                    info!(
                        stage = %self.spec.id,
                        rounds = round + 1,
                        tool_calls = tool_calls_made.len(),
                        "stage completed"
                    );
                    return Ok(StageResult {
                        narrative: text,
                        tool_calls_made,
                        structured_output: structured,
                    });
                }
            }
        }

        Err(PipelineError::StageExhausted {
            stage: self.spec.id.clone(),
            rounds: config.max_tool_rounds,
        })
    }

    /// Validate, execute, and record one tool call.
    async fn execute_tool_call(
        &self,
        store: &ContextStore,
        registry: &ToolRegistry,
        exec_ctx: &ExecutionContext,
        call: ParsedToolCall,
        tool_calls_made: &mut Vec<ParsedToolCall>,
    ) -> PipelineResult<()> {
        if !self.spec.allowed_tools.iter().any(|t| t == &call.name) {
            return Err(PipelineError::ToolNotPermitted {
                stage: self.spec.id.clone(),
                tool: call.name,
            });
        }

        store.append(
            self.spec.id.clone(),
            EventPayload::ToolCall {
                tool: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        );

        match registry
            .invoke(&call.name, call.arguments.clone(), exec_ctx)
            .await
        {
            Ok(outcome) => {
                store.append(
                    self.spec.id.clone(),
                    EventPayload::ToolResult {
                        tool: call.name.clone(),
                        arguments: call.arguments.clone(),
                        success: outcome.success,
                        output: outcome.output,
                        error: outcome.error,
                    },
                );
                tool_calls_made.push(call);
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                warn!(stage = %self.spec.id, tool = %call.name, error = %e, "tool failed, surfacing to model");
                store.append(
                    self.spec.id.clone(),
                    EventPayload::ToolResult {
                        tool: call.name.clone(),
                        arguments: call.arguments,
                        success: false,
                        output: String::new(),
                        error: Some(e.to_string()),
                    },
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Compose the conversation for one generation round.
    fn build_messages(&self, view: &ContextView, registry: &ToolRegistry) -> Vec<Message> {
        let mut messages = vec![Message::system(format!(
            "{}\n\n{}",
            self.spec.description, self.spec.instruction
        ))];

        if !self.spec.allowed_tools.is_empty() {
            let schema = registry.to_json_schema(&self.spec.allowed_tools);
            messages.push(Message::user(format!(
                "You have access to the following tools. To use one, respond with a JSON \
                 object containing 'tool' and 'arguments' keys and nothing else.\n\nTools:\n{}",
                serde_json::to_string_pretty(&schema).unwrap_or_default()
            )));
            messages.push(Message::assistant(
                "Understood. I will respond with a JSON tool call when I need to create \
                 a file or folder, and with my final summary otherwise.",
            ));
        }

        messages.extend(view.to_messages());
        messages
    }
}

/// Extract structured fields from a stage's final narrative.
///
/// Stages announce names in the `KEY: value` convention their instructions
/// demand; extraction is uniform so every stage may refine earlier fields.
pub fn extract_structured_fields(narrative: &str) -> Value {
    let mut fields = serde_json::Map::new();

    let project_re = Regex::new(r"(?m)^\s*PROJECT_NAME:\s*(\S+)").expect("static regex");
    if let Some(caps) = project_re.captures(narrative) {
        fields.insert("project_name".to_string(), Value::String(caps[1].to_string()));
    }

    let process_re = Regex::new(r"(?m)^\s*PROCESS_NAME:\s*(\S+)").expect("static regex");
    if let Some(caps) = process_re.captures(narrative) {
        fields.insert("process_name".to_string(), Value::String(caps[1].to_string()));
    }

    if let Some(list_start) = narrative.find("TODO LIST:") {
        let item_re = Regex::new(r"(?m)^\s*\d+\.\s+(.+)$").expect("static regex");
        let items: Vec<Value> = item_re
            .captures_iter(&narrative[list_start..])
            .map(|caps| Value::String(caps[1].trim().to_string()))
            .collect();
        if !items.is_empty() {
            fields.insert("plan".to_string(), Value::Array(items));
        }
    }

    Value::Object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{EventKind, USER_AUTHOR};
    use crate::llm::{Choice, GenerationResponse, Usage};
    use crate::tools::ToolError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Mock provider that returns scripted responses in order.
    struct ScriptedProvider {
        responses: Mutex<Vec<String>>,
        call_count: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<&str>) -> Arc<dyn LlmProvider> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                call_count: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            let responses = self.responses.lock().expect("lock not poisoned");
            let content = responses
                .get(idx)
                .cloned()
                .unwrap_or_else(|| "Final answer with no further tool calls.".to_string());

            Ok(GenerationResponse {
                id: format!("mock-{}", idx),
                model: "mock-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(content),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage {
                    prompt_tokens: 100,
                    completion_tokens: 50,
                    total_tokens: 150,
                },
            })
        }
    }

    fn structure_spec() -> StageSpec {
        StageSpec {
            id: "StructureAgent".to_string(),
            ordinal: 1,
            description: "Creates the project structure.".to_string(),
            instruction: "Create the module folder, then summarize.".to_string(),
            allowed_tools: vec!["create_path".to_string()],
            output_key: "main_nf_summary".to_string(),
        }
    }

    fn todo_spec() -> StageSpec {
        StageSpec {
            id: "TodoAgent".to_string(),
            ordinal: 0,
            description: "Analyzes the prompt.".to_string(),
            instruction: "Extract PROJECT_NAME and PROCESS_NAME.".to_string(),
            allowed_tools: vec![],
            output_key: "project_metadata".to_string(),
        }
    }

    fn seeded_store() -> ContextStore {
        let store = ContextStore::new();
        store.append(
            USER_AUTHOR,
            EventPayload::UserInput {
                text: "Create a FASTQC pipeline".to_string(),
            },
        );
        store
    }

    fn test_harness() -> (TempDir, ExecutionContext, ToolRegistry, PipelineConfig) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let ctx = ExecutionContext::new(dir.path());
        let registry = ToolRegistry::with_default_tools();
        let config = PipelineConfig::new(dir.path()).with_max_tool_rounds(4);
        (dir, ctx, registry, config)
    }

    #[tokio::test]
    async fn test_stage_with_tool_call_then_final_answer() {
        let (dir, ctx, registry, config) = test_harness();
        let store = seeded_store();
        let provider = ScriptedProvider::new(vec![
            r#"{"tool": "create_path", "arguments": {"path": "fastqc_pipeline/modules/fastqc"}}"#,
            "Created the module folder for the fastqc process.",
        ]);

        let stage = LlmStage::new(structure_spec());
        let result = stage
            .run(&store, &registry, &provider, &ctx, &config)
            .await
            .unwrap();

        assert_eq!(result.tool_calls_made.len(), 1);
        assert!(dir.path().join("fastqc_pipeline/modules/fastqc").is_dir());

        // Events: UserInput, ToolCall, ToolResult, StageOutput.
        let kinds: Vec<EventKind> = store
            .current_view()
            .events()
            .iter()
            .map(|e| e.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::UserInput,
                EventKind::ToolCall,
                EventKind::ToolResult,
                EventKind::StageOutput
            ]
        );
    }

    #[tokio::test]
    async fn test_stage_without_tools_completes() {
        let (_dir, ctx, registry, config) = test_harness();
        let store = seeded_store();
        let provider = ScriptedProvider::new(vec![
            "PROJECT_NAME: fastqc_pipeline\nPROCESS_NAME: fastqc\n\nTODO LIST:\n1. Create module\n2. Write tests",
        ]);

        let stage = LlmStage::new(todo_spec());
        let result = stage
            .run(&store, &registry, &provider, &ctx, &config)
            .await
            .unwrap();

        assert!(result.tool_calls_made.is_empty());
        assert_eq!(result.structured_output["project_name"], "fastqc_pipeline");
        assert_eq!(result.structured_output["process_name"], "fastqc");
        assert_eq!(result.structured_output["plan"][0], "Create module");

        let state = store.current_view().project_state();
        assert_eq!(state.project_name.as_deref(), Some("fastqc_pipeline"));
    }

    #[tokio::test]
    async fn test_tool_not_permitted_is_fatal() {
        let (_dir, ctx, registry, config) = test_harness();
        let store = seeded_store();
        let provider = ScriptedProvider::new(vec![
            r#"{"tool": "create_path", "arguments": {"path": "x"}}"#,
        ]);

        // Todo stage has no allowed tools.
        let stage = LlmStage::new(todo_spec());
        let result = stage.run(&store, &registry, &provider, &ctx, &config).await;

        match result {
            Err(PipelineError::ToolNotPermitted { stage, tool }) => {
                assert_eq!(stage, "TodoAgent");
                assert_eq!(tool, "create_path");
            }
            other => panic!("expected ToolNotPermitted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tool_failure_is_surfaced_and_recovered() {
        let (dir, ctx, registry, config) = test_harness();
        let store = seeded_store();
        // First attempt collides with an existing directory; the model adapts.
        std::fs::create_dir_all(dir.path().join("fastqc_pipeline")).unwrap();
        let provider = ScriptedProvider::new(vec![
            r#"{"tool": "create_path", "arguments": {"path": "fastqc_pipeline"}}"#,
            r#"{"tool": "create_path", "arguments": {"path": "fastqc_pipeline_v2"}}"#,
            "Created the project folder under an adjusted name.",
        ]);

        let stage = LlmStage::new(structure_spec());
        let result = stage
            .run(&store, &registry, &provider, &ctx, &config)
            .await
            .unwrap();

        // Only the successful call counts.
        assert_eq!(result.tool_calls_made.len(), 1);
        assert_eq!(
            result.tool_calls_made[0].arguments["path"],
            "fastqc_pipeline_v2"
        );

        // The failure is recorded as a failed tool result event.
        let view = store.current_view();
        let failed: Vec<_> = view
            .events()
            .iter()
            .filter(|e| matches!(
                &e.payload,
                EventPayload::ToolResult { success: false, .. }
            ))
            .collect();
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn test_stage_exhausted_after_round_limit() {
        let (_dir, ctx, registry, mut config) = test_harness();
        config = config.with_max_tool_rounds(2);
        let store = seeded_store();
        // The model keeps colliding with itself and never gives a final answer.
        let provider = ScriptedProvider::new(vec![
            r#"{"tool": "create_path", "arguments": {"path": "proj"}}"#,
            r#"{"tool": "create_path", "arguments": {"path": "proj"}}"#,
        ]);

        let stage = LlmStage::new(structure_spec());
        let result = stage.run(&store, &registry, &provider, &ctx, &config).await;

        match result {
            Err(PipelineError::StageExhausted { stage, rounds }) => {
                assert_eq!(stage, "StructureAgent");
                assert_eq!(rounds, 2);
            }
            other => panic!("expected StageExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_context_over_hard_cap_aborts() {
        let (_dir, ctx, registry, mut config) = test_harness();
        config.max_context_chars = 10;
        config.compaction.high_water_mark_chars = 5;
        let store = ContextStore::new();
        store.append(
            USER_AUTHOR,
            EventPayload::UserInput {
                text: "x".repeat(100),
            },
        );
        let provider = ScriptedProvider::new(vec!["unreachable"]);

        let stage = LlmStage::new(todo_spec());
        let result = stage.run(&store, &registry, &provider, &ctx, &config).await;

        assert!(matches!(
            result,
            Err(PipelineError::ContextTooLarge { size: 100, .. })
        ));
    }

    #[test]
    fn test_extract_structured_fields() {
        let narrative = "PROJECT_NAME: rnaseq_quant\nPROCESS_NAME: salmon_quant\n\nTODO LIST:\n1. Build index\n2. Quantify reads\n3. Summarize";
        let fields = extract_structured_fields(narrative);

        assert_eq!(fields["project_name"], "rnaseq_quant");
        assert_eq!(fields["process_name"], "salmon_quant");
        assert_eq!(fields["plan"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_extract_structured_fields_empty_when_absent() {
        let fields = extract_structured_fields("Just a plain summary of the config file.");
        assert!(fields.as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_from_registry_is_fatal() {
        let (_dir, ctx, _registry, config) = test_harness();
        let empty_registry = ToolRegistry::new();
        let store = seeded_store();
        let provider = ScriptedProvider::new(vec![
            r#"{"tool": "create_path", "arguments": {"path": "x"}}"#,
        ]);

        let stage = LlmStage::new(structure_spec());
        let result = stage
            .run(&store, &empty_registry, &provider, &ctx, &config)
            .await;

        assert!(matches!(
            result,
            Err(PipelineError::Tool(ToolError::UnknownTool(_)))
        ));
    }
}
