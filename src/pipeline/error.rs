//! Error types for the generation pipeline.
//!
//! Everything here aborts the run. Recoverable conditions (a tool failing on
//! an existing path, a skipped compaction cycle) never become a
//! `PipelineError`; they are recorded as events and the model adapts.

use thiserror::Error;

use crate::error::{ConfigError, LlmError};
use crate::tools::ToolError;

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage requested a tool outside its allowed set. Configuration or
    /// prompting bug; never retried.
    #[error("Stage '{stage}' requested tool '{tool}' outside its allowed set")]
    ToolNotPermitted { stage: String, tool: String },

    /// A stage hit its tool-round limit without producing a final answer.
    #[error("Stage '{stage}' exhausted {rounds} tool rounds without completing")]
    StageExhausted { stage: String, rounds: usize },

    /// The context outgrew the hard cap, meaning compaction failed to keep
    /// pace (likely after skipped cycles).
    #[error("Context too large for stage '{stage}': {size} characters exceeds cap of {limit}")]
    ContextTooLarge {
        stage: String,
        size: usize,
        limit: usize,
    },

    /// A stage did not finish within its deadline.
    #[error("Stage '{stage}' timed out after {seconds} seconds")]
    StageTimeout { stage: String, seconds: u64 },

    /// The run was cancelled before the named stage started.
    #[error("Run cancelled before stage '{stage}'")]
    Cancelled { stage: String },

    /// Model or infrastructure failure.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Fatal tool dispatch failure (unknown tool).
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Pipeline configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// The id of the stage this error is attributed to, when known.
    pub fn stage_id(&self) -> Option<&str> {
        match self {
            PipelineError::ToolNotPermitted { stage, .. }
            | PipelineError::StageExhausted { stage, .. }
            | PipelineError::ContextTooLarge { stage, .. }
            | PipelineError::StageTimeout { stage, .. }
            | PipelineError::Cancelled { stage } => Some(stage),
            _ => None,
        }
    }
}

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
