//! LLM integration for flowgen.
//!
//! Provides the opaque generation capability consumed by pipeline stages and
//! the compaction engine: the [`LlmProvider`] trait, a [`LiteLlmClient`] for
//! OpenAI-compatible endpoints, and a parser that extracts tool calls from
//! raw completion text.

pub mod litellm;
pub mod parser;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
};
pub use parser::{JsonToolCallParser, ParsedToolCall, ToolCallParser};
