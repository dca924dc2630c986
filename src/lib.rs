//! flowgen: LLM-driven Nextflow project scaffolding.
//!
//! A fixed sequence of LLM stages shares one append-only context store and
//! scaffolds a complete Nextflow project: plan, directory structure, tests,
//! configuration, and the entrypoint workflow. The context store is kept
//! bounded by LLM-driven compaction, and every filesystem effect goes
//! through the tool registry.

pub mod cli;
pub mod compaction;
pub mod context;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod session;
pub mod tools;

pub use error::{ConfigError, LlmError};
pub use pipeline::{PipelineConfig, PipelineError, PipelineExecutor, RunReport};
pub use session::Session;
