//! Sequential LLM pipeline orchestration.
//!
//! A pipeline is a fixed sequence of stages sharing one append-only context
//! store. The [`catalog`] module defines the built-in Nextflow scaffolding
//! sequence; [`executor::PipelineExecutor`] drives any stage sequence.

pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod stage;

pub use catalog::default_stages;
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use executor::{CancellationFlag, PipelineEvent, PipelineExecutor, RunReport};
pub use stage::{LlmStage, StageResult, StageSpec};
