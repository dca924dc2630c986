//! Pipeline configuration.
//!
//! Collects the knobs the orchestration core consumes: generation settings,
//! the tool-round budget per stage, stage deadlines, compaction thresholds,
//! and the workspace root for file-creating tools.

use std::path::PathBuf;
use std::time::Duration;

use crate::compaction::CompactionConfig;
use crate::error::ConfigError;

/// Configuration for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // LLM settings
    /// Model to use for stage generation. Empty means the provider default.
    pub model: String,
    /// Temperature for stage generation.
    pub temperature: f64,
    /// Maximum tokens per generation call.
    pub max_tokens: u32,

    // Execution settings
    /// Maximum model/tool rounds a single stage may take.
    pub max_tool_rounds: usize,
    /// Deadline for a single stage (all its rounds together).
    pub stage_timeout: Duration,

    // Context settings
    /// Compaction thresholds and summarization model.
    pub compaction: CompactionConfig,
    /// Hard cap on the view size fed to a generation call. Exceeding it
    /// (after compaction failed to keep pace) aborts the run.
    pub max_context_chars: usize,

    // Storage settings
    /// Root directory under which the project is scaffolded.
    pub workspace_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.2,
            max_tokens: 4096,
            max_tool_rounds: 8,
            stage_timeout: Duration::from_secs(300),
            compaction: CompactionConfig::default(),
            max_context_chars: 96_000,
            workspace_root: PathBuf::from("."),
        }
    }
}

impl PipelineConfig {
    /// Create a configuration with defaults, rooted at the given workspace.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            ..Self::default()
        }
    }

    /// Load overrides from environment variables on top of defaults.
    ///
    /// Recognized variables: `FLOWGEN_MODEL`, `FLOWGEN_MAX_TOOL_ROUNDS`,
    /// `FLOWGEN_STAGE_TIMEOUT_SECS`, `FLOWGEN_COMPACTION_HIGH_WATER`.
    pub fn from_env(workspace_root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::new(workspace_root);

        if let Ok(model) = std::env::var("FLOWGEN_MODEL") {
            config.model = model;
        }
        if let Ok(raw) = std::env::var("FLOWGEN_MAX_TOOL_ROUNDS") {
            config.max_tool_rounds = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "FLOWGEN_MAX_TOOL_ROUNDS".to_string(),
                message: format!("'{}' is not a valid round count", raw),
            })?;
        }
        if let Ok(raw) = std::env::var("FLOWGEN_STAGE_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "FLOWGEN_STAGE_TIMEOUT_SECS".to_string(),
                message: format!("'{}' is not a valid number of seconds", raw),
            })?;
            config.stage_timeout = Duration::from_secs(secs);
        }
        if let Ok(raw) = std::env::var("FLOWGEN_COMPACTION_HIGH_WATER") {
            config.compaction.high_water_mark_chars =
                raw.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "FLOWGEN_COMPACTION_HIGH_WATER".to_string(),
                    message: format!("'{}' is not a valid character count", raw),
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the generation model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the per-stage tool-round budget.
    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// Set the per-stage deadline.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Set the compaction configuration.
    pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    /// Set the hard context cap.
    pub fn with_max_context_chars(mut self, cap: usize) -> Self {
        self.max_context_chars = cap;
        self
    }

    /// Validate internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tool_rounds must be at least 1".to_string(),
            ));
        }
        if self.stage_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "stage_timeout must be non-zero".to_string(),
            ));
        }
        if self.compaction.high_water_mark_chars >= self.max_context_chars {
            return Err(ConfigError::ValidationFailed(format!(
                "compaction high-water mark ({}) must be below the hard context cap ({})",
                self.compaction.high_water_mark_chars, self.max_context_chars
            )));
        }
        Ok(())
    }
}
