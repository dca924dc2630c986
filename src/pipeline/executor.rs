//! The pipeline executor.
//!
//! Drives the fixed stage sequence over one session's context store:
//! stages run strictly in order, each sees everything its predecessors
//! appended, and a compaction cycle runs at every stage boundary. Progress
//! is reported over an mpsc channel so callers can render it without
//! coupling to the run loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::catalog::default_stages;
use super::config::PipelineConfig;
use super::error::{PipelineError, PipelineResult};
use super::stage::{LlmStage, StageSpec};
use crate::compaction::{CompactionEngine, CompactionOutcome};
use crate::context::{EventPayload, ProjectState, USER_AUTHOR};
use crate::llm::LlmProvider;
use crate::session::Session;
use crate::tools::{ExecutionContext, ToolRegistry};

/// Progress events emitted during a pipeline run.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A stage is about to run.
    StageStarted {
        stage: String,
        ordinal: usize,
        total: usize,
    },
    /// A stage finished and recorded its output.
    StageCompleted {
        stage: String,
        output_key: String,
        tool_calls: usize,
    },
    /// A stage failed; the run is aborting.
    StageFailed { stage: String, error: String },
    /// A context prefix was summarized away at a stage boundary.
    CompactionApplied { start: u64, end: u64 },
    /// All stages completed.
    PipelineCompleted { stages_run: usize },
}

/// Cooperative cancellation handle, checked at stage boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Create a flag in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The run stops before its next stage.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Session the run belonged to.
    pub session_id: Uuid,
    /// Project state replayed from the final context.
    pub project_state: ProjectState,
    /// The last stage's narrative, describing the finished project.
    pub final_summary: String,
    /// Number of events in the final log (post-compaction).
    pub events_in_log: usize,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
}

/// Runs the stage sequence for a session.
pub struct PipelineExecutor {
    stages: Vec<LlmStage>,
    provider: Arc<dyn LlmProvider>,
    registry: ToolRegistry,
    compaction: CompactionEngine,
    config: PipelineConfig,
}

impl PipelineExecutor {
    /// Create an executor with the default five-stage catalog and the
    /// default tool registry.
    pub fn new(provider: Arc<dyn LlmProvider>, config: PipelineConfig) -> PipelineResult<Self> {
        Self::with_stages(provider, config, default_stages())
    }

    /// Create an executor over a custom stage sequence.
    pub fn with_stages(
        provider: Arc<dyn LlmProvider>,
        config: PipelineConfig,
        specs: Vec<StageSpec>,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let compaction = CompactionEngine::new(provider.clone(), config.compaction.clone());
        Ok(Self {
            stages: specs.into_iter().map(LlmStage::new).collect(),
            provider,
            registry: ToolRegistry::with_default_tools(),
            compaction,
            config,
        })
    }

    /// Replace the tool registry.
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The configured stage ids, in execution order.
    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages.iter().map(LlmStage::id).collect()
    }

    /// Run the full stage sequence for the given user request.
    ///
    /// The request seeds the session's context store; each stage then runs
    /// to completion before the next starts, with a compaction cycle at
    /// every boundary. The first stage failure aborts the run.
    pub async fn run(
        &self,
        session: &Session,
        request: &str,
        event_tx: mpsc::Sender<PipelineEvent>,
        cancel: &CancellationFlag,
    ) -> PipelineResult<RunReport> {
        let started = Instant::now();
        let total = self.stages.len();
        let exec_ctx = ExecutionContext::new(&self.config.workspace_root);

        session.store.append(
            USER_AUTHOR,
            EventPayload::UserInput {
                text: request.to_string(),
            },
        );
        info!(session = %session.id, stages = total, "pipeline run started");

        let mut final_summary = String::new();

        for stage in &self.stages {
            if cancel.is_cancelled() {
                warn!(session = %session.id, stage = stage.id(), "run cancelled");
                return Err(PipelineError::Cancelled {
                    stage: stage.id().to_string(),
                });
            }

            let _ = event_tx
                .send(PipelineEvent::StageStarted {
                    stage: stage.id().to_string(),
                    ordinal: stage.spec().ordinal,
                    total,
                })
                .await;

            let outcome = tokio::time::timeout(
                self.config.stage_timeout,
                stage.run(
                    &session.store,
                    &self.registry,
                    &self.provider,
                    &exec_ctx,
                    &self.config,
                ),
            )
            .await;

            let result = match outcome {
                Ok(result) => result,
                Err(_) => Err(PipelineError::StageTimeout {
                    stage: stage.id().to_string(),
                    seconds: self.config.stage_timeout.as_secs(),
                }),
            };

            match result {
                Ok(stage_result) => {
                    let _ = event_tx
                        .send(PipelineEvent::StageCompleted {
                            stage: stage.id().to_string(),
                            output_key: stage.spec().output_key.clone(),
                            tool_calls: stage_result.tool_calls_made.len(),
                        })
                        .await;
                    final_summary = stage_result.narrative;
                }
                Err(e) => {
                    error!(session = %session.id, stage = stage.id(), error = %e, "stage failed");
                    let _ = event_tx
                        .send(PipelineEvent::StageFailed {
                            stage: stage.id().to_string(),
                            error: e.to_string(),
                        })
                        .await;
                    return Err(e);
                }
            }

            if let CompactionOutcome::Compacted { start, end } =
                self.compaction.run_cycle(&session.store).await
            {
                let _ = event_tx
                    .send(PipelineEvent::CompactionApplied { start, end })
                    .await;
            }
        }

        let _ = event_tx
            .send(PipelineEvent::PipelineCompleted { stages_run: total })
            .await;

        let view = session.store.current_view();
        let report = RunReport {
            session_id: session.id,
            project_state: view.project_state(),
            final_summary,
            events_in_log: view.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            session = %session.id,
            duration_ms = report.duration_ms,
            events = report.events_in_log,
            "pipeline run completed"
        );
        Ok(report)
    }
}
