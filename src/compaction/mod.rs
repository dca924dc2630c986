//! Context compaction for long pipeline runs.
//!
//! After each stage boundary the engine measures the current view. When the
//! size crosses the configured high-water mark, the oldest contiguous run of
//! events — never the most recent stage's own events — is summarized through
//! the LLM and replaced with a single summary event. A structured
//! [`ProjectState`] snapshot rides along in the summary payload, so names,
//! paths, and decisions survive even a sloppy digest.
//!
//! A failed summarization is not fatal: the cycle is skipped and retried at
//! the next stage boundary. The cost of skipping is only the risk of hitting
//! the hard context cap at a later generation call.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::{ContextStore, ContextView, EventKind, ProjectState};
use crate::llm::{GenerationRequest, LlmProvider, Message};

/// Instruction given to the model when digesting a range of events.
const COMPACTION_INSTRUCTION: &str = "You are compacting the working context of a project \
generation pipeline. Summarize the following conversation excerpt into a short digest. \
You MUST preserve verbatim: the project name, the process name, every file or directory \
path mentioned, and every decision made. Drop only verbose reasoning and narrative. \
Reply with the digest text only.";

/// Configuration for the compaction engine.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// View size (in characters) above which compaction is attempted.
    pub high_water_mark_chars: usize,
    /// Model used for summarization. Empty means the provider's default.
    pub model: String,
    /// Cap on the digest length.
    pub max_summary_tokens: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            high_water_mark_chars: 24_000,
            model: String::new(),
            max_summary_tokens: 1024,
        }
    }
}

/// Outcome of one compaction cycle, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// View under the high-water mark, nothing to do.
    NotNeeded,
    /// Over the mark but no eligible prefix (already compacted, or only the
    /// latest stage's events remain).
    NothingEligible,
    /// A prefix was replaced with a summary covering the given range.
    Compacted { start: u64, end: u64 },
    /// Summarization failed; skipped until the next stage boundary.
    Skipped,
}

/// Monitors a context store and compacts it when it grows past the mark.
pub struct CompactionEngine {
    provider: Arc<dyn LlmProvider>,
    config: CompactionConfig,
}

impl CompactionEngine {
    /// Create a new engine using the given provider for summarization.
    pub fn new(provider: Arc<dyn LlmProvider>, config: CompactionConfig) -> Self {
        Self { provider, config }
    }

    /// Run one compaction cycle against the store.
    ///
    /// Never fails the run: summarization errors downgrade to
    /// [`CompactionOutcome::Skipped`].
    pub async fn run_cycle(&self, store: &ContextStore) -> CompactionOutcome {
        let view = store.current_view();
        let size = view.size_chars();

        if size <= self.config.high_water_mark_chars {
            return CompactionOutcome::NotNeeded;
        }

        let eligible = eligible_prefix_len(&view);
        // A prefix of one event is either already a summary or too small to
        // be worth a model call; skipping here is what makes repeated cycles
        // over an unchanged store idempotent.
        if eligible < 2 {
            debug!(size, "context over high-water mark but nothing eligible");
            return CompactionOutcome::NothingEligible;
        }

        let prefix = &view.events()[..eligible];
        let start = prefix[0].covered_start();
        let end = prefix[prefix.len() - 1].covered_end();
        let snapshot = ProjectState::replay(prefix);

        let digest = match self.summarize(prefix).await {
            Ok(digest) => digest,
            Err(e) => {
                warn!(error = %e, "compaction summarization failed, skipping cycle");
                return CompactionOutcome::Skipped;
            }
        };

        match store.replace_prefix(end, digest, snapshot) {
            Ok(_) => {
                info!(start, end, size_before = size, "compacted context prefix");
                CompactionOutcome::Compacted { start, end }
            }
            Err(e) => {
                // Single-writer sessions should never hit this.
                warn!(error = %e, "compaction range no longer valid, skipping cycle");
                CompactionOutcome::Skipped
            }
        }
    }

    /// Ask the model to digest a range of events.
    async fn summarize(
        &self,
        prefix: &[crate::context::Event],
    ) -> Result<String, crate::error::LlmError> {
        let transcript = render_transcript(prefix);
        let request = GenerationRequest::new(
            self.config.model.clone(),
            vec![
                Message::system(COMPACTION_INSTRUCTION),
                Message::user(transcript),
            ],
        )
        .with_temperature(0.2)
        .with_max_tokens(self.config.max_summary_tokens);

        let response = self.provider.generate(request).await?;
        response
            .first_content()
            .map(str::to_string)
            .ok_or_else(|| {
                crate::error::LlmError::ParseError("empty summarization response".to_string())
            })
    }
}

/// Number of leading view events eligible for compaction.
///
/// Everything from the first event authored by the most recently completed
/// stage onward must stay verbatim for the immediately following stage. With
/// no completed stage there is no boundary to respect yet, so nothing is
/// eligible either (compaction only runs at stage boundaries).
fn eligible_prefix_len(view: &ContextView) -> usize {
    let Some(last_author) = view.last_stage_author().map(str::to_string) else {
        return 0;
    };
    view.events()
        .iter()
        .position(|e| e.author == last_author)
        .unwrap_or(0)
}

/// Render an event slice as plain text for the summarization prompt.
fn render_transcript(events: &[crate::context::Event]) -> String {
    use crate::context::EventPayload;

    let mut out = String::new();
    for event in events {
        match &event.payload {
            EventPayload::UserInput { text } => {
                out.push_str(&format!("user: {}\n", text));
            }
            EventPayload::StageOutput {
                output_key,
                narrative,
                ..
            } => {
                out.push_str(&format!("{} ({}): {}\n", event.author, output_key, narrative));
            }
            EventPayload::ToolCall { tool, arguments } => {
                out.push_str(&format!("{} called {}({})\n", event.author, tool, arguments));
            }
            EventPayload::ToolResult {
                tool,
                success,
                output,
                error,
                ..
            } => {
                if *success {
                    out.push_str(&format!("{} result: {}\n", tool, output));
                } else {
                    out.push_str(&format!(
                        "{} failed: {}\n",
                        tool,
                        error.as_deref().unwrap_or("unknown error")
                    ));
                }
            }
            EventPayload::CompactionSummary { digest, .. } => {
                out.push_str(&format!("earlier summary: {}\n", digest));
            }
        }
    }
    out
}

/// Whether the first event of the view is a compaction summary.
pub fn starts_with_summary(view: &ContextView) -> bool {
    view.events()
        .first()
        .is_some_and(|e| e.kind() == EventKind::CompactionSummary)
}
