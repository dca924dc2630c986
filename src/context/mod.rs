//! Shared conversational context for a generation run.
//!
//! The context store is an append-only, ordered log of events: the user's
//! request, stage outputs, tool invocations and their results, and compaction
//! summaries. It is the single source of truth for a session — every derived
//! structure ([`ProjectState`], the LLM transcript) is recomputed from the
//! log, never stored independently.
//!
//! Mutation happens through exactly two operations: `append` and
//! `replace_prefix` (compaction). Both take the write lock, so readers always
//! observe a consistent snapshot and never a partially replaced prefix.

pub mod state;

pub use state::ProjectState;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::RwLock;
use thiserror::Error;

use crate::llm::Message;

/// Author tag for the seed user request.
pub const USER_AUTHOR: &str = "user";

/// Author tag for compaction summaries.
pub const COMPACTION_AUTHOR: &str = "compaction";

/// Errors from context store operations.
#[derive(Debug, Error)]
pub enum ContextError {
    /// `replace_prefix` was asked for a range that is not a prefix of the
    /// current timeline.
    #[error("Invalid compaction range: no prefix ends at sequence {end_sequence}")]
    InvalidRange { end_sequence: u64 },
}

/// Discriminant for the kinds of events a session records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UserInput,
    StageOutput,
    ToolCall,
    ToolResult,
    CompactionSummary,
}

/// Payload of a single event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// The natural-language request that seeds the run.
    UserInput { text: String },

    /// Final output of a stage.
    StageOutput {
        /// Label under which downstream stages refer to this output.
        output_key: String,
        /// The stage's full narrative answer.
        narrative: String,
        /// Fields extracted from the narrative (names, plan, ...).
        structured: Value,
    },

    /// A tool invocation requested by a stage.
    ToolCall { tool: String, arguments: Value },

    /// The result of a tool invocation, success or failure.
    ToolResult {
        tool: String,
        arguments: Value,
        success: bool,
        output: String,
        error: Option<String>,
    },

    /// A synthesized digest standing in for a contiguous range of prior
    /// events. Carries a structured state snapshot so replay does not depend
    /// on the summarizer preserving names and paths in prose.
    CompactionSummary {
        /// First and last sequence number the digest covers, inclusive.
        covers: (u64, u64),
        digest: String,
        snapshot: ProjectState,
    },
}

/// An immutable record of something that happened in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Strictly increasing, never reused.
    pub sequence: u64,
    /// Stage id, [`USER_AUTHOR`], or [`COMPACTION_AUTHOR`].
    pub author: String,
    /// What happened.
    pub payload: EventPayload,
    /// When the event was appended.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// The kind of this event, derived from its payload.
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::UserInput { .. } => EventKind::UserInput,
            EventPayload::StageOutput { .. } => EventKind::StageOutput,
            EventPayload::ToolCall { .. } => EventKind::ToolCall,
            EventPayload::ToolResult { .. } => EventKind::ToolResult,
            EventPayload::CompactionSummary { .. } => EventKind::CompactionSummary,
        }
    }

    /// First sequence number this event accounts for (its own, or the start
    /// of the range a summary covers).
    pub fn covered_start(&self) -> u64 {
        match self.payload {
            EventPayload::CompactionSummary { covers, .. } => covers.0,
            _ => self.sequence,
        }
    }

    /// Last sequence number this event accounts for.
    pub fn covered_end(&self) -> u64 {
        match self.payload {
            EventPayload::CompactionSummary { covers, .. } => covers.1,
            _ => self.sequence,
        }
    }

    /// Approximate size of the event's textual content in characters. Used
    /// as the token proxy for compaction decisions.
    pub fn size_chars(&self) -> usize {
        match &self.payload {
            EventPayload::UserInput { text } => text.len(),
            EventPayload::StageOutput {
                narrative,
                structured,
                ..
            } => narrative.len() + structured.to_string().len(),
            EventPayload::ToolCall { tool, arguments } => {
                tool.len() + arguments.to_string().len()
            }
            EventPayload::ToolResult { output, error, .. } => {
                output.len() + error.as_deref().map_or(0, str::len)
            }
            EventPayload::CompactionSummary { digest, .. } => digest.len(),
        }
    }
}

/// Interior state of the store, guarded by one lock.
struct StoreInner {
    events: Vec<Event>,
    next_sequence: u64,
}

/// Append-only event log with snapshot reads and atomic prefix replacement.
///
/// One store per session; the lock exists for observers, not for concurrent
/// stages (stages run strictly one at a time).
pub struct ContextStore {
    inner: RwLock<StoreInner>,
}

impl ContextStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                events: Vec::new(),
                next_sequence: 0,
            }),
        }
    }

    /// Append an event, assigning it the next sequence number.
    ///
    /// Returns the assigned sequence number.
    pub fn append(&self, author: impl Into<String>, payload: EventPayload) -> u64 {
        let mut inner = self.inner.write().expect("context lock poisoned");
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.events.push(Event {
            sequence,
            author: author.into(),
            payload,
            timestamp: Utc::now(),
        });
        sequence
    }

    /// Snapshot the current timeline.
    pub fn current_view(&self) -> ContextView {
        let inner = self.inner.read().expect("context lock poisoned");
        ContextView {
            events: inner.events.clone(),
        }
    }

    /// Number of events currently in the (possibly compacted) timeline.
    pub fn len(&self) -> usize {
        self.inner.read().expect("context lock poisoned").events.len()
    }

    /// Whether the timeline is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically replace the prefix of events ending at `end_sequence` with
    /// a single [`EventPayload::CompactionSummary`].
    ///
    /// The summary keeps the first covered sequence number, so the union of
    /// covered ranges and retained raw sequences stays contiguous. Returns
    /// the summary's sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidRange`] if no event in the current
    /// timeline ends at `end_sequence`.
    pub fn replace_prefix(
        &self,
        end_sequence: u64,
        digest: String,
        snapshot: ProjectState,
    ) -> Result<u64, ContextError> {
        let mut inner = self.inner.write().expect("context lock poisoned");

        let split = inner
            .events
            .iter()
            .position(|e| e.covered_end() == end_sequence)
            .map(|idx| idx + 1)
            .ok_or(ContextError::InvalidRange { end_sequence })?;

        let start_sequence = inner.events[0].covered_start();
        let summary = Event {
            sequence: start_sequence,
            author: COMPACTION_AUTHOR.to_string(),
            payload: EventPayload::CompactionSummary {
                covers: (start_sequence, end_sequence),
                digest,
                snapshot,
            },
            timestamp: Utc::now(),
        };

        inner.events.splice(..split, std::iter::once(summary));
        Ok(start_sequence)
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A read-only snapshot of the (possibly compacted) timeline.
///
/// Owned transiently by whichever stage is executing; cheap to recompute.
#[derive(Debug, Clone)]
pub struct ContextView {
    events: Vec<Event>,
}

impl ContextView {
    /// The events in chronological order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of events in the view.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the view contains no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total textual size of the view in characters.
    pub fn size_chars(&self) -> usize {
        self.events.iter().map(Event::size_chars).sum()
    }

    /// Author of the most recent [`EventKind::StageOutput`], if any stage has
    /// completed.
    pub fn last_stage_author(&self) -> Option<&str> {
        self.events
            .iter()
            .rev()
            .find(|e| e.kind() == EventKind::StageOutput)
            .map(|e| e.author.as_str())
    }

    /// Replay the project state accumulated so far.
    pub fn project_state(&self) -> ProjectState {
        ProjectState::replay(&self.events)
    }

    /// Render the timeline as an LLM conversation transcript.
    ///
    /// Stage outputs become assistant turns; everything else (input, tool
    /// results, summaries) is presented as user turns, matching how the
    /// conversation would have read uncompacted.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.events.len());
        for event in &self.events {
            match &event.payload {
                EventPayload::UserInput { text } => {
                    messages.push(Message::user(text.clone()));
                }
                EventPayload::StageOutput {
                    output_key,
                    narrative,
                    ..
                } => {
                    messages.push(Message::assistant(format!(
                        "[{} -> {}]\n{}",
                        event.author, output_key, narrative
                    )));
                }
                EventPayload::ToolCall { tool, arguments } => {
                    messages.push(Message::assistant(format!(
                        "Tool call: {}({})",
                        tool, arguments
                    )));
                }
                EventPayload::ToolResult {
                    tool,
                    success,
                    output,
                    error,
                    ..
                } => {
                    let text = if *success {
                        format!("Tool '{}' succeeded: {}", tool, output)
                    } else {
                        format!(
                            "Tool '{}' failed: {}",
                            tool,
                            error.as_deref().unwrap_or("unknown error")
                        )
                    };
                    messages.push(Message::user(text));
                }
                EventPayload::CompactionSummary {
                    digest, snapshot, ..
                } => {
                    messages.push(Message::user(format!(
                        "[Summary of earlier conversation]\n{}\n\nKnown project state: {}",
                        digest,
                        serde_json::to_string(snapshot).unwrap_or_default()
                    )));
                }
            }
        }
        messages
    }
}
