//! Project state derived from the event log.
//!
//! The state is a pure function of the (possibly compacted) timeline: replay
//! folds each event in order, and compaction summaries contribute the
//! snapshot they carry. Nothing here is persisted; replaying the same log
//! always yields the same state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{Event, EventPayload};

/// Structured fields accumulated across stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    /// Project name extracted by the Todo stage (snake_case).
    pub project_name: Option<String>,
    /// Main process name extracted by the Todo stage.
    pub process_name: Option<String>,
    /// Ordered todo list for implementing the workflow.
    pub plan: Vec<String>,
    /// Paths created through tools, relative to the workspace root.
    pub manifest: BTreeSet<String>,
    /// Ids of stages that have emitted their final output, in order.
    pub completed_stages: Vec<String>,
}

impl ProjectState {
    /// Recompute the state by replaying a timeline.
    pub fn replay(events: &[Event]) -> Self {
        let mut state = Self::default();
        for event in events {
            state.apply(event);
        }
        state
    }

    /// Fold a single event into the state.
    fn apply(&mut self, event: &Event) {
        match &event.payload {
            EventPayload::UserInput { .. } | EventPayload::ToolCall { .. } => {}

            EventPayload::StageOutput { structured, .. } => {
                if let Some(name) = structured.get("project_name").and_then(|v| v.as_str()) {
                    self.project_name = Some(name.to_string());
                }
                if let Some(name) = structured.get("process_name").and_then(|v| v.as_str()) {
                    self.process_name = Some(name.to_string());
                }
                if let Some(items) = structured.get("plan").and_then(|v| v.as_array()) {
                    let plan: Vec<String> = items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect();
                    if !plan.is_empty() {
                        self.plan = plan;
                    }
                }
                if !self.completed_stages.iter().any(|s| s == &event.author) {
                    self.completed_stages.push(event.author.clone());
                }
            }

            EventPayload::ToolResult {
                tool,
                arguments,
                success,
                ..
            } => {
                if *success && tool == "create_path" {
                    if let Some(path) = arguments.get("path").and_then(|v| v.as_str()) {
                        self.manifest.insert(path.to_string());
                    }
                }
            }

            EventPayload::CompactionSummary { snapshot, .. } => {
                // The snapshot precedes every retained event chronologically,
                // so later events may still override names and extend the
                // plan; manifest and completion records only accumulate.
                if snapshot.project_name.is_some() {
                    self.project_name = snapshot.project_name.clone();
                }
                if snapshot.process_name.is_some() {
                    self.process_name = snapshot.process_name.clone();
                }
                if !snapshot.plan.is_empty() {
                    self.plan = snapshot.plan.clone();
                }
                self.manifest.extend(snapshot.manifest.iter().cloned());
                for stage in &snapshot.completed_stages {
                    if !self.completed_stages.iter().any(|s| s == stage) {
                        self.completed_stages.push(stage.clone());
                    }
                }
            }
        }
    }
}
