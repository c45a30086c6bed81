//! Conductor data model
//!
//! Goals, plans, the browsing context and the per-step records that make up
//! a run report.

use chrono::{DateTime, Utc};
use sdk::errors::ErrorKind;
use sdk::types::{SessionState, StepStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::context::truncate_chars;
use crate::browser::{CapturedRequest, PageState};

/// User goal; trimmed and never empty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Goal(String);

impl Goal {
    /// Returns `None` for blank text
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One atomic instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// 1-based position within its plan
    pub index: usize,
    pub instruction: String,
}

impl PlanStep {
    pub fn new(index: usize, instruction: impl Into<String>) -> Self {
        Self {
            index,
            instruction: instruction.into(),
        }
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.index, self.instruction)
    }
}

/// Ordered steps serving one goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub goal: Goal,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Numbered list, one step per line
    pub fn to_text(&self) -> String {
        self.steps
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Substitute steps proposed after a failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub steps: Vec<PlanStep>,
    pub rationale: Option<String>,
}

/// Outcome of asking the planner how to handle a failed step
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryDecision {
    Recover(RecoveryPlan),
    Abort { reason: String },
}

/// Classified failure of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Page observation produced by a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDelta {
    pub url: String,
    pub title: String,

    /// Page content cut to the snapshot budget
    pub snapshot: String,

    #[serde(default)]
    pub network: Vec<CapturedRequest>,
}

impl ContextDelta {
    pub fn from_page(page: PageState, max_chars: usize) -> Self {
        Self {
            url: page.url,
            title: page.title,
            snapshot: truncate_chars(&page.content, max_chars),
            network: page.network,
        }
    }
}

/// Result of attempting one step
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub step: PlanStep,
    pub success: bool,
    pub delta: Option<ContextDelta>,
    pub error: Option<StepError>,

    /// Scripts executed (1, or 2 with the fix retry)
    pub attempts: u32,

    /// Last script tried, in line form
    pub script: Option<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(step: PlanStep, delta: ContextDelta, attempts: u32, script: String) -> Self {
        Self {
            step,
            success: true,
            delta: Some(delta),
            error: None,
            attempts,
            script: Some(script),
        }
    }

    pub fn failed(step: PlanStep, error: StepError, attempts: u32, script: Option<String>) -> Self {
        Self {
            step,
            success: false,
            delta: None,
            error: Some(error),
            attempts,
            script,
        }
    }
}

/// One recovery step as it ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub instruction: String,
    pub succeeded: bool,
    pub error: Option<StepError>,
}

/// Final record of one original plan step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: PlanStep,
    pub status: StepStatus,
    pub url_after: Option<String>,

    /// Error of the original attempt, if it failed
    pub error: Option<StepError>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery: Vec<RecoveryAttempt>,

    /// Planner's rationale for the recovery or reason for aborting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    pub finished_at: DateTime<Utc>,
}

impl StepRecord {
    /// One line for prompts and the fallback summary
    pub fn describe(&self) -> String {
        let mut line = format!("{} [{}]", self.step, self.status);
        if let Some(url) = &self.url_after {
            line.push_str(&format!(" -> {}", url));
        }
        if let Some(err) = &self.error {
            line.push_str(&format!(" (error: {})", err.message));
        }
        line
    }
}

/// Mutable view of the browser owned by one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowsingContext {
    pub current_url: String,
    pub title: String,
    pub page_snapshot: String,
    pub step_log: Vec<StepRecord>,
}

impl BrowsingContext {
    /// Replace page state with the delta
    pub fn apply(&mut self, delta: &ContextDelta) {
        self.current_url = delta.url.clone();
        self.title = delta.title.clone();
        self.page_snapshot = delta.snapshot.clone();
    }

    pub fn record(&mut self, record: StepRecord) {
        self.step_log.push(record);
    }

    /// The most recent `n` records, oldest first
    pub fn recent_steps(&self, n: usize) -> &[StepRecord] {
        let start = self.step_log.len().saturating_sub(n);
        &self.step_log[start..]
    }
}

/// State change with its timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub at: DateTime<Utc>,
}

/// Everything a caller learns about one `run_goal`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub session_id: Uuid,
    pub goal: String,
    pub state: SessionState,
    pub summary: Option<String>,
    pub steps: Vec<StepRecord>,
    pub transitions: Vec<Transition>,
    pub memories_written: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn is_done(&self) -> bool {
        self.state == SessionState::Done
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}
