//! Session vocabulary shared with callers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Orchestrator state machine states
///
/// `Done` and `Failed` are terminal. `Failed` is reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Planning,
    RetrievingContext,
    Executing,
    Recovering,
    Summarizing,
    Done,
    Failed(FailureReason),
}

impl SessionState {
    /// Returns true for `Done` and `Failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Planning => "planning",
            SessionState::RetrievingContext => "retrieving_context",
            SessionState::Executing => "executing",
            SessionState::Recovering => "recovering",
            SessionState::Summarizing => "summarizing",
            SessionState::Done => "done",
            SessionState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Failed(reason) => write!(f, "failed({})", reason),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Reason code attached to the `Failed` state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No plan could be produced (model unreachable or unparseable output)
    PlanningFailed,

    /// The browsing session could not be opened
    ResourceError,

    /// The caller cancelled the session
    Cancelled,

    /// The goal text was empty
    InvalidGoal,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::PlanningFailed => "planning_failed",
            FailureReason::ResourceError => "resource_error",
            FailureReason::Cancelled => "cancelled",
            FailureReason::InvalidGoal => "invalid_goal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planning_failed" => Some(FailureReason::PlanningFailed),
            "resource_error" => Some(FailureReason::ResourceError),
            "cancelled" => Some(FailureReason::Cancelled),
            "invalid_goal" => Some(FailureReason::InvalidGoal),
            _ => None,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status of one original plan step in the step log
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Executed successfully on the first attempt (including the fix retry)
    Succeeded,

    /// Failed, then the recovery plan's first step succeeded
    Recovered,

    /// Failed and recovery was declined or also failed
    Aborted,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Recovered => "recovered",
            StepStatus::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(StepStatus::Succeeded),
            "recovered" => Some(StepStatus::Recovered),
            "aborted" => Some(StepStatus::Aborted),
            _ => None,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
