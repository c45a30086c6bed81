//! Conductor System
//!
//! Turns a goal into a plan, drives the browser through it with bounded
//! recovery, and feeds what it learns into semantic memory.

pub mod api_analyst;
pub mod context;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod types;

pub use api_analyst::ApiAnalyst;
pub use context::PromptBudget;
pub use executor::ActionExecutor;
pub use orchestrator::{GoalHandle, Orchestrator, OrchestratorSettings};
pub use planner::{AnalysisSummary, PlanError, TaskPlanner};
pub use types::{
    BrowsingContext, ExecutionOutcome, Goal, Plan, PlanStep, RecoveryDecision, RecoveryPlan,
    RunReport, StepError, StepRecord, Transition,
};
