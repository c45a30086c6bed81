//! Orchestrator
//!
//! Top-level state machine for one navigation goal:
//!
//! `Idle → Planning → RetrievingContext → Executing ⇄ Recovering → Summarizing → Done`
//!
//! with `Failed(reason)` reachable from any non-terminal state. The
//! orchestrator owns the goal, the plan and the browsing context of a
//! session, and holds the browser lease for exactly as long as the session
//! runs. The lease is released on every exit path, cancellation included.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sdk::errors::ErrorKind;
use sdk::types::{FailureReason, SessionState, StepStatus};
use serde_json::json;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use super::api_analyst::ApiAnalyst;
use super::context::PromptBudget;
use super::executor::ActionExecutor;
use super::planner::TaskPlanner;
use super::types::{
    BrowsingContext, ContextDelta, ExecutionOutcome, Goal, Plan, PlanStep, RecoveryAttempt,
    RecoveryDecision, RunReport, StepError, StepRecord, Transition,
};
use crate::browser::{BrowserDriver, BrowserLease, SessionHandle};
use crate::config::Config;
use crate::llm::Gateway;
use crate::memory::{MemoryTag, Metadata, SemanticMemory};

/// Knobs the orchestrator reads per run
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub search_limit: usize,
    pub summary_search_limit: usize,
    pub snapshot_chars: usize,
    pub analyze_pages: bool,
    pub analyze_network: bool,
    pub infer_schemas: bool,

    /// Deadline for opening, observing and closing the browser session
    pub browser_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            search_limit: config.memory.search_limit,
            summary_search_limit: config.memory.summary_search_limit,
            snapshot_chars: config.navigator.max_snapshot_chars,
            analyze_pages: config.navigator.analyze_pages,
            analyze_network: config.navigator.analyze_network,
            infer_schemas: config.navigator.infer_schemas,
            browser_timeout: config.browser.action_timeout(),
        }
    }
}

/// Mutable bookkeeping of one session
struct Session {
    id: Uuid,
    goal: String,
    state: SessionState,
    transitions: Vec<Transition>,
    context: BrowsingContext,
    memories_written: usize,
    started_at: chrono::DateTime<Utc>,
}

impl Session {
    fn new(goal: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal: goal.trim().to_string(),
            state: SessionState::Idle,
            transitions: Vec::new(),
            context: BrowsingContext::default(),
            memories_written: 0,
            started_at: Utc::now(),
        }
    }

    fn transition(&mut self, to: SessionState) {
        if self.state.is_terminal() || self.state == to {
            return;
        }
        info!("Session {}: {} -> {}", self.id, self.state, to);
        self.transitions.push(Transition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
    }

    fn fail(&mut self, reason: FailureReason) {
        warn!("Session {} failed: {}", self.id, reason);
        self.transition(SessionState::Failed(reason));
    }

    fn into_report(self, summary: Option<String>) -> RunReport {
        RunReport {
            session_id: self.id,
            goal: self.goal,
            state: self.state,
            summary,
            steps: self.context.step_log,
            transitions: self.transitions,
            memories_written: self.memories_written,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Handle to a goal running on its own task
pub struct GoalHandle {
    session_cancel: CancellationToken,
    join: JoinHandle<RunReport>,
}

impl GoalHandle {
    /// Request cancellation; the run stops at its next boundary
    pub fn cancel(&self) {
        self.session_cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.session_cancel.clone()
    }

    /// Wait for the final report
    pub async fn wait(self) -> Result<RunReport, JoinError> {
        self.join.await
    }
}

pub struct Orchestrator {
    driver: Arc<dyn BrowserDriver>,
    memory: Arc<SemanticMemory>,
    planner: TaskPlanner,
    executor: ActionExecutor,
    analyst: ApiAnalyst,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        driver: Arc<dyn BrowserDriver>,
        memory: Arc<SemanticMemory>,
        config: &Config,
    ) -> Self {
        let budget = PromptBudget::from_config(&config.navigator);
        Self {
            planner: TaskPlanner::new(
                Arc::clone(&gateway),
                budget.clone(),
                config.navigator.max_plan_steps,
            ),
            executor: ActionExecutor::new(
                Arc::clone(&gateway),
                Arc::clone(&driver),
                budget,
                config.browser.action_timeout(),
                config.navigator.fix_retry,
            ),
            analyst: ApiAnalyst::new(
                gateway,
                Arc::clone(&memory),
                config.navigator.max_network_analyses,
            )
            .with_replay_snippets(config.navigator.replay_snippets),
            driver,
            memory,
            settings: OrchestratorSettings::from_config(config),
        }
    }

    pub fn memory(&self) -> &Arc<SemanticMemory> {
        &self.memory
    }

    /// Run a goal to completion
    pub async fn run_goal(&self, goal: &str) -> RunReport {
        self.run_goal_with_cancel(goal, CancellationToken::new()).await
    }

    /// Run a goal on a new task
    pub fn spawn_goal(self: &Arc<Self>, goal: impl Into<String>) -> GoalHandle {
        let goal = goal.into();
        let cancel = CancellationToken::new();
        let this = Arc::clone(self);
        let token = cancel.clone();
        let join = tokio::spawn(async move { this.run_goal_with_cancel(&goal, token).await });
        GoalHandle {
            session_cancel: cancel,
            join,
        }
    }

    /// Run a goal; `cancel` ends it with `Failed(Cancelled)`
    ///
    /// Steps completed before cancellation stay in the report.
    pub async fn run_goal_with_cancel(&self, goal: &str, cancel: CancellationToken) -> RunReport {
        let mut session = Session::new(goal);
        let span = tracing::info_span!("session", id = %session.id);

        async move {
            let Some(goal) = Goal::parse(goal) else {
                session.fail(FailureReason::InvalidGoal);
                return session.into_report(None);
            };
            if cancel.is_cancelled() {
                session.fail(FailureReason::Cancelled);
                return session.into_report(None);
            }

            session.transition(SessionState::Planning);
            let lease = match BrowserLease::acquire(
                Arc::clone(&self.driver),
                self.settings.browser_timeout,
            )
            .await
            {
                Ok(lease) => lease,
                Err(e) => {
                    warn!("Could not open browser session: {}", e);
                    session.fail(FailureReason::ResourceError);
                    return session.into_report(None);
                }
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FailureReason::Cancelled),
                result = self.drive(&mut session, &goal, &lease, &cancel) => result,
            };

            if let Err(e) = lease.release().await {
                warn!("Failed to close browser session: {}", e);
            }

            match result {
                Ok(summary) => {
                    session.transition(SessionState::Done);
                    session.into_report(Some(summary))
                }
                Err(reason) => {
                    session.fail(reason);
                    session.into_report(None)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Everything between opening and closing the session
    async fn drive(
        &self,
        session: &mut Session,
        goal: &Goal,
        lease: &BrowserLease,
        cancel: &CancellationToken,
    ) -> Result<String, FailureReason> {
        let handle = lease.handle();
        let memories = self
            .memory
            .search(goal.as_str(), self.settings.search_limit)
            .await;
        info!("Retrieved {} related memories", memories.len());

        let plan = self
            .planner
            .create_plan(goal, &session.context, &memories)
            .await
            .map_err(|e| {
                warn!("Planning failed: {}", e);
                FailureReason::PlanningFailed
            })?;
        ensure_live(cancel)?;

        session.transition(SessionState::RetrievingContext);
        match lease.snapshot().await {
            Ok(page) => session
                .context
                .apply(&ContextDelta::from_page(page, self.settings.snapshot_chars)),
            Err(e) => warn!("Initial snapshot failed: {}", e),
        }
        self.remember_plan(session, &plan).await;
        ensure_live(cancel)?;

        session.transition(SessionState::Executing);
        for step in &plan.steps {
            ensure_live(cancel)?;

            let outcome = self.executor.run(handle, step, &session.context).await;
            let record = if outcome.success {
                let delta = outcome.delta.clone();
                if let Some(delta) = &delta {
                    session.context.apply(delta);
                }
                self.after_success(session, step, delta.as_ref()).await;
                step_record(&session.context, outcome, StepStatus::Succeeded, Vec::new(), None)
            } else {
                session.transition(SessionState::Recovering);
                let record = self.recover(session, goal, handle, outcome, cancel).await;
                session.transition(SessionState::Executing);
                record
            };

            info!("Step {} {}", record.step.index, record.status);
            session.context.record(record);
        }

        ensure_live(cancel)?;
        session.transition(SessionState::Summarizing);
        Ok(self.summarize(session, goal).await)
    }

    /// One bounded recovery cycle for a failed step
    ///
    /// The step counts as recovered iff the first recovery step succeeds;
    /// later recovery steps run in order and stop at the first failure.
    async fn recover(
        &self,
        session: &mut Session,
        goal: &Goal,
        handle: &SessionHandle,
        outcome: ExecutionOutcome,
        cancel: &CancellationToken,
    ) -> StepRecord {
        let error = outcome
            .error
            .clone()
            .unwrap_or_else(|| StepError::new(ErrorKind::ExecutionError, "step failed"));

        let decision = self
            .planner
            .handle_error(&outcome.step, &error, goal, &session.context)
            .await;

        let plan = match decision {
            RecoveryDecision::Abort { reason } => {
                info!("Step {} aborted: {}", outcome.step.index, reason);
                return step_record(
                    &session.context,
                    outcome,
                    StepStatus::Aborted,
                    Vec::new(),
                    Some(reason),
                );
            }
            RecoveryDecision::Recover(plan) => plan,
        };

        info!(
            "Recovering step {} with {} steps",
            outcome.step.index,
            plan.steps.len()
        );

        let mut attempts = Vec::with_capacity(plan.steps.len());
        let mut last_delta = None;
        for recovery_step in &plan.steps {
            if cancel.is_cancelled() {
                break;
            }
            let result = self
                .executor
                .run(handle, recovery_step, &session.context)
                .await;
            attempts.push(RecoveryAttempt {
                instruction: recovery_step.instruction.clone(),
                succeeded: result.success,
                error: result.error.clone(),
            });
            if !result.success {
                break;
            }
            if let Some(delta) = result.delta {
                session.context.apply(&delta);
                last_delta = Some(delta);
            }
        }

        let recovered = attempts.first().is_some_and(|a| a.succeeded);
        if recovered {
            self.after_success(session, &outcome.step, last_delta.as_ref())
                .await;
        }

        let status = if recovered {
            StepStatus::Recovered
        } else {
            StepStatus::Aborted
        };
        step_record(&session.context, outcome, status, attempts, plan.rationale)
    }

    /// Record a landed step, then analyze its page and traffic; best-effort
    ///
    /// The step is stored as a `ui-analysis` record when page analysis
    /// produced something, otherwise as a `plan` record of what ran.
    async fn after_success(
        &self,
        session: &mut Session,
        step: &PlanStep,
        delta: Option<&ContextDelta>,
    ) {
        let url = session.context.current_url.clone();
        let mut metadata = Metadata::new();
        metadata.insert("url".into(), json!(url));
        metadata.insert("step".into(), json!(step.index));
        metadata.insert("session_id".into(), json!(session.id.to_string()));

        let analysis = if self.settings.analyze_pages {
            Some(self.planner.analyze_ui(&session.context).await).filter(|a| !a.is_empty())
        } else {
            None
        };

        let (text, tag) = match analysis {
            Some(analysis) => {
                metadata.insert("confidence".into(), json!(analysis.confidence));
                (analysis.to_memory_text(&url), MemoryTag::UiAnalysis)
            }
            None => {
                let mut text = format!("Step: {}\nResult URL: {}", step.instruction, url);
                if !session.context.title.is_empty() {
                    text.push_str(&format!("\nPage title: {}", session.context.title));
                }
                (text, MemoryTag::Plan)
            }
        };

        match self.memory.add(&text, tag, metadata).await {
            Ok(_) => session.memories_written += 1,
            Err(e) => warn!("Could not store step {}: {}", step.index, e),
        }

        if self.settings.analyze_network {
            if let Some(delta) = delta.filter(|d| !d.network.is_empty()) {
                session.memories_written += self
                    .analyst
                    .analyze_step(step, &delta.url, &delta.network)
                    .await;
            }
        }
    }

    async fn remember_plan(&self, session: &mut Session, plan: &Plan) {
        let text = format!("Plan for goal: {}\n{}", plan.goal, plan.to_text());
        let mut metadata = Metadata::new();
        metadata.insert("goal".into(), json!(plan.goal.as_str()));
        metadata.insert("session_id".into(), json!(session.id.to_string()));
        metadata.insert("steps".into(), json!(plan.steps.len()));

        match self.memory.add(&text, MemoryTag::Plan, metadata).await {
            Ok(_) => session.memories_written += 1,
            Err(e) => warn!("Could not store plan: {}", e),
        }
    }

    /// Model summary, or a deterministic one when the model is unavailable
    ///
    /// API analyses among the related memories are first condensed into a
    /// schema record when network analysis is on.
    async fn summarize(&self, session: &mut Session, goal: &Goal) -> String {
        let memories = self
            .memory
            .search(goal.as_str(), self.settings.summary_search_limit)
            .await;

        if self.settings.analyze_network && self.settings.infer_schemas {
            session.memories_written += self
                .analyst
                .record_schema(goal.as_str(), &session.id.to_string(), &memories)
                .await;
        }

        let summary = match self
            .planner
            .summarize(goal, &session.context, &memories)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Summary model unavailable ({}); using step log", e);
                fallback_summary(goal, &session.context)
            }
        };

        let mut metadata = Metadata::new();
        metadata.insert("goal".into(), json!(goal.as_str()));
        metadata.insert("session_id".into(), json!(session.id.to_string()));
        metadata.insert("final_url".into(), json!(session.context.current_url));
        match self.memory.add(&summary, MemoryTag::Summary, metadata).await {
            Ok(_) => session.memories_written += 1,
            Err(e) => warn!("Could not store summary: {}", e),
        }

        summary
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), FailureReason> {
    if cancel.is_cancelled() {
        Err(FailureReason::Cancelled)
    } else {
        Ok(())
    }
}

fn step_record(
    context: &BrowsingContext,
    outcome: ExecutionOutcome,
    status: StepStatus,
    recovery: Vec<RecoveryAttempt>,
    note: Option<String>,
) -> StepRecord {
    StepRecord {
        step: outcome.step,
        status,
        url_after: (!context.current_url.is_empty()).then(|| context.current_url.clone()),
        error: outcome.error,
        recovery,
        note,
        script: outcome.script,
        finished_at: Utc::now(),
    }
}

/// Summary built from the step log alone
pub fn fallback_summary(goal: &Goal, context: &BrowsingContext) -> String {
    let count = |status: StepStatus| {
        context
            .step_log
            .iter()
            .filter(|r| r.status == status)
            .count()
    };
    let mut text = format!(
        "Goal: {}\nSteps: {} succeeded, {} recovered, {} aborted.",
        goal,
        count(StepStatus::Succeeded),
        count(StepStatus::Recovered),
        count(StepStatus::Aborted)
    );
    for record in &context.step_log {
        text.push('\n');
        text.push_str(&record.describe());
    }
    if !context.current_url.is_empty() {
        text.push_str(&format!("\nFinal URL: {}", context.current_url));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_summary() {
        let goal = Goal::parse("find widgets").unwrap();
        let mut context = BrowsingContext {
            current_url: "https://example.com/results".into(),
            ..BrowsingContext::default()
        };
        for (i, status) in [StepStatus::Succeeded, StepStatus::Aborted].into_iter().enumerate() {
            context.record(StepRecord {
                step: PlanStep::new(i + 1, format!("step {}", i + 1)),
                status,
                url_after: None,
                error: None,
                recovery: Vec::new(),
                note: None,
                script: None,
                finished_at: Utc::now(),
            });
        }

        let a = fallback_summary(&goal, &context);
        let b = fallback_summary(&goal, &context);
        assert_eq!(a, b);
        assert!(a.starts_with("Goal: find widgets\nSteps: 1 succeeded, 0 recovered, 1 aborted."));
        assert!(a.contains("2. step 2 [aborted]"));
        assert!(a.ends_with("Final URL: https://example.com/results"));
    }

    #[test]
    fn test_session_transitions() {
        let mut session = Session::new("  goal ");
        assert_eq!(session.goal, "goal");
        session.transition(SessionState::Planning);
        session.transition(SessionState::Planning);
        session.fail(FailureReason::PlanningFailed);
        session.transition(SessionState::Done);

        assert_eq!(session.transitions.len(), 2);
        assert_eq!(
            session.state,
            SessionState::Failed(FailureReason::PlanningFailed)
        );
        assert_eq!(session.transitions[0].from, SessionState::Idle);
    }
}
