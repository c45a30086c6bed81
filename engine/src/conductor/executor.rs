//! Action Executor
//!
//! Executes one `PlanStep`: asks the coding role for an `ActionScript`,
//! runs it against the session and reports an `ExecutionOutcome`. When a
//! script is malformed or fails on the page, the coder gets one chance to
//! fix it with the error in hand.

use std::sync::Arc;
use std::time::Duration;

use sdk::errors::ErrorKind;
use tracing::{debug, info, warn};

use super::context::{format_page, format_step_log, truncate_chars, PromptBudget};
use super::types::{BrowsingContext, ContextDelta, ExecutionOutcome, PlanStep, StepError};
use crate::browser::{self, ActionScript, BrowserDriver, BrowserError, SessionHandle};
use crate::llm::{Gateway, Message, ModelRole};

const CODER_SYSTEM_PROMPT: &str = "You write browser automation scripts. Reply ONLY with a JSON array of actions. \
Allowed actions:\n\
{\"action\": \"navigate\", \"url\": \"https://...\"}\n\
{\"action\": \"click\", \"selector\": \"css selector\"}\n\
{\"action\": \"type\", \"selector\": \"css selector\", \"text\": \"...\", \"submit\": false}\n\
{\"action\": \"select\", \"selector\": \"css selector\", \"value\": \"option value\"}\n\
{\"action\": \"scroll\", \"pixels\": 600}\n\
{\"action\": \"wait_for\", \"selector\": \"css selector\", \"timeout_ms\": 5000}\n\
Use selectors that exist in the page content you are given.";

/// Why an attempt did not produce a page state
struct AttemptFailure {
    error: StepError,
    script: Option<String>,
    fixable: bool,
}

pub struct ActionExecutor {
    gateway: Arc<dyn Gateway>,
    driver: Arc<dyn BrowserDriver>,
    budget: PromptBudget,
    action_timeout: Duration,
    fix_retry: bool,
}

impl ActionExecutor {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        driver: Arc<dyn BrowserDriver>,
        budget: PromptBudget,
        action_timeout: Duration,
        fix_retry: bool,
    ) -> Self {
        Self {
            gateway,
            driver,
            budget,
            action_timeout,
            fix_retry,
        }
    }

    /// Run one step against `session`
    ///
    /// Never returns an error: every failure is folded into the outcome.
    pub async fn run(
        &self,
        session: &SessionHandle,
        step: &PlanStep,
        context: &BrowsingContext,
    ) -> ExecutionOutcome {
        let mut messages = vec![
            Message::system(CODER_SYSTEM_PROMPT),
            Message::user(self.step_prompt(step, context)),
        ];
        let max_attempts = if self.fix_retry { 2 } else { 1 };
        let mut executed = 0u32;
        let mut last: Option<AttemptFailure> = None;

        for attempt in 1..=max_attempts {
            if let Some(failure) = &last {
                if !failure.fixable {
                    break;
                }
                info!("Step {}: asking coder to fix script ({})", step.index, failure.error);
                messages.push(Message::assistant(
                    failure.script.clone().unwrap_or_else(|| "(unparseable answer)".to_string()),
                ));
                messages.push(Message::user(format!(
                    "That script failed: {}\nReply with a corrected JSON array of actions.",
                    truncate_chars(&failure.error.message, 500)
                )));
            }

            debug!("Step {} attempt {}/{}", step.index, attempt, max_attempts);

            let answer = match self.gateway.invoke(ModelRole::Coding, &messages).await {
                Ok(answer) => answer,
                Err(e) => {
                    warn!("Coder unavailable for step {}: {}", step.index, e);
                    last = Some(AttemptFailure {
                        error: StepError::new(e.kind(), e.to_string()),
                        script: last.and_then(|f| f.script),
                        fixable: false,
                    });
                    break;
                }
            };

            let script = match ActionScript::parse(&answer) {
                Ok(script) => script,
                Err(e) => {
                    warn!("Step {}: unusable script: {}", step.index, e);
                    last = Some(AttemptFailure {
                        error: StepError::new(ErrorKind::MalformedOutput, e.to_string()),
                        script: Some(truncate_chars(answer.trim(), 500)),
                        fixable: true,
                    });
                    continue;
                }
            };

            executed += 1;
            let line = script.to_string();
            match self.execute(session, &script).await {
                Ok(page) => {
                    info!("Step {} succeeded: {}", step.index, line);
                    let delta = ContextDelta::from_page(page, self.budget.snapshot_chars);
                    return ExecutionOutcome::succeeded(step.clone(), delta, executed, line);
                }
                Err(e) => {
                    warn!("Step {} failed: {}", step.index, e);
                    last = Some(AttemptFailure {
                        error: StepError::new(e.kind(), e.to_string()),
                        script: Some(line),
                        fixable: e.kind() == ErrorKind::ExecutionError,
                    });
                }
            }
        }

        match last {
            Some(failure) => ExecutionOutcome::failed(step.clone(), failure.error, executed, failure.script),
            None => ExecutionOutcome::failed(
                step.clone(),
                StepError::new(ErrorKind::ExecutionError, "no attempt was made"),
                executed,
                None,
            ),
        }
    }

    /// Execute under a deadline scaled by script length
    async fn execute(
        &self,
        session: &SessionHandle,
        script: &ActionScript,
    ) -> Result<crate::browser::PageState, BrowserError> {
        let deadline = self.action_timeout * script.len().max(1) as u32;
        browser::within(deadline, "script", self.driver.execute(session, script)).await
    }

    fn step_prompt(&self, step: &PlanStep, context: &BrowsingContext) -> String {
        format!(
            "STEP: {}\n\nRECENT STEPS:\n{}\n\nCURRENT PAGE:\n{}",
            step.instruction,
            format_step_log(context.recent_steps(self.budget.history_steps)),
            format_page(context, &self.budget)
        )
    }
}
