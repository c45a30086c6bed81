//! Task Planner
//!
//! Uses the gateway's general role to turn a goal into a plan, analyze page
//! state, propose recoveries and write the final summary. Model output is
//! parsed into fixed shapes; anything that does not fit is reported as
//! malformed (planning), degraded (analysis) or treated as abort (recovery).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::{format_memories, format_page, format_step_log, truncate_chars, PromptBudget};
use super::types::{BrowsingContext, Goal, Plan, PlanStep, RecoveryDecision, RecoveryPlan, StepError};
use crate::llm::{find_json, Gateway, LLMError, Message, ModelRole};
use crate::memory::{MemoryTag, ScoredRecord};

/// Why no plan could be produced
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("planner model unavailable: {0}")]
    Gateway(#[from] LLMError),

    #[error("malformed plan: {0}")]
    Malformed(String),
}

/// Structured page analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    #[serde(default)]
    pub page_purpose: String,
    #[serde(default)]
    pub interactive_elements: Vec<String>,
    #[serde(default)]
    pub navigation_options: Vec<String>,
    #[serde(default)]
    pub auth_requirements: Vec<String>,

    /// Raw model answer
    #[serde(default)]
    pub full_analysis: String,

    /// 1.0 for a parsed analysis, lower for prose, 0.0 when empty
    #[serde(default)]
    pub confidence: f32,
}

impl AnalysisSummary {
    pub fn is_empty(&self) -> bool {
        self.page_purpose.is_empty()
            && self.interactive_elements.is_empty()
            && self.full_analysis.trim().is_empty()
    }

    /// Text stored in memory
    pub fn to_memory_text(&self, url: &str) -> String {
        if self.page_purpose.is_empty() {
            return format!("UI analysis of {}:\n{}", url, self.full_analysis.trim());
        }
        let mut text = format!("UI analysis of {}: {}", url, self.page_purpose);
        let sections = [
            ("Interactive elements", &self.interactive_elements),
            ("Navigation", &self.navigation_options),
            ("Auth requirements", &self.auth_requirements),
        ];
        for (label, items) in sections {
            if !items.is_empty() {
                text.push_str(&format!("\n{}: {}", label, items.join("; ")));
            }
        }
        text
    }
}

/// Loosely typed analysis as models tend to emit it
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    page_purpose: Option<String>,
    #[serde(default)]
    interactive_elements: Option<Value>,
    #[serde(default)]
    navigation_options: Option<Value>,
    #[serde(default)]
    auth_requirements: Option<Value>,
}

pub struct TaskPlanner {
    gateway: Arc<dyn Gateway>,
    budget: PromptBudget,
    max_steps: usize,
}

impl TaskPlanner {
    pub fn new(gateway: Arc<dyn Gateway>, budget: PromptBudget, max_steps: usize) -> Self {
        Self {
            gateway,
            budget,
            max_steps: max_steps.max(1),
        }
    }

    /// Turn the goal into an ordered, non-empty list of steps
    pub async fn create_plan(
        &self,
        goal: &Goal,
        context: &BrowsingContext,
        memories: &[ScoredRecord],
    ) -> Result<Plan, PlanError> {
        let system = Message::system(
            "You plan web automation. Break the goal into short, atomic browser steps \
             (navigate to a URL, click an element, type into a field, select an option, \
             scroll, wait for an element). Output ONLY a JSON array of step strings, e.g. \
             [\"Navigate to https://example.com\", \"Type 'widgets' into the search box and submit\"].",
        );
        let user = Message::user(format!(
            "GOAL: {}\n\nCURRENT STATE:\n{}\n\nRELATED PAST KNOWLEDGE:\n{}",
            goal,
            format_page(context, &self.budget),
            format_memories(memories, &self.budget)
        ));

        let answer = self
            .gateway
            .invoke(ModelRole::General, &[system, user])
            .await?;

        let steps = self.parse_steps(&answer)?;
        tracing::info!("Planned {} steps for goal", steps.len());
        Ok(Plan {
            goal: goal.clone(),
            steps,
        })
    }

    /// Parse model output into at most `max_steps` steps
    ///
    /// Accepts a JSON array of strings or of objects with a `description`
    /// or `instruction` field, or a numbered/bulleted list.
    pub fn parse_steps(&self, content: &str) -> Result<Vec<PlanStep>, PlanError> {
        let instructions = match find_json(content, true) {
            Some(Value::Array(items)) => items.iter().filter_map(step_text).collect::<Vec<_>>(),
            _ => list_items(content),
        };

        if instructions.is_empty() {
            return Err(PlanError::Malformed(format!(
                "no steps in model output: {}",
                truncate_chars(content.trim(), 120)
            )));
        }

        if instructions.len() > self.max_steps {
            tracing::warn!(
                "Plan has {} steps; keeping the first {}",
                instructions.len(),
                self.max_steps
            );
        }

        Ok(instructions
            .into_iter()
            .take(self.max_steps)
            .enumerate()
            .map(|(i, text)| PlanStep::new(i + 1, text))
            .collect())
    }

    /// Best-effort page analysis; never fails
    pub async fn analyze_ui(&self, context: &BrowsingContext) -> AnalysisSummary {
        let system = Message::system(
            "Analyze the web page. Respond with a JSON object with keys \
             page_purpose (string), interactive_elements, navigation_options and \
             auth_requirements (arrays of strings).",
        );
        let user = Message::user(format_page(context, &self.budget));

        match self.gateway.invoke(ModelRole::General, &[system, user]).await {
            Ok(answer) => parse_analysis(&answer),
            Err(e) => {
                tracing::warn!("UI analysis unavailable: {}", e);
                AnalysisSummary::default()
            }
        }
    }

    /// Decide how to continue after a failed step; fails closed to abort
    pub async fn handle_error(
        &self,
        step: &PlanStep,
        error: &StepError,
        goal: &Goal,
        context: &BrowsingContext,
    ) -> RecoveryDecision {
        let system = Message::system(
            "A web automation step failed. Decide whether it can be recovered. Respond \
             with a JSON object: {\"decision\": \"recover\" or \"abort\", \"steps\": [short \
             browser steps to achieve the failed step's intent], \"reason\": string}.",
        );
        let user = Message::user(format!(
            "ORIGINAL GOAL: {}\n\nSTEPS SO FAR:\n{}\n\nFAILED STEP: {}\nERROR: {}\n\nCURRENT STATE:\n{}",
            goal,
            format_step_log(&context.step_log),
            step.instruction,
            truncate_chars(&error.to_string(), 500),
            format_page(context, &self.budget)
        ));

        match self.gateway.invoke(ModelRole::General, &[system, user]).await {
            Ok(answer) => self.parse_recovery(&answer),
            Err(e) => RecoveryDecision::Abort {
                reason: format!("recovery planner unavailable: {}", e),
            },
        }
    }

    fn parse_recovery(&self, content: &str) -> RecoveryDecision {
        let abort = |reason: String| RecoveryDecision::Abort { reason };

        let (steps, rationale) = if let Some(obj) = find_json(content, false) {
            let reason = obj
                .get("reason")
                .and_then(|r| r.as_str())
                .map(str::to_string);
            let decision = obj
                .get("decision")
                .and_then(|d| d.as_str())
                .unwrap_or("recover")
                .to_ascii_lowercase();
            if decision != "recover" {
                return abort(reason.unwrap_or_else(|| "planner chose to abort".to_string()));
            }
            let steps: Vec<String> = obj
                .get("steps")
                .and_then(|s| s.as_array())
                .map(|items| items.iter().filter_map(step_text).collect())
                .unwrap_or_default();
            (steps, reason)
        } else if let Some(Value::Array(items)) = find_json(content, true) {
            (items.iter().filter_map(step_text).collect(), None)
        } else {
            return abort("unparseable recovery answer".to_string());
        };

        if steps.is_empty() {
            return abort(rationale.unwrap_or_else(|| "recovery plan was empty".to_string()));
        }

        RecoveryDecision::Recover(RecoveryPlan {
            steps: steps
                .into_iter()
                .take(self.max_steps)
                .enumerate()
                .map(|(i, text)| PlanStep::new(i + 1, text))
                .collect(),
            rationale,
        })
    }

    /// Natural-language summary of the run
    ///
    /// API discoveries among `memories` are listed separately in the prompt.
    pub async fn summarize(
        &self,
        goal: &Goal,
        context: &BrowsingContext,
        memories: &[ScoredRecord],
    ) -> Result<String, LLMError> {
        let (apis, others): (Vec<ScoredRecord>, Vec<ScoredRecord>) = memories
            .iter()
            .cloned()
            .partition(|m| m.record.tag == MemoryTag::ApiRequest);

        let system = Message::system(
            "Summarize a web automation session for the user: what was accomplished, \
             which APIs or patterns were discovered, and what will help future automation.",
        );
        let user = Message::user(format!(
            "GOAL: {}\n\nSTEP LOG:\n{}\n\nFINAL URL: {}\n\nAPIS DISCOVERED:\n{}\n\nOTHER NOTES:\n{}",
            goal,
            format_step_log(&context.step_log),
            context.current_url,
            format_memories(&apis, &self.budget),
            format_memories(&others, &self.budget)
        ));

        let answer = self
            .gateway
            .invoke(ModelRole::General, &[system, user])
            .await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(LLMError::ParseError("empty summary".to_string()));
        }
        Ok(answer.to_string())
    }
}

/// Step text from a JSON string or an object with a description field
fn step_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Object(obj) => ["description", "instruction", "step", "action"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))?
            .to_string(),
        _ => return None,
    };
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Items of a numbered or bulleted list
fn list_items(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.replace("**", "");
            let line = line.trim();
            let rest = if let Some(rest) = line.strip_prefix(['-', '*', '•']) {
                rest
            } else {
                let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
                if digits == 0 {
                    return None;
                }
                line[digits..].strip_prefix(['.', ')', ':'])?
            };
            let rest = rest.trim();
            if rest.is_empty() {
                None
            } else {
                Some(rest.to_string())
            }
        })
        .collect()
}

fn string_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s],
        _ => Vec::new(),
    }
}

fn parse_analysis(answer: &str) -> AnalysisSummary {
    let parsed = find_json(answer, false).and_then(|v| serde_json::from_value::<RawAnalysis>(v).ok());

    match parsed {
        Some(raw) if raw.page_purpose.as_deref().is_some_and(|p| !p.trim().is_empty()) => {
            AnalysisSummary {
                page_purpose: raw.page_purpose.unwrap_or_default().trim().to_string(),
                interactive_elements: string_list(raw.interactive_elements),
                navigation_options: string_list(raw.navigation_options),
                auth_requirements: string_list(raw.auth_requirements),
                full_analysis: answer.trim().to_string(),
                confidence: 1.0,
            }
        }
        _ if answer.trim().is_empty() => AnalysisSummary::default(),
        _ => AnalysisSummary {
            full_analysis: answer.trim().to_string(),
            confidence: 0.3,
            ..AnalysisSummary::default()
        },
    }
}
