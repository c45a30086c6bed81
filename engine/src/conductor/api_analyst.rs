//! API Analyst
//!
//! Looks at fetch/XHR requests captured after a step and asks the reasoning
//! role what each endpoint does. Findings are written to memory as
//! `api-request` records so later plans can reuse them. Best-effort: a
//! failed analysis is logged and skipped.
//!
//! Every `api-request` record carries a `kind` in its metadata:
//!
//! - `analysis`: what one endpoint does
//! - `replay`: a curl command that repeats the request, written by the
//!   coder role. Stored as text only; the navigator never runs it.
//! - `schema`: the API shape inferred from several related analyses

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use super::context::truncate_chars;
use super::types::PlanStep;
use crate::browser::CapturedRequest;
use crate::llm::{extract_fenced_json, strip_reasoning, Gateway, LLMError, Message, ModelRole};
use crate::memory::{MemoryTag, Metadata, ScoredRecord, SemanticMemory};

const ANALYSIS_CHARS: usize = 1500;
const REPLAY_CHARS: usize = 1200;
const SCHEMA_INPUT_CHARS: usize = 800;
const SCHEMA_CHARS: usize = 2000;

pub const KIND_ANALYSIS: &str = "analysis";
pub const KIND_REPLAY: &str = "replay";
pub const KIND_SCHEMA: &str = "schema";

const REPLAY_SYSTEM_PROMPT: &str = "You write shell commands that replay captured HTTP requests. \
Reply with a single curl command in a ```bash fence and nothing else. \
Keep the URL and query parameters exactly as captured.";

pub struct ApiAnalyst {
    gateway: Arc<dyn Gateway>,
    memory: Arc<SemanticMemory>,
    max_per_step: usize,
    replay_snippets: bool,
}

impl ApiAnalyst {
    pub fn new(gateway: Arc<dyn Gateway>, memory: Arc<SemanticMemory>, max_per_step: usize) -> Self {
        Self {
            gateway,
            memory,
            max_per_step,
            replay_snippets: false,
        }
    }

    /// Also store a replay snippet for every analyzed request
    pub fn with_replay_snippets(mut self, enabled: bool) -> Self {
        self.replay_snippets = enabled;
        self
    }

    /// Explain one captured request
    pub async fn analyze_request(&self, request: &CapturedRequest) -> Result<String, LLMError> {
        let prompt = format!(
            "Analyze this captured API request.\n\nREQUEST:\n{}\n\n\
             Cover: the purpose of the endpoint, any authentication it appears to need, \
             the key parameters and their meaning, and how it could be called directly.",
            serde_json::to_string_pretty(request).unwrap_or_else(|_| request.url.clone())
        );

        let answer = self
            .gateway
            .invoke(ModelRole::Reasoning, &[Message::user(prompt)])
            .await?;
        let answer = strip_reasoning(&answer);
        if answer.is_empty() {
            return Err(LLMError::ParseError("empty analysis".to_string()));
        }
        Ok(answer)
    }

    /// Curl command that repeats `request`
    pub async fn replay_snippet(&self, request: &CapturedRequest) -> Result<String, LLMError> {
        let prompt = format!(
            "Write a curl command that replays this {} request:\n{}",
            request.initiator,
            serde_json::to_string_pretty(request).unwrap_or_else(|_| request.url.clone())
        );
        let answer = self
            .gateway
            .invoke(
                ModelRole::Coding,
                &[Message::system(REPLAY_SYSTEM_PROMPT), Message::user(prompt)],
            )
            .await?;

        let snippet = extract_fenced_json(&answer).unwrap_or(&answer).trim();
        if snippet.is_empty() {
            return Err(LLMError::ParseError("empty replay snippet".to_string()));
        }
        Ok(snippet.to_string())
    }

    /// Analyze the step's requests and store findings; returns records written
    ///
    /// Requests to the same endpoint (query string ignored) are analyzed
    /// once. At most `max_per_step` endpoints are attempted, whether or not
    /// the model answers.
    pub async fn analyze_step(
        &self,
        step: &PlanStep,
        page_url: &str,
        requests: &[CapturedRequest],
    ) -> usize {
        let mut seen = HashSet::new();
        let mut attempted = 0;
        let mut written = 0;

        for request in requests {
            if !seen.insert(endpoint(&request.url)) {
                continue;
            }
            if attempted >= self.max_per_step {
                let remaining: HashSet<_> = requests
                    .iter()
                    .map(|r| endpoint(&r.url))
                    .filter(|e| !seen.contains(e))
                    .collect();
                debug!(
                    "Step {}: analysis cap reached, skipping {} endpoints",
                    step.index,
                    remaining.len() + 1
                );
                break;
            }
            attempted += 1;

            let mut metadata = Metadata::new();
            metadata.insert("url".into(), json!(request.url));
            metadata.insert("initiator".into(), json!(request.initiator));
            metadata.insert("page_url".into(), json!(page_url));
            metadata.insert("step".into(), json!(step.index));

            match self.analyze_request(request).await {
                Ok(analysis) => {
                    let text = format!(
                        "API request {} (during: {})\n{}",
                        request.url,
                        step.instruction,
                        truncate_chars(&analysis, ANALYSIS_CHARS)
                    );
                    written += self.store(&text, metadata.clone(), KIND_ANALYSIS).await;
                }
                Err(e) => warn!("API analysis of {} failed: {}", request.url, e),
            }

            if self.replay_snippets {
                match self.replay_snippet(request).await {
                    Ok(snippet) => {
                        let text = format!(
                            "API replay for {}:\n{}",
                            request.url,
                            truncate_chars(&snippet, REPLAY_CHARS)
                        );
                        written += self.store(&text, metadata, KIND_REPLAY).await;
                    }
                    Err(e) => warn!("Replay snippet for {} failed: {}", request.url, e),
                }
            }
        }

        written
    }

    /// Infer the API shape behind several related analyses
    ///
    /// Only `analysis` records count, and at least two distinct endpoints
    /// are needed. Returns `None` when there is too little to go on or the
    /// reasoning role fails.
    pub async fn infer_schema(&self, related: &[ScoredRecord]) -> Option<String> {
        let analyses: Vec<&ScoredRecord> = related
            .iter()
            .filter(|hit| is_analysis(hit))
            .collect();
        let endpoints = endpoints_of(&analyses);
        if endpoints.len() < 2 {
            return None;
        }

        let listing = analyses
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                format!(
                    "{}. {}",
                    i + 1,
                    truncate_chars(&hit.record.text, SCHEMA_INPUT_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "These API requests were captured on related pages:\n\n{}\n\n\
             Infer the general API: endpoint patterns and parameter structure, \
             required versus optional parameters, authentication, pagination \
             and the conventions it follows (REST, GraphQL, RPC).",
            listing
        );

        match self
            .gateway
            .invoke(ModelRole::Reasoning, &[Message::user(prompt)])
            .await
        {
            Ok(answer) => Some(strip_reasoning(&answer)).filter(|s| !s.is_empty()),
            Err(e) => {
                warn!("API schema inference failed: {}", e);
                None
            }
        }
    }

    /// Infer a schema from `related` and store it; returns records written
    pub async fn record_schema(&self, goal: &str, session_id: &str, related: &[ScoredRecord]) -> usize {
        let Some(schema) = self.infer_schema(related).await else {
            return 0;
        };

        let analyses: Vec<&ScoredRecord> = related.iter().filter(|hit| is_analysis(hit)).collect();
        let endpoints: Vec<String> = endpoints_of(&analyses).into_iter().collect();
        info!("Inferred API schema over {} endpoints", endpoints.len());

        let mut metadata = Metadata::new();
        metadata.insert("goal".into(), json!(goal));
        metadata.insert("session_id".into(), json!(session_id));
        metadata.insert("endpoints".into(), json!(endpoints));
        let text = format!(
            "API schema for {}\n{}",
            endpoints.join(", "),
            truncate_chars(&schema, SCHEMA_CHARS)
        );
        self.store(&text, metadata, KIND_SCHEMA).await
    }

    async fn store(&self, text: &str, mut metadata: Metadata, kind: &str) -> usize {
        metadata.insert("kind".into(), json!(kind));
        match self.memory.add(text, MemoryTag::ApiRequest, metadata).await {
            Ok(_) => 1,
            Err(e) => {
                warn!("Could not store API {}: {}", kind, e);
                0
            }
        }
    }
}

fn is_analysis(hit: &ScoredRecord) -> bool {
    hit.record.tag == MemoryTag::ApiRequest
        && hit.record.metadata.get("kind").and_then(|k| k.as_str()) == Some(KIND_ANALYSIS)
}

fn endpoints_of(hits: &[&ScoredRecord]) -> BTreeSet<String> {
    hits.iter()
        .filter_map(|hit| hit.record.metadata.get("url").and_then(|u| u.as_str()))
        .map(|url| endpoint(url).to_string())
        .collect()
}

/// URL without query string or fragment
fn endpoint(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}
