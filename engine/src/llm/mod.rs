//! Language-Model Gateway
//!
//! This module provides a uniform interface for invoking the four model
//! roles the navigator uses (general, coding, reasoning, embedding). Each
//! role is bound to exactly one `LLMProvider`; the `Gateway` trait is what
//! the planner, executor and memory components consume.
//!
//! Providers: Ollama (local, default) and any OpenAI-compatible endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sdk::errors::ErrorKind;
use std::fmt;

pub mod gateway;
pub mod ollama;
pub mod openai;

pub use gateway::ModelGateway;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Provider {0} does not support embeddings")]
    EmbeddingUnsupported(String),
}

impl LLMError {
    /// True for timeouts and connection failures
    ///
    /// These are the conditions a fallback provider may paper over and that
    /// the planner reports as `PlanningFailed`.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            LLMError::ProviderUnavailable(_) | LLMError::NetworkError(_) | LLMError::Timeout
        )
    }

    /// Session taxonomy kind for this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            LLMError::ParseError(_) => ErrorKind::MalformedOutput,
            _ => ErrorKind::GatewayUnavailable,
        }
    }
}

/// Closed set of model roles
///
/// Every role has exactly one binding in `ModelGateway`; there is no string
/// lookup that could resolve to a missing role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    /// Planning, page analysis, recovery and summaries
    General,

    /// Browser action scripts
    Coding,

    /// Network traffic analysis
    Reasoning,

    /// Text embeddings for semantic memory
    Embedding,
}

impl ModelRole {
    pub const ALL: [ModelRole; 4] = [
        ModelRole::General,
        ModelRole::Coding,
        ModelRole::Reasoning,
        ModelRole::Embedding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::General => "general",
            ModelRole::Coding => "coding",
            ModelRole::Reasoning => "reasoning",
            ModelRole::Embedding => "embedding",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message in a conversation sent to a model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// Embedding vector tagged with the model that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub model: String,
    pub vector: Vec<f32>,
}

/// LLM Provider trait that all providers must implement
///
/// One provider instance serves one model.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Model this provider instance talks to
    fn model(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama)
    fn is_local(&self) -> bool;

    /// Generate a text completion for the conversation
    async fn generate(&self, messages: &[Message]) -> Result<String>;

    /// Embed a text
    ///
    /// Providers without an embeddings endpoint keep the default.
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(LLMError::EmbeddingUnsupported(self.name().to_string()))
    }

    /// Check if the provider is currently healthy and available
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// What the navigator core consumes from the model layer
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Invoke the model bound to `role` and return its text answer
    async fn invoke(&self, role: ModelRole, messages: &[Message]) -> Result<String>;

    /// Embed `text` with the embedding role
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
/// Returns `None` if no fenced block is found.
pub(crate) fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object or array starting at position 0 of `s`.
///
/// Counts bracket depth, respecting string literals, to find the matching
/// close bracket.
pub(crate) fn extract_balanced_json(s: &str) -> Option<&str> {
    let (open, close) = match s.chars().next()? {
        '{' => ('{', '}'),
        '[' => ('[', ']'),
        _ => return None,
    };
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Find the first JSON value of the wanted shape in model output.
///
/// Tries, in order: the whole text, the first fenced block, and the first
/// balanced `[`/`{` found in the prose.
pub(crate) fn find_json(content: &str, want_array: bool) -> Option<serde_json::Value> {
    let accept = |v: &serde_json::Value| {
        if want_array {
            v.is_array()
        } else {
            v.is_object()
        }
    };

    let trimmed = content.trim();
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if accept(&v) {
            return Some(v);
        }
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(inner.trim()) {
            if accept(&v) {
                return Some(v);
            }
        }
    }

    let opener = if want_array { '[' } else { '{' };
    for (pos, _) in trimmed.match_indices(opener) {
        if let Some(candidate) = extract_balanced_json(&trimmed[pos..]) {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(candidate) {
                if accept(&v) {
                    return Some(v);
                }
            }
        }
    }

    None
}

/// Drop `<think>...</think>` blocks emitted by reasoning models
pub(crate) fn strip_reasoning(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}
