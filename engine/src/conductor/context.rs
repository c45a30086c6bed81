//! Prompt context assembly
//!
//! Packs page snapshots, retrieved memories and step history into fixed
//! character budgets before they are placed in a model prompt.

use crate::config::NavigatorConfig;
use crate::memory::ScoredRecord;

use super::types::{BrowsingContext, StepRecord};

const ELLIPSIS: &str = "...";

/// Character budgets for prompt sections
#[derive(Debug, Clone)]
pub struct PromptBudget {
    /// Page content shown to the planner and coder
    pub snapshot_chars: usize,

    /// Per retrieved memory
    pub memory_chars: usize,

    /// All retrieved memories together
    pub memories_total_chars: usize,

    /// Prior steps shown to the coder role
    pub history_steps: usize,
}

impl PromptBudget {
    pub fn from_config(config: &NavigatorConfig) -> Self {
        Self {
            snapshot_chars: config.max_snapshot_chars,
            memory_chars: 200,
            memories_total_chars: 2000,
            history_steps: config.history_window.clamp(1, 3),
        }
    }
}

impl Default for PromptBudget {
    fn default() -> Self {
        Self::from_config(&NavigatorConfig::default())
    }
}

/// Cut `text` to at most `max_chars` characters, ending in "..." when cut
///
/// Counts chars, not bytes, so multi-byte text is never split mid-codepoint.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= ELLIPSIS.len() {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - ELLIPSIS.len()).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Numbered list of retrieved memories within the budget
pub fn format_memories(memories: &[ScoredRecord], budget: &PromptBudget) -> String {
    let mut out = String::new();
    let mut used = 0usize;

    for (i, hit) in memories.iter().enumerate() {
        let line = format!(
            "{}. [{}] {}\n",
            i + 1,
            hit.record.tag,
            truncate_chars(&hit.record.text.replace('\n', " "), budget.memory_chars)
        );
        let len = line.chars().count();
        if used + len > budget.memories_total_chars {
            break;
        }
        used += len;
        out.push_str(&line);
    }

    if out.is_empty() {
        "None".to_string()
    } else {
        out.trim_end().to_string()
    }
}

/// One line per step record
pub fn format_step_log(steps: &[StepRecord]) -> String {
    if steps.is_empty() {
        return "No steps completed".to_string();
    }
    steps
        .iter()
        .map(StepRecord::describe)
        .collect::<Vec<_>>()
        .join("\n")
}

/// URL, title and snapshot block shared by several prompts
pub fn format_page(context: &BrowsingContext, budget: &PromptBudget) -> String {
    let url = if context.current_url.is_empty() {
        "No current URL"
    } else {
        context.current_url.as_str()
    };
    let snapshot = if context.page_snapshot.is_empty() {
        "(empty)".to_string()
    } else {
        truncate_chars(&context.page_snapshot, budget.snapshot_chars)
    };
    format!(
        "URL: {}\nTitle: {}\nPage content sample:\n{}",
        url, context.title, snapshot
    )
}
