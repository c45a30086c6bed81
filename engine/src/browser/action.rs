//! Constrained browser action vocabulary
//!
//! Coder-role output is parsed into an `ActionScript`. Two surface forms are
//! accepted:
//!
//! ```text
//! [{"action": "navigate", "url": "https://example.com"},
//!  {"action": "type", "selector": "#q", "text": "widgets", "submit": true}]
//! ```
//!
//! or one action per line:
//!
//! ```text
//! navigate https://example.com
//! type "#q" "widgets" enter
//! wait_for ".results" 5000
//! ```
//!
//! Anything outside the vocabulary is rejected.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::llm::{extract_fenced_json, find_json};

/// Most actions accepted in one script
pub const MAX_SCRIPT_ACTIONS: usize = 40;

const DEFAULT_WAIT_MS: u64 = 5_000;
const MAX_WAIT_MS: u64 = 60_000;

/// One instruction the browser interpreter understands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BrowserAction {
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
        /// Press Enter after typing
        #[serde(default)]
        submit: bool,
    },
    Select {
        selector: String,
        value: String,
    },
    Scroll {
        /// Positive scrolls down
        #[serde(default = "default_scroll")]
        pixels: i64,
    },
    WaitFor {
        /// Element to wait for; `None` just pauses
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default = "default_wait_ms")]
        timeout_ms: u64,
    },
}

fn default_scroll() -> i64 {
    600
}

fn default_wait_ms() -> u64 {
    DEFAULT_WAIT_MS
}

impl BrowserAction {
    pub fn verb(&self) -> &'static str {
        match self {
            BrowserAction::Navigate { .. } => "navigate",
            BrowserAction::Click { .. } => "click",
            BrowserAction::Type { .. } => "type",
            BrowserAction::Select { .. } => "select",
            BrowserAction::Scroll { .. } => "scroll",
            BrowserAction::WaitFor { .. } => "wait_for",
        }
    }

    fn validate(&self) -> Result<(), ScriptError> {
        let empty = |field: &str| ScriptError::InvalidArgument {
            verb: self.verb(),
            reason: format!("{} must not be empty", field),
        };

        match self {
            BrowserAction::Navigate { url } => {
                let lower = url.trim().to_ascii_lowercase();
                if !(lower.starts_with("http://") || lower.starts_with("https://")) {
                    return Err(ScriptError::InvalidArgument {
                        verb: "navigate",
                        reason: format!("only http(s) URLs are allowed, got '{}'", url),
                    });
                }
            }
            BrowserAction::Click { selector }
            | BrowserAction::Type { selector, .. }
            | BrowserAction::Select { selector, .. } => {
                if selector.trim().is_empty() {
                    return Err(empty("selector"));
                }
            }
            BrowserAction::WaitFor {
                selector: Some(selector),
                ..
            } if selector.trim().is_empty() => return Err(empty("selector")),
            BrowserAction::WaitFor { timeout_ms, .. } if *timeout_ms > MAX_WAIT_MS => {
                return Err(ScriptError::InvalidArgument {
                    verb: "wait_for",
                    reason: format!("timeout {}ms exceeds {}ms", timeout_ms, MAX_WAIT_MS),
                });
            }
            _ => {}
        }
        Ok(())
    }
}

impl fmt::Display for BrowserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserAction::Navigate { url } => write!(f, "navigate {}", url),
            BrowserAction::Click { selector } => write!(f, "click {:?}", selector),
            BrowserAction::Type {
                selector,
                text,
                submit,
            } => {
                write!(f, "type {:?} {:?}", selector, text)?;
                if *submit {
                    f.write_str(" enter")?;
                }
                Ok(())
            }
            BrowserAction::Select { selector, value } => {
                write!(f, "select {:?} {:?}", selector, value)
            }
            BrowserAction::Scroll { pixels } => write!(f, "scroll {}", pixels),
            BrowserAction::WaitFor {
                selector,
                timeout_ms,
            } => match selector {
                Some(selector) => write!(f, "wait_for {:?} {}", selector, timeout_ms),
                None => write!(f, "wait_for {}", timeout_ms),
            },
        }
    }
}

/// Reasons a coder answer is not a usable script
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("no actions found in model output")]
    Empty,

    #[error("unknown action '{0}'")]
    UnknownVerb(String),

    #[error("invalid {verb} action: {reason}")]
    InvalidArgument { verb: &'static str, reason: String },

    #[error("script has {0} actions, limit is {max}", max = MAX_SCRIPT_ACTIONS)]
    TooLong(usize),
}

/// Ordered, validated list of actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionScript {
    actions: Vec<BrowserAction>,
}

impl ActionScript {
    /// Build a script from already-typed actions
    pub fn new(actions: Vec<BrowserAction>) -> Result<Self, ScriptError> {
        if actions.is_empty() {
            return Err(ScriptError::Empty);
        }
        if actions.len() > MAX_SCRIPT_ACTIONS {
            return Err(ScriptError::TooLong(actions.len()));
        }
        for action in &actions {
            action.validate()?;
        }
        Ok(Self { actions })
    }

    /// Parse coder-role output
    pub fn parse(output: &str) -> Result<Self, ScriptError> {
        let json = find_json(output, true).or_else(|| {
            find_json(output, false).and_then(|v| v.get("actions").cloned())
        });

        match json {
            Some(serde_json::Value::Array(items)) => {
                let mut actions = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        // `["click #buy", ...]`: each string is a line-form action
                        serde_json::Value::String(line) => actions.extend(parse_lines(&line)?),
                        item => actions.push(parse_json_action(item)?),
                    }
                }
                Self::new(actions)
            }
            _ => {
                let body = extract_fenced_json(output).unwrap_or(output);
                Self::new(parse_lines(body)?)
            }
        }
    }

    pub fn actions(&self) -> &[BrowserAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl fmt::Display for ActionScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, action) in self.actions.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", action)?;
        }
        Ok(())
    }
}

fn parse_json_action(value: serde_json::Value) -> Result<BrowserAction, ScriptError> {
    let verb = value
        .get("action")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ScriptError::UnknownVerb(value.to_string()))?;

    let canonical = canonical_verb(&verb).ok_or_else(|| ScriptError::UnknownVerb(verb.clone()))?;

    let mut value = value;
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "action".to_string(),
            serde_json::Value::String(canonical.to_string()),
        );
    }

    serde_json::from_value(value).map_err(|e| ScriptError::InvalidArgument {
        verb: canonical,
        reason: e.to_string(),
    })
}

fn canonical_verb(verb: &str) -> Option<&'static str> {
    match verb.trim().to_ascii_lowercase().as_str() {
        "navigate" | "goto" | "open" | "visit" => Some("navigate"),
        "click" => Some("click"),
        "type" | "fill" | "input" => Some("type"),
        "select" => Some("select"),
        "scroll" => Some("scroll"),
        "wait_for" | "wait" | "waitfor" => Some("wait_for"),
        _ => None,
    }
}

fn list_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:\d+[.)]|[-*])\s+").expect("Invalid list marker pattern"))
}

fn parse_lines(body: &str) -> Result<Vec<BrowserAction>, ScriptError> {
    let mut actions = Vec::new();

    for raw in body.lines() {
        let line = list_marker().replace(raw, "");
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") || line.starts_with("```") {
            continue;
        }

        let tokens = tokenize(line);
        let Some((verb, args)) = tokens.split_first() else {
            continue;
        };
        let canonical =
            canonical_verb(verb).ok_or_else(|| ScriptError::UnknownVerb(verb.to_string()))?;

        actions.push(action_from_tokens(canonical, args)?);
    }

    Ok(actions)
}

fn action_from_tokens(verb: &'static str, args: &[String]) -> Result<BrowserAction, ScriptError> {
    let missing = |what: &str| ScriptError::InvalidArgument {
        verb,
        reason: format!("missing {}", what),
    };
    let number = |s: &str| -> Result<i64, ScriptError> {
        s.parse::<i64>().map_err(|_| ScriptError::InvalidArgument {
            verb,
            reason: format!("'{}' is not a number", s),
        })
    };

    let action = match verb {
        "navigate" => BrowserAction::Navigate {
            url: args.first().ok_or_else(|| missing("url"))?.clone(),
        },
        "click" => BrowserAction::Click {
            selector: args.first().ok_or_else(|| missing("selector"))?.clone(),
        },
        "type" => BrowserAction::Type {
            selector: args.first().ok_or_else(|| missing("selector"))?.clone(),
            text: args.get(1).ok_or_else(|| missing("text"))?.clone(),
            submit: args
                .get(2)
                .map(|s| matches!(s.to_ascii_lowercase().as_str(), "enter" | "submit"))
                .unwrap_or(false),
        },
        "select" => BrowserAction::Select {
            selector: args.first().ok_or_else(|| missing("selector"))?.clone(),
            value: args.get(1).ok_or_else(|| missing("value"))?.clone(),
        },
        "scroll" => BrowserAction::Scroll {
            pixels: match args.first().map(|s| s.to_ascii_lowercase()) {
                None => default_scroll(),
                Some(s) if s == "down" => default_scroll(),
                Some(s) if s == "up" => -default_scroll(),
                Some(s) => number(&s)?,
            },
        },
        _ => {
            // wait_for [selector] [timeout_ms]
            let (selector, timeout) = match args {
                [] => (None, None),
                [one] if one.chars().all(|c| c.is_ascii_digit()) => (None, Some(one)),
                [one] => (Some(one.clone()), None),
                [sel, ms, ..] => (Some(sel.clone()), Some(ms)),
            };
            let timeout_ms = match timeout {
                Some(ms) => u64::try_from(number(ms)?).map_err(|_| ScriptError::InvalidArgument {
                    verb,
                    reason: "negative timeout".to_string(),
                })?,
                None => DEFAULT_WAIT_MS,
            };
            BrowserAction::WaitFor {
                selector,
                timeout_ms,
            }
        }
    };

    Ok(action)
}

/// Split on whitespace, keeping double- or single-quoted runs together
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut had_quote = false;

    for ch in line.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(ch);
                had_quote = true;
            }
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() || had_quote {
                    tokens.push(std::mem::take(&mut current));
                }
                had_quote = false;
            }
            (None, c) => current.push(c),
        }
    }
    if !current.is_empty() || had_quote {
        tokens.push(current);
    }
    tokens
}
