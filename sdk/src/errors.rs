//! Error types and handling
//!
//! This module provides the error taxonomy shared by the navigator engine and
//! its callers. Component failures are classified into four kinds:
//!
//! - **GatewayUnavailable**: a model could not be reached or timed out
//! - **MalformedOutput**: a model answered but the answer could not be parsed
//! - **ExecutionError**: a browser action failed at runtime
//! - **ResourceError**: a browsing session could not be opened or closed
//!
//! All errors implement the `ErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Trait for navigator error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information.
pub trait ErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and never echoes page
    /// content, prompts or credentials.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around inside a session.
    /// Non-recoverable errors end the session.
    fn is_recoverable(&self) -> bool;
}

/// Classification of a component failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Model unreachable or timed out
    GatewayUnavailable,

    /// Model response could not be parsed
    MalformedOutput,

    /// Browser action failed at runtime
    ExecutionError,

    /// Browsing session could not be opened or closed
    ResourceError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::GatewayUnavailable => "gateway_unavailable",
            ErrorKind::MalformedOutput => "malformed_output",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::ResourceError => "resource_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ErrorExt, ErrorKind};
///
/// let error = EngineError::MalformedOutput("no steps found".to_string());
/// assert_eq!(error.kind(), Some(ErrorKind::MalformedOutput));
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::ResourceError("webdriver refused session".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // Session-level taxonomy
    #[error("Language model gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Browser action failed: {0}")]
    ExecutionError(String),

    #[error("Browser resource error: {0}")]
    ResourceError(String),

    #[error("Session cancelled")]
    Cancelled,

    // Path handling errors
    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(std::path::PathBuf, String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Map this error onto the session taxonomy, if it belongs to it
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::GatewayUnavailable(_) => Some(ErrorKind::GatewayUnavailable),
            Self::MalformedOutput(_) => Some(ErrorKind::MalformedOutput),
            Self::ExecutionError(_) => Some(ErrorKind::ExecutionError),
            Self::ResourceError(_) => Some(ErrorKind::ResourceError),
            _ => None,
        }
    }
}

impl ErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Database operation failed. Check the data directory",
            Self::GatewayUnavailable(_) => {
                "Language model unavailable. Check that Ollama (or your provider) is running"
            }
            Self::MalformedOutput(_) => "The model returned an unexpected answer. Try again",
            Self::ExecutionError(_) => "A browser action failed on the page",
            Self::ResourceError(_) => "Could not start the browser. Check the WebDriver server",
            Self::Cancelled => "The session was cancelled",
            Self::PathCanonicalization(_, _) => "Invalid path specified",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::ResourceError(_) | Self::Cancelled | Self::Config(_) => false,
            _ => true,
        }
    }
}
