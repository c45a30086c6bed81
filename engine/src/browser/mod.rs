//! Browser capability
//!
//! The navigator never executes model-written code. The coder role produces
//! an `ActionScript` in a fixed vocabulary (navigate, click, type, select,
//! scroll, wait_for) and a `BrowserDriver` interprets it against a session.
//!
//! - `action`: the vocabulary and its parser
//! - `webdriver`: W3C WebDriver implementation of `BrowserDriver`
//! - `lease`: scoped ownership of one session

use async_trait::async_trait;
use sdk::errors::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

pub mod action;
pub mod lease;
pub mod webdriver;

pub use action::{ActionScript, BrowserAction};
pub use lease::BrowserLease;
pub use webdriver::WebDriverBrowser;

/// Errors raised by a browser driver
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrowserError {
    /// Session could not be opened or closed
    #[error("Browser session error: {0}")]
    Session(String),

    /// An action failed on the page (missing element, bad option, ...)
    #[error("Action {index} ({verb}) failed: {message}")]
    Action {
        index: usize,
        verb: &'static str,
        message: String,
    },

    /// Driver endpoint unreachable or answered garbage
    #[error("Driver transport error: {0}")]
    Transport(String),

    /// Script or wait exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl BrowserError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrowserError::Session(_) => ErrorKind::ResourceError,
            _ => ErrorKind::ExecutionError,
        }
    }
}

/// Opaque handle to an open browsing session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(String);

impl SessionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network request observed by the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub url: String,

    /// Initiator type as reported by the page (fetch, xmlhttprequest)
    pub initiator: String,

    #[serde(default)]
    pub duration_ms: f64,

    #[serde(default)]
    pub transfer_size: u64,
}

/// Observable page state after a script or snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    pub title: String,

    /// Page source, untruncated
    pub content: String,

    /// API-like requests issued since the previous observation
    #[serde(default)]
    pub network: Vec<CapturedRequest>,
}

/// Browser session manager
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open a fresh session
    async fn open_session(&self) -> Result<SessionHandle, BrowserError>;

    /// Run a script; stops at the first failing action
    async fn execute(
        &self,
        session: &SessionHandle,
        script: &ActionScript,
    ) -> Result<PageState, BrowserError>;

    /// Observe the current page without acting
    async fn snapshot(&self, session: &SessionHandle) -> Result<PageState, BrowserError>;

    /// Close a session
    async fn close_session(&self, session: &SessionHandle) -> Result<(), BrowserError>;

    /// Check whether the driver endpoint is reachable
    async fn check_health(&self) -> bool {
        true
    }
}

/// Run a driver call under `deadline`; `what` names it in the timeout error
pub async fn within<T, F>(deadline: Duration, what: &str, call: F) -> Result<T, BrowserError>
where
    F: Future<Output = Result<T, BrowserError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::Timeout(format!(
            "{} did not finish within {}s",
            what,
            deadline.as_secs_f32()
        ))),
    }
}
