//! W3C WebDriver implementation of `BrowserDriver`
//!
//! Talks plain HTTP/JSON to chromedriver, geckodriver or a Selenium server.
//! Each `BrowserAction` maps onto a fixed sequence of protocol commands;
//! `select` and `scroll` use two fixed `execute/sync` scripts with arguments,
//! never model-provided script text.
//!
//! Network capture drains `performance` resource entries with an initiator
//! of `fetch` or `xmlhttprequest` after every script.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};

use super::{ActionScript, BrowserAction, BrowserDriver, BrowserError, CapturedRequest, PageState, SessionHandle};
use crate::config::BrowserConfig;

/// W3C element reference key
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// WebDriver key code for Enter
const ENTER_KEY: &str = "\u{E007}";

const WAIT_POLL: Duration = Duration::from_millis(250);

const SELECT_SCRIPT: &str = r#"
const el = document.querySelector(arguments[0]);
if (!el) { throw new Error('no element matches ' + arguments[0]); }
const opts = Array.from(el.options || []);
const opt = opts.find(o => o.value === arguments[1] || o.text.trim() === arguments[1]);
if (!opt) { throw new Error('option not found: ' + arguments[1]); }
el.value = opt.value;
el.dispatchEvent(new Event('input', { bubbles: true }));
el.dispatchEvent(new Event('change', { bubbles: true }));
return opt.value;
"#;

const SCROLL_SCRIPT: &str = "window.scrollBy(0, arguments[0]); return window.scrollY;";

const DRAIN_NETWORK_SCRIPT: &str = r#"
if (!window.performance || !performance.getEntriesByType) { return []; }
const entries = performance.getEntriesByType('resource')
  .filter(e => e.initiatorType === 'fetch' || e.initiatorType === 'xmlhttprequest')
  .map(e => ({ url: e.name, initiator: e.initiatorType, duration_ms: e.duration, transfer_size: e.transferSize || 0 }));
performance.clearResourceTimings();
return entries;
"#;

/// Failure of a single protocol command
#[derive(Debug)]
enum CommandError {
    /// Endpoint unreachable or non-JSON answer
    Transport(String),

    /// Driver answered with a W3C error object
    Protocol { error: String, message: String },
}

impl CommandError {
    fn describe(&self) -> String {
        match self {
            CommandError::Transport(msg) => msg.clone(),
            CommandError::Protocol { error, message } => format!("{}: {}", error, message),
        }
    }
}

/// WebDriver client
pub struct WebDriverBrowser {
    base_url: String,
    browser_name: String,
    headless: bool,
    client: Client,
}

impl WebDriverBrowser {
    pub fn new(config: &BrowserConfig) -> Self {
        Self {
            base_url: config.webdriver_url.trim_end_matches('/').to_string(),
            browser_name: config.browser_name.clone(),
            headless: config.headless,
            client: Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn capabilities(&self) -> Value {
        let mut always = json!({ "browserName": self.browser_name });
        let browser = self.browser_name.to_ascii_lowercase();

        if browser.contains("firefox") {
            let args: Vec<&str> = if self.headless { vec!["-headless"] } else { vec![] };
            always["moz:firefoxOptions"] = json!({ "args": args });
        } else {
            let mut args = vec!["--no-sandbox", "--disable-dev-shm-usage", "--window-size=1366,900"];
            if self.headless {
                args.push("--headless=new");
            }
            always["goog:chromeOptions"] = json!({ "args": args });
        }

        json!({ "capabilities": { "alwaysMatch": always } })
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, CommandError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            CommandError::Transport(if e.is_connect() {
                format!("cannot connect to WebDriver at {}", self.base_url)
            } else {
                e.to_string()
            })
        })?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| CommandError::Transport(format!("invalid WebDriver response ({}): {}", status, e)))?;

        let value = payload.get("value").cloned().unwrap_or(Value::Null);
        if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
            return Err(CommandError::Protocol {
                error: error.to_string(),
                message: value
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        if !status.is_success() {
            return Err(CommandError::Protocol {
                error: status.to_string(),
                message: value.to_string(),
            });
        }

        Ok(value)
    }

    fn session_path(session: &SessionHandle, rest: &str) -> String {
        format!("/session/{}{}", session.id(), rest)
    }

    async fn find_element(&self, session: &SessionHandle, selector: &str) -> Result<String, CommandError> {
        let value = self
            .command(
                Method::POST,
                &Self::session_path(session, "/element"),
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await?;

        value
            .get(ELEMENT_KEY)
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| CommandError::Protocol {
                error: "no such element".to_string(),
                message: format!("no element reference for {}", selector),
            })
    }

    async fn execute_sync(&self, session: &SessionHandle, script: &str, args: Value) -> Result<Value, CommandError> {
        self.command(
            Method::POST,
            &Self::session_path(session, "/execute/sync"),
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn wait_for_element(
        &self,
        session: &SessionHandle,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), CommandError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.find_element(session, selector).await {
                Ok(_) => return Ok(()),
                Err(CommandError::Transport(msg)) => return Err(CommandError::Transport(msg)),
                Err(_) if Instant::now() >= deadline => {
                    return Err(CommandError::Protocol {
                        error: "timeout".to_string(),
                        message: format!("{} did not appear within {}ms", selector, timeout.as_millis()),
                    })
                }
                Err(_) => tokio::time::sleep(WAIT_POLL).await,
            }
        }
    }

    async fn perform(&self, session: &SessionHandle, action: &BrowserAction) -> Result<(), CommandError> {
        match action {
            BrowserAction::Navigate { url } => {
                self.command(
                    Method::POST,
                    &Self::session_path(session, "/url"),
                    Some(json!({ "url": url })),
                )
                .await?;
            }
            BrowserAction::Click { selector } => {
                let element = self.find_element(session, selector).await?;
                self.command(
                    Method::POST,
                    &Self::session_path(session, &format!("/element/{}/click", element)),
                    Some(json!({})),
                )
                .await?;
            }
            BrowserAction::Type {
                selector,
                text,
                submit,
            } => {
                let element = self.find_element(session, selector).await?;
                self.command(
                    Method::POST,
                    &Self::session_path(session, &format!("/element/{}/clear", element)),
                    Some(json!({})),
                )
                .await?;

                let mut keys = text.clone();
                if *submit {
                    keys.push_str(ENTER_KEY);
                }
                self.command(
                    Method::POST,
                    &Self::session_path(session, &format!("/element/{}/value", element)),
                    Some(json!({ "text": keys })),
                )
                .await?;
            }
            BrowserAction::Select { selector, value } => {
                self.execute_sync(session, SELECT_SCRIPT, json!([selector, value]))
                    .await?;
            }
            BrowserAction::Scroll { pixels } => {
                self.execute_sync(session, SCROLL_SCRIPT, json!([pixels])).await?;
            }
            BrowserAction::WaitFor {
                selector,
                timeout_ms,
            } => {
                let timeout = Duration::from_millis(*timeout_ms);
                match selector {
                    Some(selector) => self.wait_for_element(session, selector, timeout).await?,
                    None => tokio::time::sleep(timeout).await,
                }
            }
        }
        Ok(())
    }

    async fn drain_network(&self, session: &SessionHandle) -> Vec<CapturedRequest> {
        match self.execute_sync(session, DRAIN_NETWORK_SCRIPT, json!([])).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::debug!("Ignoring unreadable network entries: {}", e);
                Vec::new()
            }),
            Err(e) => {
                tracing::debug!("Network capture unavailable: {}", e.describe());
                Vec::new()
            }
        }
    }

    async fn observe(&self, session: &SessionHandle) -> Result<PageState, BrowserError> {
        let read = |value: Value| value.as_str().unwrap_or_default().to_string();
        let transport = |e: CommandError| BrowserError::Transport(e.describe());

        let url = self
            .command(Method::GET, &Self::session_path(session, "/url"), None)
            .await
            .map_err(transport)?;
        let title = self
            .command(Method::GET, &Self::session_path(session, "/title"), None)
            .await
            .map_err(transport)?;
        let source = self
            .command(Method::GET, &Self::session_path(session, "/source"), None)
            .await
            .map_err(transport)?;

        Ok(PageState {
            url: read(url),
            title: read(title),
            content: read(source),
            network: self.drain_network(session).await,
        })
    }
}

#[async_trait]
impl BrowserDriver for WebDriverBrowser {
    async fn open_session(&self) -> Result<SessionHandle, BrowserError> {
        let value = self
            .command(Method::POST, "/session", Some(self.capabilities()))
            .await
            .map_err(|e| BrowserError::Session(e.describe()))?;

        let id = value
            .get("sessionId")
            .and_then(|id| id.as_str())
            .ok_or_else(|| BrowserError::Session("WebDriver returned no session id".to_string()))?;

        tracing::info!("Opened {} session {}", self.browser_name, id);
        Ok(SessionHandle::new(id))
    }

    async fn execute(
        &self,
        session: &SessionHandle,
        script: &ActionScript,
    ) -> Result<PageState, BrowserError> {
        for (index, action) in script.actions().iter().enumerate() {
            tracing::debug!("Session {} action {}: {}", session, index, action);
            self.perform(session, action).await.map_err(|e| match e {
                CommandError::Transport(msg) => BrowserError::Transport(msg),
                protocol => BrowserError::Action {
                    index,
                    verb: action.verb(),
                    message: protocol.describe(),
                },
            })?;
        }

        self.observe(session).await
    }

    async fn snapshot(&self, session: &SessionHandle) -> Result<PageState, BrowserError> {
        self.observe(session).await
    }

    async fn close_session(&self, session: &SessionHandle) -> Result<(), BrowserError> {
        self.command(Method::DELETE, &Self::session_path(session, ""), None)
            .await
            .map_err(|e| BrowserError::Session(e.describe()))?;

        tracing::info!("Closed session {}", session);
        Ok(())
    }

    async fn check_health(&self) -> bool {
        match self.command(Method::GET, "/status", None).await {
            Ok(value) => value.get("ready").and_then(|r| r.as_bool()).unwrap_or(false),
            Err(_) => false,
        }
    }
}
