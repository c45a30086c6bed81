//! Integration tests for the orchestrator state machine
//!
//! A scripted gateway stands in for the language models and an in-memory
//! driver stands in for the browser, so every path through the session
//! can be exercised without network access.

use async_trait::async_trait;
use navigator_engine::browser::{
    ActionScript, BrowserAction, BrowserDriver, BrowserError, CapturedRequest, PageState,
    SessionHandle,
};
use navigator_engine::conductor::Orchestrator;
use navigator_engine::config::Config;
use navigator_engine::llm::{Embedding, Gateway, LLMError, Message, ModelRole};
use navigator_engine::memory::{MemoryTag, Metadata, SemanticMemory};
use sdk::types::{FailureReason, SessionState, StepStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Answers by role and prompt kind; `None` answers are unavailable
#[derive(Default)]
struct ScriptedGateway {
    plan: Option<String>,
    recovery: Option<String>,
    summary: Option<String>,
    analysis: Option<String>,
    scripts: HashMap<String, String>,
    prompts: Mutex<Vec<(ModelRole, String)>>,
}

impl ScriptedGateway {
    fn new(plan: &str) -> Self {
        Self {
            plan: Some(plan.to_string()),
            summary: Some("Found the widget page.".to_string()),
            ..Self::default()
        }
    }

    fn script(mut self, instruction: &str, script: &str) -> Self {
        self.scripts
            .insert(instruction.to_string(), script.to_string());
        self
    }

    fn recovery(mut self, answer: &str) -> Self {
        self.recovery = Some(answer.to_string());
        self
    }

    fn prompts_for(&self, role: ModelRole) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

fn unavailable(answer: &Option<String>) -> Result<String, LLMError> {
    answer
        .clone()
        .ok_or_else(|| LLMError::ProviderUnavailable("scripted outage".into()))
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn invoke(&self, role: ModelRole, messages: &[Message]) -> Result<String, LLMError> {
        let system = messages[0].content.clone();
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.prompts.lock().unwrap().push((role, last.clone()));

        match role {
            ModelRole::Coding => {
                let first = messages[1].content.clone();
                let instruction = first
                    .strip_prefix("STEP: ")
                    .and_then(|rest| rest.lines().next())
                    .unwrap_or_default()
                    .to_string();
                Ok(self
                    .scripts
                    .get(&instruction)
                    .cloned()
                    .unwrap_or_else(|| "scroll 100".to_string()))
            }
            ModelRole::Reasoning => Ok("Search API returning JSON results.".to_string()),
            _ if system.contains("plan web automation") => unavailable(&self.plan),
            _ if system.contains("step failed") => unavailable(&self.recovery),
            _ if system.contains("Summarize") => unavailable(&self.summary),
            _ => unavailable(&self.analysis),
        }
    }

    async fn embed(&self, _text: &str) -> Result<Embedding, LLMError> {
        Err(LLMError::ProviderUnavailable("no embedder".into()))
    }
}

/// In-memory browser; clicks on selectors containing "missing" fail
#[derive(Default)]
struct MockDriver {
    fail_open: bool,
    hang_open: bool,
    hang_snapshot: bool,
    block_selector: Option<String>,
    reached_block: Notify,
    opened: AtomicUsize,
    closed: AtomicUsize,
    url: Mutex<String>,
    scripts: Mutex<Vec<String>>,
}

impl MockDriver {
    fn page(&self, network: Vec<CapturedRequest>) -> PageState {
        let url = self.url.lock().unwrap().clone();
        PageState {
            title: format!("Page at {}", url),
            content: format!("<html><body>content of {}</body></html>", url),
            url,
            network,
        }
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn open_session(&self) -> Result<SessionHandle, BrowserError> {
        if self.fail_open {
            return Err(BrowserError::Session("driver refused".into()));
        }
        if self.hang_open {
            std::future::pending::<()>().await;
        }
        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        *self.url.lock().unwrap() = "about:blank".to_string();
        Ok(SessionHandle::new(format!("session-{}", n)))
    }

    async fn execute(
        &self,
        _session: &SessionHandle,
        script: &ActionScript,
    ) -> Result<PageState, BrowserError> {
        self.scripts.lock().unwrap().push(script.to_string());
        let mut network = Vec::new();

        for (index, action) in script.actions().iter().enumerate() {
            match action {
                BrowserAction::Navigate { url } => {
                    *self.url.lock().unwrap() = url.clone();
                    if url.contains("/search") {
                        network.push(CapturedRequest {
                            url: format!("{}/api/items?q=widget", url.trim_end_matches('/')),
                            initiator: "fetch".into(),
                            duration_ms: 20.0,
                            transfer_size: 1024,
                        });
                    }
                }
                BrowserAction::Click { selector } if selector.contains("missing") => {
                    return Err(BrowserError::Action {
                        index,
                        verb: "click",
                        message: format!("no such element: {}", selector),
                    });
                }
                BrowserAction::Click { selector }
                    if Some(selector) == self.block_selector.as_ref() =>
                {
                    self.reached_block.notify_one();
                    std::future::pending::<()>().await;
                }
                _ => {}
            }
        }

        Ok(self.page(network))
    }

    async fn snapshot(&self, _session: &SessionHandle) -> Result<PageState, BrowserError> {
        if self.hang_snapshot {
            std::future::pending::<()>().await;
        }
        Ok(self.page(Vec::new()))
    }

    async fn close_session(&self, _session: &SessionHandle) -> Result<(), BrowserError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn quiet_config() -> Config {
    let mut config = Config::default_config();
    config.navigator.fix_retry = false;
    config.navigator.analyze_pages = false;
    config.navigator.analyze_network = false;
    config.memory.fallback_dimensions = 64;
    config
}

struct Harness {
    gateway: Arc<ScriptedGateway>,
    driver: Arc<MockDriver>,
    memory: Arc<SemanticMemory>,
    orchestrator: Arc<Orchestrator>,
}

fn harness(gateway: ScriptedGateway, driver: MockDriver, config: &Config) -> Harness {
    let gateway = Arc::new(gateway);
    let driver = Arc::new(driver);
    let memory = Arc::new(SemanticMemory::new(
        Arc::clone(&gateway) as Arc<dyn Gateway>,
        config.memory.fallback_dimensions,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&gateway) as Arc<dyn Gateway>,
        Arc::clone(&driver) as Arc<dyn BrowserDriver>,
        Arc::clone(&memory),
        config,
    ));
    Harness {
        gateway,
        driver,
        memory,
        orchestrator,
    }
}

const TWO_STEP_PLAN: &str = r#"["Open the shop", "Search for widgets"]"#;

#[tokio::test]
async fn test_happy_path() {
    let gateway = ScriptedGateway::new(TWO_STEP_PLAN)
        .script("Open the shop", "navigate https://shop.example.com")
        .script("Search for widgets", r##"type "#q" "widgets" enter"##);
    let h = harness(gateway, MockDriver::default(), &quiet_config());

    let report = h.orchestrator.run_goal("find widgets on shop.example.com").await;

    assert_eq!(report.state, SessionState::Done);
    assert_eq!(report.summary.as_deref(), Some("Found the widget page."));
    assert_eq!(report.steps.len(), 2);
    assert!(report.steps.iter().all(|s| s.status == StepStatus::Succeeded));
    assert_eq!(
        report.steps[0].url_after.as_deref(),
        Some("https://shop.example.com")
    );

    let path: Vec<_> = report.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        path,
        vec![
            SessionState::Planning,
            SessionState::RetrievingContext,
            SessionState::Executing,
            SessionState::Summarizing,
            SessionState::Done,
        ]
    );
    assert_eq!(report.transitions[0].from, SessionState::Idle);

    assert_eq!(h.driver.opened.load(Ordering::SeqCst), 1);
    assert_eq!(h.driver.closed.load(Ordering::SeqCst), 1);

    // Plan, one record per step and the summary
    assert_eq!(report.memories_written, 4);
    assert_eq!(h.memory.len().await, 4);
    let hits = h.memory.search("Step: Open the shop", 10).await;
    assert_eq!(
        hits.iter()
            .filter(|hit| hit.record.tag == MemoryTag::Plan)
            .count(),
        3
    );
}

#[tokio::test]
async fn test_steps_run_in_plan_order() {
    let plan = r#"["Step one", "Step two", "Step three", "Step four"]"#;
    let h = harness(ScriptedGateway::new(plan), MockDriver::default(), &quiet_config());

    let report = h.orchestrator.run_goal("walk through four steps").await;

    let indices: Vec<_> = report.steps.iter().map(|s| s.step.index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4]);

    let coder_prompts = h.gateway.prompts_for(ModelRole::Coding);
    assert_eq!(coder_prompts.len(), 4);
    assert!(coder_prompts[0].starts_with("STEP: Step one"));
    assert!(coder_prompts[3].starts_with("STEP: Step four"));
}

#[tokio::test]
async fn test_recovery_success() {
    let gateway = ScriptedGateway::new(r#"["Open the shop", "Buy the widget"]"#)
        .script("Open the shop", "navigate https://shop.example.com")
        .script("Buy the widget", "click #missing-buy")
        .script("Accept cookies", "click #accept")
        .script("Click buy", "click #buy")
        .recovery(r#"{"decision": "recover", "steps": ["Accept cookies", "Click buy"], "reason": "cookie banner"}"#);
    let h = harness(gateway, MockDriver::default(), &quiet_config());

    let report = h.orchestrator.run_goal("buy a widget").await;

    assert_eq!(report.state, SessionState::Done);
    let step = &report.steps[1];
    assert_eq!(step.status, StepStatus::Recovered);
    assert_eq!(step.recovery.len(), 2);
    assert!(step.recovery.iter().all(|a| a.succeeded));
    assert_eq!(step.note.as_deref(), Some("cookie banner"));
    assert!(step.error.as_ref().unwrap().message.contains("no such element"));

    let path: Vec<_> = report.transitions.iter().map(|t| t.to).collect();
    assert!(path
        .windows(2)
        .any(|w| w == [SessionState::Recovering, SessionState::Executing]));
}

#[tokio::test]
async fn test_recovery_fails_on_first_step() {
    let gateway = ScriptedGateway::new(r#"["Buy the widget", "Check the cart"]"#)
        .script("Buy the widget", "click #missing-buy")
        .script("Try the other button", "click #missing-too")
        .script("Click buy", "click #buy")
        .recovery(r#"{"decision": "recover", "steps": ["Try the other button", "Click buy"]}"#);
    let h = harness(gateway, MockDriver::default(), &quiet_config());

    let report = h.orchestrator.run_goal("buy a widget").await;

    assert_eq!(report.state, SessionState::Done);
    let step = &report.steps[0];
    assert_eq!(step.status, StepStatus::Aborted);
    // Stops at the first failing recovery step
    assert_eq!(step.recovery.len(), 1);
    assert!(!step.recovery[0].succeeded);

    // The run continues with the next step
    assert_eq!(report.steps[1].status, StepStatus::Succeeded);
}

#[tokio::test]
async fn test_recovery_is_bounded() {
    // Every recovery step fails; the planner is asked once per failed step
    let gateway = ScriptedGateway::new(r#"["Buy the widget"]"#)
        .script("Buy the widget", "click #missing-buy")
        .script("Retry", "click #missing-again")
        .recovery(r#"{"decision": "recover", "steps": ["Retry"]}"#);
    let h = harness(gateway, MockDriver::default(), &quiet_config());

    let report = h.orchestrator.run_goal("buy a widget").await;

    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].status, StepStatus::Aborted);
    let recovery_prompts = h
        .gateway
        .prompts_for(ModelRole::General)
        .into_iter()
        .filter(|p| p.contains("FAILED STEP"))
        .count();
    assert_eq!(recovery_prompts, 1);
    assert_eq!(h.gateway.prompts_for(ModelRole::Coding).len(), 2);
}

#[tokio::test]
async fn test_recovery_declined() {
    let gateway = ScriptedGateway::new(r#"["Buy the widget"]"#)
        .script("Buy the widget", "click #missing-buy")
        .recovery(r#"{"decision": "abort", "reason": "item is sold out"}"#);
    let h = harness(gateway, MockDriver::default(), &quiet_config());

    let report = h.orchestrator.run_goal("buy a widget").await;

    assert_eq!(report.state, SessionState::Done);
    assert_eq!(report.steps[0].status, StepStatus::Aborted);
    assert_eq!(report.steps[0].note.as_deref(), Some("item is sold out"));
    assert!(report.steps[0].recovery.is_empty());
}

#[tokio::test]
async fn test_planning_unavailable() {
    let gateway = ScriptedGateway {
        plan: None,
        ..ScriptedGateway::default()
    };
    let h = harness(gateway, MockDriver::default(), &quiet_config());

    let report = h.orchestrator.run_goal("find widgets").await;

    assert_eq!(
        report.state,
        SessionState::Failed(FailureReason::PlanningFailed)
    );
    assert!(report.steps.is_empty());
    assert!(report.summary.is_none());
    assert_eq!(h.driver.opened.load(Ordering::SeqCst), 1);
    assert_eq!(h.driver.closed.load(Ordering::SeqCst), 1);
    assert!(h.gateway.prompts_for(ModelRole::Coding).is_empty());
}

#[tokio::test]
async fn test_malformed_plan() {
    let h = harness(
        ScriptedGateway::new("Sorry, I can't plan that."),
        MockDriver::default(),
        &quiet_config(),
    );

    let report = h.orchestrator.run_goal("find widgets").await;

    assert_eq!(
        report.state,
        SessionState::Failed(FailureReason::PlanningFailed)
    );
    assert_eq!(h.driver.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_goal_opens_nothing() {
    let h = harness(
        ScriptedGateway::new(TWO_STEP_PLAN),
        MockDriver::default(),
        &quiet_config(),
    );

    let report = h.orchestrator.run_goal("   ").await;

    assert_eq!(report.state, SessionState::Failed(FailureReason::InvalidGoal));
    assert_eq!(h.driver.opened.load(Ordering::SeqCst), 0);
    assert!(h.gateway.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_session_open_failure() {
    let driver = MockDriver {
        fail_open: true,
        ..MockDriver::default()
    };
    let h = harness(ScriptedGateway::new(TWO_STEP_PLAN), driver, &quiet_config());

    let report = h.orchestrator.run_goal("find widgets").await;

    assert_eq!(
        report.state,
        SessionState::Failed(FailureReason::ResourceError)
    );
    assert_eq!(h.driver.closed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_hung_snapshot_does_not_hang_the_run() {
    let mut config = quiet_config();
    config.browser.action_timeout_secs = 1;
    let gateway = ScriptedGateway::new(r#"["Open the shop"]"#)
        .script("Open the shop", "navigate https://shop.example.com");
    let driver = MockDriver {
        hang_snapshot: true,
        ..MockDriver::default()
    };
    let h = harness(gateway, driver, &config);

    let report = tokio::time::timeout(Duration::from_secs(10), h.orchestrator.run_goal("find widgets"))
        .await
        .expect("run should finish once the snapshot deadline passes");

    // The initial observation is best-effort; the run carries on without it
    assert_eq!(report.state, SessionState::Done);
    assert_eq!(report.steps[0].status, StepStatus::Succeeded);
    assert_eq!(h.driver.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_hung_session_open_is_a_resource_error() {
    let mut config = quiet_config();
    config.browser.action_timeout_secs = 1;
    let driver = MockDriver {
        hang_open: true,
        ..MockDriver::default()
    };
    let h = harness(ScriptedGateway::new(TWO_STEP_PLAN), driver, &config);

    let report = tokio::time::timeout(Duration::from_secs(10), h.orchestrator.run_goal("find widgets"))
        .await
        .expect("run should finish once the open deadline passes");

    assert_eq!(
        report.state,
        SessionState::Failed(FailureReason::ResourceError)
    );
    assert!(h.gateway.prompts_for(ModelRole::General).is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = harness(
        ScriptedGateway::new(TWO_STEP_PLAN),
        MockDriver::default(),
        &quiet_config(),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = h
        .orchestrator
        .run_goal_with_cancel("find widgets", cancel)
        .await;

    assert_eq!(report.state, SessionState::Failed(FailureReason::Cancelled));
    assert_eq!(h.driver.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_mid_run_releases_session() {
    let gateway = ScriptedGateway::new(r#"["Open the shop", "Press the slow button", "Never reached"]"#)
        .script("Open the shop", "navigate https://shop.example.com")
        .script("Press the slow button", "click #slow");
    let driver = MockDriver {
        block_selector: Some("#slow".to_string()),
        ..MockDriver::default()
    };
    let h = harness(gateway, driver, &quiet_config());

    let handle = h.orchestrator.spawn_goal("open the shop and press the slow button");
    h.driver.reached_block.notified().await;
    handle.cancel();
    let report = handle.wait().await.unwrap();

    assert_eq!(report.state, SessionState::Failed(FailureReason::Cancelled));
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].status, StepStatus::Succeeded);
    assert!(report.summary.is_none());
    assert_eq!(h.driver.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_summary_falls_back_to_step_log() {
    let gateway = ScriptedGateway {
        summary: None,
        ..ScriptedGateway::new(TWO_STEP_PLAN)
    };
    let h = harness(gateway, MockDriver::default(), &quiet_config());

    let report = h.orchestrator.run_goal("find widgets").await;

    assert_eq!(report.state, SessionState::Done);
    let summary = report.summary.unwrap();
    assert!(summary.starts_with("Goal: find widgets"));
    assert!(summary.contains("2 succeeded, 0 recovered, 0 aborted"));

    let hits = h.memory.search("Goal: find widgets", 10).await;
    assert!(hits.iter().any(|hit| hit.record.tag == MemoryTag::Summary));
}

#[tokio::test]
async fn test_memories_feed_the_next_plan() {
    let h = harness(
        ScriptedGateway::new(TWO_STEP_PLAN),
        MockDriver::default(),
        &quiet_config(),
    );
    h.memory
        .add(
            "The shop search box has id #q",
            MemoryTag::UiAnalysis,
            Metadata::new(),
        )
        .await
        .unwrap();

    h.orchestrator.run_goal("find widgets").await;

    let plan_prompt = h
        .gateway
        .prompts_for(ModelRole::General)
        .into_iter()
        .find(|p| p.starts_with("GOAL:"))
        .unwrap();
    assert!(plan_prompt.contains("[ui-analysis] The shop search box has id #q"));
}

#[tokio::test]
async fn test_page_and_network_analysis() {
    let mut config = quiet_config();
    config.navigator.analyze_pages = true;
    config.navigator.analyze_network = true;

    let gateway = ScriptedGateway {
        analysis: Some(
            r#"{"page_purpose": "Search results", "interactive_elements": ["result list"]}"#
                .to_string(),
        ),
        ..ScriptedGateway::new(r#"["Search for widgets"]"#)
    }
    .script(
        "Search for widgets",
        "navigate https://shop.example.com/search",
    );
    let h = harness(gateway, MockDriver::default(), &config);

    let report = h.orchestrator.run_goal("find widgets").await;

    assert_eq!(report.state, SessionState::Done);
    // plan + ui-analysis + api analysis + api replay + summary
    assert_eq!(report.memories_written, 5);
    assert_eq!(h.memory.len().await, 5);
    // One endpoint is not enough to infer a schema
    assert_eq!(h.gateway.prompts_for(ModelRole::Reasoning).len(), 1);

    let replay_prompts: Vec<_> = h
        .gateway
        .prompts_for(ModelRole::Coding)
        .into_iter()
        .filter(|p| p.starts_with("Write a curl command"))
        .collect();
    assert_eq!(replay_prompts.len(), 1);
    assert!(replay_prompts[0].contains("https://shop.example.com/search/api/items?q=widget"));
}

#[tokio::test]
async fn test_related_endpoints_yield_a_schema() {
    let mut config = quiet_config();
    config.navigator.analyze_network = true;

    let gateway = ScriptedGateway::new(r#"["Search the shop", "Search the outlet"]"#)
        .script("Search the shop", "navigate https://shop.example.com/search")
        .script("Search the outlet", "navigate https://outlet.example.com/search");
    let h = harness(gateway, MockDriver::default(), &config);

    let report = h.orchestrator.run_goal("compare widget prices").await;

    assert_eq!(report.state, SessionState::Done);
    // plan + 2 step records + 2 analyses + 2 replays + schema + summary
    assert_eq!(report.memories_written, 9);

    let reasoning = h.gateway.prompts_for(ModelRole::Reasoning);
    assert_eq!(reasoning.len(), 3);
    assert!(reasoning[2].contains("Infer the general API"));

    let hits = h.memory.search("API schema", 20).await;
    let schema = hits
        .iter()
        .find(|hit| hit.record.metadata.get("kind").and_then(|k| k.as_str()) == Some("schema"))
        .unwrap();
    assert_eq!(schema.record.tag, MemoryTag::ApiRequest);
    assert_eq!(
        schema.record.metadata["endpoints"],
        serde_json::json!([
            "https://outlet.example.com/search/api/items",
            "https://shop.example.com/search/api/items"
        ])
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_share_memory() {
    let config = quiet_config();
    let gateway = Arc::new(
        ScriptedGateway::new(TWO_STEP_PLAN)
            .script("Open the shop", "navigate https://shop.example.com")
            .script("Search for widgets", r##"type "#q" "widgets" enter"##),
    );
    let memory = Arc::new(SemanticMemory::new(
        Arc::clone(&gateway) as Arc<dyn Gateway>,
        config.memory.fallback_dimensions,
    ));

    let drivers: Vec<Arc<MockDriver>> = (0..2).map(|_| Arc::new(MockDriver::default())).collect();
    let handles: Vec<_> = drivers
        .iter()
        .enumerate()
        .map(|(i, driver)| {
            let orchestrator = Arc::new(Orchestrator::new(
                Arc::clone(&gateway) as Arc<dyn Gateway>,
                Arc::clone(driver) as Arc<dyn BrowserDriver>,
                Arc::clone(&memory),
                &config,
            ));
            orchestrator.spawn_goal(format!("find widgets, run {}", i))
        })
        .collect();

    let mut reports = Vec::new();
    for handle in handles {
        reports.push(handle.wait().await.unwrap());
    }

    assert!(reports.iter().all(|r| r.state == SessionState::Done));
    assert_ne!(reports[0].session_id, reports[1].session_id);
    for driver in &drivers {
        assert_eq!(driver.opened.load(Ordering::SeqCst), 1);
        assert_eq!(driver.closed.load(Ordering::SeqCst), 1);
    }
    let written: usize = reports.iter().map(|r| r.memories_written).sum();
    assert_eq!(written, 8);
    assert_eq!(memory.len().await, written);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_are_not_lost() {
    let gateway = Arc::new(ScriptedGateway::default());
    let memory = Arc::new(SemanticMemory::new(gateway as Arc<dyn Gateway>, 32));

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..64 {
        let memory = Arc::clone(&memory);
        tasks.spawn(async move {
            let mut metadata = Metadata::new();
            metadata.insert("n".into(), serde_json::json!(i));
            memory
                .add(&format!("record number {}", i), MemoryTag::Plan, metadata)
                .await
                .unwrap();
            memory.search(&format!("record number {}", i), 3).await
        });
    }

    let mut searches = 0;
    while let Some(result) = tasks.join_next().await {
        let hits = result.unwrap();
        // A search after its own add always sees at least that record
        assert!(!hits.is_empty());
        searches += 1;
    }

    assert_eq!(searches, 64);
    assert_eq!(memory.len().await, 64);
    let hits = memory.search("record number 17", 1).await;
    assert_eq!(hits[0].record.text, "record number 17");
    assert!((hits[0].similarity - 1.0).abs() < 1e-4);
}
