//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Pursue a goal and store the run report
//! - search: Query semantic memory
//! - history: Show last N runs
//! - replay: Show all steps of a run
//! - doctor: Check configuration, models and the WebDriver endpoint

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowserDriver, WebDriverBrowser};
use crate::conductor::{Orchestrator, RunReport};
use crate::config::Config;
use crate::db::Database;
use crate::llm::{Gateway, ModelGateway};
use crate::memory::SemanticMemory;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::new(&config.database_path())
        .await
        .context("Failed to open database")
}

/// Semantic memory, rebuilt from the database when persistence is on
async fn open_memory(
    config: &Config,
    database: &Database,
    gateway: Arc<dyn Gateway>,
) -> Result<Arc<SemanticMemory>> {
    let dims = config.memory.fallback_dimensions;
    let memory = if config.memory.persist {
        SemanticMemory::open(gateway, Arc::new(database.memory_store()), dims)
            .await
            .context("Failed to load semantic memory")?
    } else {
        SemanticMemory::new(gateway, dims)
    };
    Ok(Arc::new(memory))
}

/// Run a goal to completion
///
/// Ctrl-C cancels the session; the browser is still closed and the partial
/// report is stored.
pub async fn handle_run(goal: String, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let gateway: Arc<dyn Gateway> = Arc::new(ModelGateway::from_config(&config.llm));
    let driver: Arc<dyn BrowserDriver> = Arc::new(WebDriverBrowser::new(&config.browser));
    let memory = open_memory(config, &database, Arc::clone(&gateway)).await?;
    let orchestrator = Orchestrator::new(gateway, driver, memory, config);

    if let OutputFormat::Text = format {
        println!("Goal: {}", goal);
        println!();
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling session");
            on_interrupt.cancel();
        }
    });

    let report = orchestrator.run_goal_with_cancel(&goal, cancel).await;
    interrupt.abort();

    if let Err(e) = database.runs().save_report(&report).await {
        tracing::warn!("Failed to store run report: {:#}", e);
    }
    database.close().await?;

    print_report(&report, format)?;

    if report.is_done() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Run {} ended in {}", report.session_id, report.state))
    }
}

fn print_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for step in &report.steps {
                let mark = match step.status {
                    sdk::StepStatus::Succeeded => "✓",
                    sdk::StepStatus::Recovered => "↻",
                    sdk::StepStatus::Aborted => "✗",
                };
                println!("{} {}", mark, step.describe());
                for attempt in &step.recovery {
                    let mark = if attempt.succeeded { "✓" } else { "✗" };
                    println!("    {} {}", mark, attempt.instruction);
                }
            }
            if !report.steps.is_empty() {
                println!();
            }
            if let Some(summary) = &report.summary {
                println!("Summary:");
                println!("{}", summary);
                println!();
            }
            if report.is_done() {
                println!("✓ Run completed");
            } else {
                println!("✗ Run {}", report.state);
            }
            println!("  Run ID: {}", report.session_id);
            println!("  Memories written: {}", report.memories_written);
            println!(
                "  Duration: {}ms",
                (report.finished_at - report.started_at).num_milliseconds()
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
    }
    Ok(())
}

/// Search semantic memory
pub async fn handle_search(
    query: String,
    limit: usize,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let database = open_database(config).await?;
    let gateway: Arc<dyn Gateway> = Arc::new(ModelGateway::from_config(&config.llm));
    let memory = if config.memory.persist {
        SemanticMemory::attach(
            gateway,
            Arc::new(database.memory_store()),
            config.memory.fallback_dimensions,
        )
    } else {
        SemanticMemory::new(gateway, config.memory.fallback_dimensions)
    };

    let hits = memory.search(&query, limit).await;

    match format {
        OutputFormat::Text => {
            if hits.is_empty() {
                println!("No matching memories");
            } else {
                for (i, hit) in hits.iter().enumerate() {
                    println!(
                        "{}. [{}] {:.3}  {}",
                        i + 1,
                        hit.record.tag,
                        hit.similarity,
                        hit.record.created_at.format("%Y-%m-%d %H:%M:%S")
                    );
                    for line in hit.record.text.lines() {
                        println!("   {}", line);
                    }
                    println!();
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "query": query,
                "results": hits,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.close().await
}

/// Show recent runs
pub async fn handle_history(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let runs = database.runs().get_recent_runs(limit as i64).await?;

    match format {
        OutputFormat::Text => {
            if runs.is_empty() {
                println!("No runs in history");
            } else {
                println!("Run History (last {} runs):", limit);
                println!();
                for run in &runs {
                    println!("Run ID: {}", run.id);
                    println!("  Goal: {}", run.goal);
                    println!("  State: {}", run.state);
                    println!("  Started: {}", run.started_at.format("%Y-%m-%d %H:%M:%S"));
                    println!(
                        "  Duration: {}ms",
                        (run.finished_at - run.started_at).num_milliseconds()
                    );
                    println!();
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "runs": runs,
                "count": runs.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.close().await
}

/// Show all steps of one run
pub async fn handle_replay(run_id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let repo = database.runs();

    let run = repo
        .get_run(&run_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Run not found: {}", run_id))?;
    let steps = repo.get_run_steps(&run_id).await?;

    match format {
        OutputFormat::Text => {
            println!("Run Replay: {}", run.id);
            println!();
            println!("Goal: {}", run.goal);
            println!("State: {}", run.state);
            println!();
            println!("Steps ({} total):", steps.len());
            println!();
            for step in &steps {
                println!("{}", step.describe());
                if let Some(script) = &step.script {
                    println!("  Script: {}", script);
                }
                if let Some(note) = &step.note {
                    println!("  Note: {}", note);
                }
                for attempt in &step.recovery {
                    let mark = if attempt.succeeded { "✓" } else { "✗" };
                    println!("  Recovery {} {}", mark, attempt.instruction);
                }
                println!();
            }
            if let Some(summary) = &run.summary {
                println!("Summary:");
                println!("{}", summary);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "run": run,
                "steps": steps,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.close().await
}

/// Run system diagnostics
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks: Vec<(String, String)> = Vec::new();

    // Config is already validated when loaded
    checks.push(("Configuration".into(), "Valid".into()));

    if config.core.data_dir.exists() {
        checks.push(("Data directory".into(), "Exists".into()));
    } else {
        checks.push(("Data directory".into(), "Missing".into()));
        issues.push(format!(
            "Data directory does not exist: {}",
            config.core.data_dir.display()
        ));
    }

    match Database::new(&config.database_path()).await {
        Ok(database) => {
            checks.push(("Database".into(), "OK".into()));
            let gateway: Arc<dyn Gateway> = Arc::new(ModelGateway::from_config(&config.llm));
            match open_memory(config, &database, gateway).await {
                Ok(memory) => {
                    let spaces = memory.spaces().await;
                    checks.push((
                        "Semantic memory".into(),
                        format!("{} records in {} spaces", memory.len().await, spaces.len()),
                    ));
                }
                Err(e) => {
                    checks.push(("Semantic memory".into(), "Unreadable".into()));
                    issues.push(format!("Cannot load semantic memory: {:#}", e));
                }
            }
            database.close().await?;
        }
        Err(e) => {
            checks.push(("Database".into(), "Failed".into()));
            issues.push(format!("Cannot open database: {:#}", e));
        }
    }

    let gateway = ModelGateway::from_config(&config.llm);
    for health in gateway.health().await {
        let label = format!("Model ({})", health.role);
        let target = format!("{}/{}", health.provider, health.model);
        if health.healthy {
            checks.push((label, format!("{} available", target)));
        } else {
            checks.push((label, format!("{} not available", target)));
            issues.push(format!(
                "{} role model {} is not reachable",
                health.role, target
            ));
        }
    }

    let driver = WebDriverBrowser::new(&config.browser);
    if driver.check_health().await {
        checks.push(("WebDriver".into(), "Ready".into()));
    } else {
        checks.push(("WebDriver".into(), "Not ready".into()));
        issues.push(format!(
            "WebDriver at {} is not ready. Start chromedriver or geckodriver.",
            config.browser.webdriver_url
        ));
    }

    match format {
        OutputFormat::Text => {
            println!("Navigator System Diagnostics");
            println!("============================");
            println!();
            println!("System Checks:");
            for (check, status) in &checks {
                println!("  {:<25} {}", format!("{}:", check), status);
            }
            println!();

            if issues.is_empty() {
                println!("✓ All checks passed!");
            } else {
                println!("⚠ Issues found:");
                println!();
                for (i, issue) in issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "checks": checks
                    .iter()
                    .map(|(name, status)| json!({ "name": name, "status": status }))
                    .collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
