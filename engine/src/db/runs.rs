/// Run history persistence
///
/// Each finished `RunReport` is stored as one `runs` row plus one
/// `run_steps` row per original plan step. The full step record is kept as
/// JSON so `replay` can show recovery attempts and scripts.
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sdk::types::{FailureReason, SessionState};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::conductor::types::{RunReport, StepRecord};

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp {}", value))?
        .with_timezone(&Utc))
}

/// Rebuild a terminal state from its stored columns
fn parse_state(state: &str, reason: Option<&str>) -> Result<SessionState> {
    match state {
        "done" => Ok(SessionState::Done),
        "failed" => {
            let reason = reason
                .and_then(FailureReason::parse)
                .ok_or_else(|| anyhow!("Failed run without a known reason"))?;
            Ok(SessionState::Failed(reason))
        }
        other => Err(anyhow!("Run stored in non-terminal state {}", other)),
    }
}

/// One row of run history
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub id: String,
    pub goal: String,
    pub state: SessionState,
    pub summary: Option<String>,
    pub memories_written: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    fn from_row(r: &SqliteRow) -> Result<Self> {
        let state: String = r.get("state");
        let reason: Option<String> = r.get("failure_reason");
        Ok(Self {
            id: r.get("id"),
            goal: r.get("goal"),
            state: parse_state(&state, reason.as_deref())?,
            summary: r.get("summary"),
            memories_written: r.get("memories_written"),
            started_at: parse_timestamp(&r.get::<String, _>("started_at"))?,
            finished_at: parse_timestamp(&r.get::<String, _>("finished_at"))?,
        })
    }
}

/// Run repository for database operations
pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a finished run and its step log atomically
    pub async fn save_report(&self, report: &RunReport) -> Result<()> {
        let reason = match report.state {
            SessionState::Failed(reason) => Some(reason.as_str()),
            _ => None,
        };

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            "INSERT INTO runs (id, goal, state, failure_reason, summary, memories_written, started_at, finished_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(report.session_id.to_string())
        .bind(&report.goal)
        .bind(report.state.as_str())
        .bind(reason)
        .bind(&report.summary)
        .bind(report.memories_written as i64)
        .bind(timestamp(&report.started_at))
        .bind(timestamp(&report.finished_at))
        .execute(&mut *tx)
        .await
        .context("Failed to insert run")?;

        for step in &report.steps {
            let detail = serde_json::to_string(step)?;
            sqlx::query(
                "INSERT INTO run_steps (run_id, step_index, instruction, status, url_after, error_kind, error_message, detail_json, finished_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(report.session_id.to_string())
            .bind(step.step.index as i64)
            .bind(&step.step.instruction)
            .bind(step.status.as_str())
            .bind(&step.url_after)
            .bind(step.error.as_ref().map(|e| e.kind.as_str()))
            .bind(step.error.as_ref().map(|e| e.message.as_str()))
            .bind(detail)
            .bind(timestamp(&step.finished_at))
            .execute(&mut *tx)
            .await
            .context("Failed to insert run step")?;
        }

        tx.commit().await.context("Failed to commit run")?;
        Ok(())
    }

    /// Most recent runs first
    pub async fn get_recent_runs(&self, limit: i64) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(
            "SELECT id, goal, state, failure_reason, summary, memories_written, started_at, finished_at FROM runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent runs")?;

        rows.iter().map(RunSummary::from_row).collect()
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunSummary>> {
        let row = sqlx::query(
            "SELECT id, goal, state, failure_reason, summary, memories_written, started_at, finished_at FROM runs WHERE id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch run")?;

        row.as_ref().map(RunSummary::from_row).transpose()
    }

    /// Step log of a run in plan order
    pub async fn get_run_steps(&self, run_id: &str) -> Result<Vec<StepRecord>> {
        let rows = sqlx::query(
            "SELECT detail_json FROM run_steps WHERE run_id = ? ORDER BY step_index ASC, id ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch run steps")?;

        rows.iter()
            .map(|r| {
                let detail: String = r.get("detail_json");
                serde_json::from_str(&detail).context("Invalid step record in run history")
            })
            .collect()
    }
}
