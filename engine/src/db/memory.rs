//! Semantic memory persistence
//!
//! Records are stored with their embedding as a little-endian f32 blob and
//! read back in insertion (rowid) order so that similarity ties rank the
//! same way after a restart.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::memory::{rank, EmbeddingSpace, MemoryRecord, MemoryStore, MemoryTag, Metadata, ScoredRecord};

const SELECT_COLUMNS: &str =
    "SELECT id, text, tag, metadata, embedding, dimensions, embedding_model, created_at FROM memory_records";

pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(anyhow!("embedding blob of {} bytes is not f32-aligned", bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// SQLite-backed `MemoryStore`
pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn record_from_row(row: &SqliteRow) -> Result<MemoryRecord> {
        let id: String = row.get("id");
        let tag: String = row.get("tag");
        let metadata: String = row.get("metadata");
        let blob: Vec<u8> = row.get("embedding");
        let dimensions: i64 = row.get("dimensions");
        let created_at: String = row.get("created_at");

        let metadata: Metadata = serde_json::from_str(&metadata)
            .with_context(|| format!("Invalid metadata on memory record {}", id))?;

        Ok(MemoryRecord {
            id: Uuid::parse_str(&id).with_context(|| format!("Invalid memory record id {}", id))?,
            text: row.get("text"),
            embedding: decode_embedding(&blob)?,
            tag: MemoryTag::parse(&tag).ok_or_else(|| anyhow!("Unknown memory tag {}", tag))?,
            metadata,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .with_context(|| format!("Invalid timestamp on memory record {}", id))?
                .with_timezone(&Utc),
            space: EmbeddingSpace::new(row.get::<String, _>("embedding_model"), dimensions as usize),
        })
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn append(&self, record: &MemoryRecord) -> Result<()> {
        let metadata = serde_json::to_string(&record.metadata)?;

        sqlx::query(
            "INSERT INTO memory_records (id, text, tag, metadata, embedding, dimensions, embedding_model, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.text)
        .bind(record.tag.as_str())
        .bind(metadata)
        .bind(encode_embedding(&record.embedding))
        .bind(record.space.dimensions as i64)
        .bind(&record.space.model)
        .bind(record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await
        .context("Failed to insert memory record")?;

        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<MemoryRecord>> {
        let rows = sqlx::query(&format!("{} ORDER BY rowid ASC", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .context("Failed to load memory records")?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::record_from_row(row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping unreadable memory record: {:#}", e),
            }
        }
        Ok(records)
    }

    async fn query_by_similarity(
        &self,
        space: &EmbeddingSpace,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE embedding_model = ? AND dimensions = ? ORDER BY rowid ASC",
            SELECT_COLUMNS
        ))
        .bind(&space.model)
        .bind(space.dimensions as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query memory records")?;

        let records = rows
            .iter()
            .map(Self::record_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(rank(vector, records.iter(), k))
    }
}
