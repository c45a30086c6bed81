//! Semantic Memory
//!
//! Append-only store of text records with embeddings, searched by cosine
//! similarity. Shared by every navigation session in the process.
//!
//! Records are partitioned by `EmbeddingSpace` (model + dimensionality).
//! A query is embedded once and scored only against records of the same
//! space, so vectors from different models are never compared.
//!
//! When the embedding role fails or returns an unusable vector, the record
//! is embedded with a deterministic blake3-derived vector in the
//! `pseudo-blake3` space instead of being dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::llm::Gateway;

pub mod embedding;

use embedding::{cosine_similarity, is_usable, pseudo_embedding, PSEUDO_MODEL};

/// Free-form record metadata
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Which component produced a record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryTag {
    Plan,
    UiAnalysis,
    ApiRequest,
    Summary,
}

impl MemoryTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTag::Plan => "plan",
            MemoryTag::UiAnalysis => "ui-analysis",
            MemoryTag::ApiRequest => "api-request",
            MemoryTag::Summary => "summary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plan" => Some(MemoryTag::Plan),
            "ui-analysis" => Some(MemoryTag::UiAnalysis),
            "api-request" => Some(MemoryTag::ApiRequest),
            "summary" => Some(MemoryTag::Summary),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model and dimensionality an embedding belongs to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EmbeddingSpace {
    pub model: String,
    pub dimensions: usize,
}

impl EmbeddingSpace {
    pub fn new(model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model: model.into(),
            dimensions,
        }
    }

    pub fn is_pseudo(&self) -> bool {
        self.model == PSEUDO_MODEL
    }
}

impl fmt::Display for EmbeddingSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.model, self.dimensions)
    }
}

/// One stored record; never mutated after creation
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub text: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub tag: MemoryTag,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub space: EmbeddingSpace,
}

/// Search hit
#[derive(Debug, Clone, Serialize)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub similarity: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Memory records must have non-empty text")]
    EmptyContent,
}

/// Durable backing store for memory records
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persist one record
    async fn append(&self, record: &MemoryRecord) -> anyhow::Result<()>;

    /// Every record, oldest first
    async fn load_all(&self) -> anyhow::Result<Vec<MemoryRecord>>;

    /// Up to `k` records of `space` ranked by cosine similarity to `vector`
    ///
    /// Retrieval path for memories attached without an in-process index.
    async fn query_by_similarity(
        &self,
        space: &EmbeddingSpace,
        vector: &[f32],
        k: usize,
    ) -> anyhow::Result<Vec<ScoredRecord>>;
}

/// Rank candidates by similarity, then newest timestamp, then latest insertion
///
/// `candidates` must be in insertion order.
pub fn rank<'a, I>(query: &[f32], candidates: I, k: usize) -> Vec<ScoredRecord>
where
    I: IntoIterator<Item = &'a MemoryRecord>,
{
    let mut scored: Vec<(usize, f32, &MemoryRecord)> = candidates
        .into_iter()
        .enumerate()
        .map(|(seq, record)| (seq, cosine_similarity(query, &record.embedding), record))
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.2.created_at.cmp(&a.2.created_at))
            .then_with(|| b.0.cmp(&a.0))
    });
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(_, similarity, record)| ScoredRecord {
            record: record.clone(),
            similarity,
        })
        .collect()
}

/// Process-wide semantic memory
pub struct SemanticMemory {
    gateway: Arc<dyn Gateway>,
    store: Option<Arc<dyn MemoryStore>>,
    fallback_dimensions: usize,
    index: RwLock<HashMap<EmbeddingSpace, Vec<Arc<MemoryRecord>>>>,
    /// False when searches go to the store instead of `index`
    indexed: bool,
}

impl SemanticMemory {
    /// In-memory only
    pub fn new(gateway: Arc<dyn Gateway>, fallback_dimensions: usize) -> Self {
        Self {
            gateway,
            store: None,
            fallback_dimensions: fallback_dimensions.max(1),
            index: RwLock::new(HashMap::new()),
            indexed: true,
        }
    }

    /// Backed by `store` without loading it; searches query the store
    ///
    /// Suited to one-off lookups. `len` and `spaces` only cover the
    /// in-process index, which stays empty in this mode.
    pub fn attach(
        gateway: Arc<dyn Gateway>,
        store: Arc<dyn MemoryStore>,
        fallback_dimensions: usize,
    ) -> Self {
        let mut memory = Self::new(gateway, fallback_dimensions);
        memory.store = Some(store);
        memory.indexed = false;
        memory
    }

    /// Backed by `store`, with the index rebuilt from its contents
    pub async fn open(
        gateway: Arc<dyn Gateway>,
        store: Arc<dyn MemoryStore>,
        fallback_dimensions: usize,
    ) -> anyhow::Result<Self> {
        let records = store.load_all().await?;
        let count = records.len();

        let mut index: HashMap<EmbeddingSpace, Vec<Arc<MemoryRecord>>> = HashMap::new();
        for record in records {
            if record.embedding.len() != record.space.dimensions {
                tracing::warn!(
                    "Skipping memory record {}: {} values stored for space {}",
                    record.id,
                    record.embedding.len(),
                    record.space
                );
                continue;
            }
            index
                .entry(record.space.clone())
                .or_default()
                .push(Arc::new(record));
        }

        tracing::info!("Loaded {} memory records in {} spaces", count, index.len());

        let mut memory = Self::new(gateway, fallback_dimensions);
        memory.store = Some(store);
        memory.index = RwLock::new(index);
        Ok(memory)
    }

    /// Embed `text`, falling back to the pseudo-embedding
    async fn embed(&self, text: &str) -> (EmbeddingSpace, Vec<f32>) {
        match self.gateway.embed(text).await {
            Ok(embedding) if is_usable(&embedding.vector) => {
                let space = EmbeddingSpace::new(embedding.model, embedding.vector.len());
                (space, embedding.vector)
            }
            Ok(embedding) => {
                tracing::warn!(
                    "Embedding model {} returned an unusable vector; using pseudo-embedding",
                    embedding.model
                );
                self.pseudo(text)
            }
            Err(e) => {
                tracing::warn!("Embedding failed ({}); using pseudo-embedding", e);
                self.pseudo(text)
            }
        }
    }

    fn pseudo(&self, text: &str) -> (EmbeddingSpace, Vec<f32>) {
        (
            EmbeddingSpace::new(PSEUDO_MODEL, self.fallback_dimensions),
            pseudo_embedding(text, self.fallback_dimensions),
        )
    }

    /// Append a record
    ///
    /// Never drops a record because embedding failed; a durable store
    /// failure is logged and the record stays searchable in this process.
    pub async fn add(
        &self,
        text: &str,
        tag: MemoryTag,
        metadata: Metadata,
    ) -> Result<MemoryRecord, MemoryError> {
        if text.trim().is_empty() {
            return Err(MemoryError::EmptyContent);
        }

        let (space, vector) = self.embed(text).await;
        let record = MemoryRecord {
            id: Uuid::new_v4(),
            text: text.to_string(),
            embedding: vector,
            tag,
            metadata,
            created_at: Utc::now(),
            space,
        };

        if self.indexed {
            let mut index = self.index.write().await;
            index
                .entry(record.space.clone())
                .or_default()
                .push(Arc::new(record.clone()));
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.append(&record).await {
                tracing::warn!("Failed to persist memory record {}: {:#}", record.id, e);
            }
        }

        tracing::debug!("Stored {} memory {} in {}", record.tag, record.id, record.space);
        Ok(record)
    }

    /// Up to `k` records most similar to `query`
    ///
    /// Empty store, empty query or `k == 0` yield an empty result.
    pub async fn search(&self, query: &str, k: usize) -> Vec<ScoredRecord> {
        if k == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        if !self.indexed {
            let Some(store) = &self.store else {
                return Vec::new();
            };
            let (space, vector) = self.embed(query).await;
            return match store.query_by_similarity(&space, &vector, k).await {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!("Memory store query failed: {:#}", e);
                    Vec::new()
                }
            };
        }

        if self.is_empty().await {
            return Vec::new();
        }

        let (space, vector) = self.embed(query).await;
        let index = self.index.read().await;
        match index.get(&space) {
            Some(records) => rank(&vector, records.iter().map(|r| r.as_ref()), k),
            None => Vec::new(),
        }
    }

    /// Total records across all spaces
    pub async fn len(&self) -> usize {
        self.index.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Spaces present in the index with their record counts
    pub async fn spaces(&self) -> Vec<(EmbeddingSpace, usize)> {
        let index = self.index.read().await;
        let mut spaces: Vec<_> = index
            .iter()
            .map(|(space, records)| (space.clone(), records.len()))
            .collect();
        spaces.sort_by(|a, b| a.0.model.cmp(&b.0.model).then(a.0.dimensions.cmp(&b.0.dimensions)));
        spaces
    }
}
