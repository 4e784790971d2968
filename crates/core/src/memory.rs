//! Memory domain types: short-term ring and long-term fact store.
//!
//! Short-term memory (STM) is a fixed-capacity ring of recent interaction
//! items owned by one session. Long-term memory (LTM) is an embedding-indexed
//! store of episodic events and semantic facts shared across sessions; it is
//! reached only through the [`LtmStore`] trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemoryError;
use crate::message::Role;

/// What a memory item summarizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemorySource {
    Step { task_id: String, step_id: String },
    History { message_id: String },
}

/// A single entry written to STM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    /// The owning `Memories` record.
    pub memories_id: String,
    pub source: MemorySource,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl MemoryItem {
    pub fn new(
        memories_id: impl Into<String>,
        source: MemorySource,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            memories_id: memories_id.into(),
            source,
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// One occupied slot of the STM ring: the batch written by a single `add`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StmSlot {
    pub items: Vec<MemoryItem>,
    pub owner_id: String,
    /// Value of `total_inserted` when this slot was written (1-based).
    pub sequence: u64,
    pub inserted_at: DateTime<Utc>,
}

/// Fixed-capacity circular buffer of recent interaction batches.
///
/// Invariant: `size == min(total_inserted, max_size)`; `head` is the next
/// write index and wraps modulo `max_size`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StmContext {
    pub items: Vec<Option<StmSlot>>,
    pub max_size: usize,
    pub head: usize,
    pub size: usize,
    pub total_inserted: u64,
}

impl StmContext {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: vec![None; max_size],
            max_size,
            head: 0,
            size: 0,
            total_inserted: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    /// Something that happened.
    Episodic,
    /// Something that is true.
    Semantic,
}

impl std::fmt::Display for FactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Episodic => write!(f, "episodic"),
            Self::Semantic => write!(f, "semantic"),
        }
    }
}

/// Who a long-term fact belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryScope {
    pub user_id: String,
    /// The run that produced the fact; not used for search filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl MemoryScope {
    pub fn new(user_id: impl Into<String>, run_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            run_id,
        }
    }
}

/// A durable fact in LTM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFact {
    /// Content-identity key; assigned by the store on upsert.
    #[serde(default)]
    pub id: String,
    pub kind: FactKind,
    pub content: String,
    pub scope: MemoryScope,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Similarity to the query (set by search).
    #[serde(default)]
    pub score: f32,
    /// How many near-duplicate facts were folded into this one.
    #[serde(default)]
    pub merge_count: u32,
}

impl MemoryFact {
    pub fn new(kind: FactKind, content: impl Into<String>, scope: MemoryScope) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            kind,
            content: content.into(),
            scope,
            embedding: Vec::new(),
            created_at: now,
            updated_at: now,
            score: 0.0,
            merge_count: 0,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }
}

/// A similarity query against LTM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LtmQuery {
    pub embedding: Vec<f32>,
    pub scope: MemoryScope,
    pub top_k: usize,
    #[serde(default)]
    pub min_score: f32,
}

/// Outcome of an upsert batch. Failures are reported, not raised.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertReport {
    pub success: bool,
    pub inserted: usize,
    pub merged: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpsertReport {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            inserted: 0,
            merged: 0,
            error: Some(error.into()),
        }
    }
}

/// The long-term memory store.
///
/// The only resource shared and mutated across sessions. Writes are upserts
/// keyed by content identity, so concurrent upserts commute.
#[async_trait]
pub trait LtmStore: Send + Sync {
    /// The store name (e.g., "in_memory", "none").
    fn name(&self) -> &str;

    /// Ranked similarity search within a scope.
    async fn search(&self, query: LtmQuery) -> std::result::Result<Vec<MemoryFact>, MemoryError>;

    /// Insert or merge episodic events and semantic facts.
    async fn upsert(&self, episodic: Vec<MemoryFact>, semantic: Vec<MemoryFact>) -> UpsertReport;

    /// Number of stored facts, optionally of one kind.
    async fn count(&self, kind: Option<FactKind>) -> std::result::Result<usize, MemoryError>;
}

/// Turns text into embedding vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, MemoryError>;
}

/// The LTM view loaded for the current cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LtmContext {
    /// Most recent similarity-search results.
    pub items: Vec<MemoryFact>,
    pub episodic_size: usize,
    pub semantic_size: usize,
    /// Facts merged by the last consolidation.
    pub merge_size: usize,
}

/// All memory attached to one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memories {
    pub id: String,
    pub stm: StmContext,
    pub ltm: LtmContext,
    pub is_processing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Memories {
    pub fn new(stm: StmContext, ltm: LtmContext) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            stm,
            ltm,
            is_processing: false,
            last_error: None,
        }
    }
}
