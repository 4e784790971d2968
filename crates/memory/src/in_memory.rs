//! In-memory long-term memory store: the default LTM backend.
//!
//! Facts are keyed by content identity (SHA-256 of kind, user and normalized
//! content), so upserting the same fact twice from two sessions lands on the
//! same entry regardless of order. Near-duplicates above the merge threshold
//! are folded into the existing fact, and each kind is capped by evicting the
//! least recently updated facts.

use async_trait::async_trait;
use chrono::Utc;
use loopwright_core::error::MemoryError;
use loopwright_core::memory::{FactKind, LtmQuery, LtmStore, MemoryFact, UpsertReport};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::vector::{cosine_similarity, vector_search};

/// Limits applied by [`InMemoryLtmStore`].
#[derive(Debug, Clone)]
pub struct LtmLimits {
    pub episodic_limit: usize,
    pub semantic_limit: usize,
    pub merge_threshold: f32,
}

impl Default for LtmLimits {
    fn default() -> Self {
        Self {
            episodic_limit: 500,
            semantic_limit: 500,
            merge_threshold: 0.92,
        }
    }
}

impl LtmLimits {
    fn limit_for(&self, kind: FactKind) -> usize {
        match kind {
            FactKind::Episodic => self.episodic_limit,
            FactKind::Semantic => self.semantic_limit,
        }
    }
}

/// Content-identity key of a fact.
pub fn content_key(kind: FactKind, user_id: &str, content: &str) -> String {
    let normalized = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(kind.to_string().as_bytes());
    hasher.update([0x1f]);
    hasher.update(user_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// An LTM store held in process memory, safe to share across sessions.
pub struct InMemoryLtmStore {
    inner: Arc<RwLock<Inner>>,
    limits: LtmLimits,
}

#[derive(Default)]
struct Inner {
    facts: HashMap<String, Stored>,
    /// Logical clock; orders updates for eviction.
    clock: u64,
}

struct Stored {
    fact: MemoryFact,
    touched: u64,
}

impl InMemoryLtmStore {
    pub fn new() -> Self {
        Self::with_limits(LtmLimits::default())
    }

    pub fn with_limits(limits: LtmLimits) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            limits,
        }
    }

    /// Snapshot of every stored fact, sorted by id.
    pub async fn all(&self) -> Vec<MemoryFact> {
        let inner = self.inner.read().await;
        let mut facts: Vec<MemoryFact> = inner.facts.values().map(|s| s.fact.clone()).collect();
        facts.sort_by(|a, b| a.id.cmp(&b.id));
        facts
    }
}

impl Default for InMemoryLtmStore {
    fn default() -> Self {
        Self::new()
    }
}

enum Applied {
    Inserted,
    Merged,
}

impl Inner {
    fn apply(&mut self, mut fact: MemoryFact, merge_threshold: f32) -> Applied {
        self.clock += 1;
        let clock = self.clock;
        let now = Utc::now();
        let key = content_key(fact.kind, &fact.scope.user_id, &fact.content);

        if let Some(existing) = self.facts.get_mut(&key) {
            existing.fact.updated_at = now;
            existing.fact.merge_count += 1;
            existing.touched = clock;
            return Applied::Merged;
        }

        if !fact.embedding.is_empty() {
            let similar = self
                .facts
                .values_mut()
                .filter(|s| s.fact.kind == fact.kind && s.fact.scope.user_id == fact.scope.user_id)
                .map(|s| (cosine_similarity(&s.fact.embedding, &fact.embedding), s))
                .filter(|(sim, _)| *sim >= merge_threshold)
                .max_by(|a, b| {
                    a.0.partial_cmp(&b.0)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| b.1.fact.id.cmp(&a.1.fact.id))
                });
            if let Some((sim, existing)) = similar {
                debug!(id = %existing.fact.id, similarity = sim, "Merging near-duplicate fact");
                existing.fact.updated_at = now;
                existing.fact.merge_count += 1;
                existing.touched = clock;
                return Applied::Merged;
            }
        }

        fact.id = key.clone();
        fact.updated_at = now;
        fact.score = 0.0;
        self.facts.insert(key, Stored { fact, touched: clock });
        Applied::Inserted
    }

    fn evict(&mut self, kind: FactKind, limit: usize) {
        let mut of_kind: Vec<(u64, String)> = self
            .facts
            .values()
            .filter(|s| s.fact.kind == kind)
            .map(|s| (s.touched, s.fact.id.clone()))
            .collect();
        if of_kind.len() <= limit {
            return;
        }
        of_kind.sort();
        let excess = of_kind.len() - limit;
        for (_, id) in of_kind.into_iter().take(excess) {
            self.facts.remove(&id);
        }
        debug!(kind = %kind, evicted = excess, "LTM capacity eviction");
    }
}

#[async_trait]
impl LtmStore for InMemoryLtmStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn search(&self, query: LtmQuery) -> Result<Vec<MemoryFact>, MemoryError> {
        if query.embedding.is_empty() {
            return Err(MemoryError::QueryFailed("query embedding is empty".into()));
        }
        let inner = self.inner.read().await;
        let in_scope = inner
            .facts
            .values()
            .map(|s| &s.fact)
            .filter(|f| f.scope.user_id == query.scope.user_id);
        Ok(vector_search(
            in_scope,
            &query.embedding,
            query.top_k,
            query.min_score,
        ))
    }

    async fn upsert(&self, episodic: Vec<MemoryFact>, semantic: Vec<MemoryFact>) -> UpsertReport {
        let incoming = episodic
            .into_iter()
            .map(|mut f| {
                f.kind = FactKind::Episodic;
                f
            })
            .chain(semantic.into_iter().map(|mut f| {
                f.kind = FactKind::Semantic;
                f
            }))
            .filter(|f| !f.content.trim().is_empty());

        let mut report = UpsertReport {
            success: true,
            ..UpsertReport::default()
        };

        let mut inner = self.inner.write().await;
        for fact in incoming {
            match inner.apply(fact, self.limits.merge_threshold) {
                Applied::Inserted => report.inserted += 1,
                Applied::Merged => report.merged += 1,
            }
        }
        for kind in [FactKind::Episodic, FactKind::Semantic] {
            inner.evict(kind, self.limits.limit_for(kind));
        }

        report
    }

    async fn count(&self, kind: Option<FactKind>) -> Result<usize, MemoryError> {
        let inner = self.inner.read().await;
        Ok(match kind {
            Some(k) => inner.facts.values().filter(|s| s.fact.kind == k).count(),
            None => inner.facts.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopwright_core::memory::MemoryScope;

    fn fact(content: &str, user: &str, embedding: Vec<f32>) -> MemoryFact {
        MemoryFact::new(FactKind::Semantic, content, MemoryScope::new(user, None))
            .with_embedding(embedding)
    }

    fn query(user: &str, embedding: Vec<f32>) -> LtmQuery {
        LtmQuery {
            embedding,
            scope: MemoryScope::new(user, None),
            top_k: 10,
            min_score: 0.0,
        }
    }

    #[test]
    fn content_key_normalizes_whitespace_and_case() {
        let a = content_key(FactKind::Semantic, "u", "The  sky is\nBlue");
        let b = content_key(FactKind::Semantic, "u", "the sky is blue");
        let c = content_key(FactKind::Episodic, "u", "the sky is blue");
        let d = content_key(FactKind::Semantic, "v", "the sky is blue");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn identical_content_merges() {
        let store = InMemoryLtmStore::new();
        let first = store
            .upsert(vec![], vec![fact("User lives in Oslo", "u", vec![1.0, 0.0])])
            .await;
        let second = store
            .upsert(vec![], vec![fact("user lives in  oslo", "u", vec![1.0, 0.0])])
            .await;
        assert_eq!(first.inserted, 1);
        assert_eq!(second.merged, 1);
        assert_eq!(store.count(None).await.unwrap(), 1);
        assert_eq!(store.all().await[0].merge_count, 1);
    }

    #[tokio::test]
    async fn near_duplicate_merges_above_threshold() {
        let store = InMemoryLtmStore::with_limits(LtmLimits {
            merge_threshold: 0.9,
            ..LtmLimits::default()
        });
        store
            .upsert(vec![], vec![fact("Prefers tea", "u", vec![1.0, 0.0])])
            .await;
        let report = store
            .upsert(vec![], vec![fact("Likes tea", "u", vec![0.99, 0.05])])
            .await;
        assert_eq!(report.merged, 1);

        let report = store
            .upsert(vec![], vec![fact("Owns a bike", "u", vec![0.0, 1.0])])
            .await;
        assert_eq!(report.inserted, 1);
        assert_eq!(store.count(Some(FactKind::Semantic)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn upsert_order_does_not_matter_for_identical_facts() {
        let a = InMemoryLtmStore::new();
        let b = InMemoryLtmStore::new();
        let x = || fact("x happened", "u", vec![1.0, 0.0]);
        let y = || fact("y is true", "u", vec![0.0, 1.0]);

        a.upsert(vec![], vec![x()]).await;
        a.upsert(vec![], vec![y()]).await;
        b.upsert(vec![], vec![y()]).await;
        b.upsert(vec![], vec![x()]).await;

        let ids_a: Vec<_> = a.all().await.into_iter().map(|f| f.id).collect();
        let ids_b: Vec<_> = b.all().await.into_iter().map(|f| f.id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[tokio::test]
    async fn upsert_forces_kind_by_list() {
        let store = InMemoryLtmStore::new();
        store
            .upsert(vec![fact("Ran the report", "u", vec![1.0])], vec![])
            .await;
        assert_eq!(store.count(Some(FactKind::Episodic)).await.unwrap(), 1);
        assert_eq!(store.count(Some(FactKind::Semantic)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_updated() {
        let store = InMemoryLtmStore::with_limits(LtmLimits {
            semantic_limit: 2,
            ..LtmLimits::default()
        });
        store.upsert(vec![], vec![fact("one", "u", vec![])]).await;
        store.upsert(vec![], vec![fact("two", "u", vec![])]).await;
        store.upsert(vec![], vec![fact("three", "u", vec![])]).await;

        let contents: Vec<_> = store.all().await.into_iter().map(|f| f.content).collect();
        assert_eq!(contents.len(), 2);
        assert!(!contents.contains(&"one".to_string()));
    }

    #[tokio::test]
    async fn search_is_scoped_and_ranked() {
        let store = InMemoryLtmStore::new();
        store
            .upsert(
                vec![],
                vec![
                    fact("a", "u", vec![1.0, 0.0]),
                    fact("b", "u", vec![0.6, 0.8]),
                    fact("c", "other", vec![1.0, 0.0]),
                ],
            )
            .await;

        let hits = store.search(query("u", vec![1.0, 0.0])).await.unwrap();
        let contents: Vec<_> = hits.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn search_applies_min_score() {
        let store = InMemoryLtmStore::new();
        store
            .upsert(vec![], vec![fact("far", "u", vec![0.0, 1.0])])
            .await;
        let mut q = query("u", vec![1.0, 0.0]);
        q.min_score = 0.5;
        assert!(store.search(q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_query_embedding_is_error() {
        let store = InMemoryLtmStore::new();
        assert!(store.search(query("u", vec![])).await.is_err());
    }

    #[tokio::test]
    async fn blank_content_is_skipped() {
        let store = InMemoryLtmStore::new();
        let report = store.upsert(vec![], vec![fact("   ", "u", vec![1.0])]).await;
        assert!(report.success);
        assert_eq!(report.inserted, 0);
        assert_eq!(store.count(None).await.unwrap(), 0);
    }
}
