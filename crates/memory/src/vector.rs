//! Vector similarity utilities.
//!
//! Pure-Rust cosine similarity and ranked search over long-term facts.

use loopwright_core::memory::MemoryFact;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank facts by cosine similarity to a query embedding.
///
/// Facts without embeddings or below `min_score` are dropped. Ties on score
/// are broken by id so the ranking is deterministic.
pub fn vector_search<'a>(
    facts: impl IntoIterator<Item = &'a MemoryFact>,
    query_embedding: &[f32],
    limit: usize,
    min_score: f32,
) -> Vec<MemoryFact> {
    let mut scored: Vec<MemoryFact> = facts
        .into_iter()
        .filter(|f| !f.embedding.is_empty())
        .filter_map(|fact| {
            let sim = cosine_similarity(&fact.embedding, query_embedding);
            (sim >= min_score).then(|| {
                let mut f = fact.clone();
                f.score = sim;
                f
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.truncate(limit);
    scored
}
