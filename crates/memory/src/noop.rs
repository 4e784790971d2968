//! No-op LTM store: disables long-term memory entirely.

use async_trait::async_trait;
use loopwright_core::error::MemoryError;
use loopwright_core::memory::{FactKind, LtmQuery, LtmStore, MemoryFact, UpsertReport};

/// A no-op store that keeps nothing and finds nothing.
pub struct NoopLtmStore;

#[async_trait]
impl LtmStore for NoopLtmStore {
    fn name(&self) -> &str {
        "none"
    }

    async fn search(&self, _query: LtmQuery) -> Result<Vec<MemoryFact>, MemoryError> {
        Ok(Vec::new())
    }

    async fn upsert(&self, _episodic: Vec<MemoryFact>, _semantic: Vec<MemoryFact>) -> UpsertReport {
        UpsertReport {
            success: true,
            ..UpsertReport::default()
        }
    }

    async fn count(&self, _kind: Option<FactKind>) -> Result<usize, MemoryError> {
        Ok(0)
    }
}
