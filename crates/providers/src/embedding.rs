//! Embeddings served by a remote provider.

use std::sync::Arc;

use async_trait::async_trait;
use loopwright_core::error::MemoryError;
use loopwright_core::memory::Embedder;
use loopwright_core::provider::{EmbeddingRequest, Provider};
use tracing::debug;

/// An [`Embedder`] backed by a provider's embeddings endpoint.
pub struct ProviderEmbedder {
    provider: Arc<dyn Provider>,
    model: String,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(provider = %self.provider.name(), count = texts.len(), "Embedding texts");
        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs: texts.to_vec(),
            })
            .await
            .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))?;

        if response.embeddings.len() != texts.len() {
            return Err(MemoryError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.embeddings.len()
            )));
        }
        Ok(response.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopwright_core::error::ProviderError;
    use loopwright_core::provider::{EmbeddingResponse, ProviderRequest, ProviderResponse};

    struct FixedEmbeddings {
        vectors: Vec<Vec<f32>>,
    }

    #[async_trait]
    impl Provider for FixedEmbeddings {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::NotConfigured("completions".into()))
        }

        async fn embed(
            &self,
            request: EmbeddingRequest,
        ) -> Result<EmbeddingResponse, ProviderError> {
            Ok(EmbeddingResponse {
                embeddings: self.vectors.clone(),
                model: request.model,
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn embeds_through_provider() {
        let embedder = ProviderEmbedder::new(
            Arc::new(FixedEmbeddings {
                vectors: vec![vec![1.0, 0.0]],
            }),
            "emb",
        );
        let out = embedder.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0]]);
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn count_mismatch_is_an_error() {
        let embedder = ProviderEmbedder::new(Arc::new(FixedEmbeddings { vectors: vec![] }), "emb");
        let err = embedder.embed(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, MemoryError::EmbeddingFailed(_)));
    }
}
