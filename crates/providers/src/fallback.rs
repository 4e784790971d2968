//! Backend chains for tiers that list `fallback_providers`.
//!
//! A chain asks its backends in order and stops at the first answer. The
//! answering backend's name is stamped into the response metadata under
//! [`SERVED_BY_KEY`] so usage lands on the provider that did the work.
//! A request every backend would reject is not passed down the chain.

use async_trait::async_trait;
use loopwright_core::error::ProviderError;
use loopwright_core::provider::{Provider, ProviderRequest, ProviderResponse};
use std::sync::Arc;
use tracing::{debug, warn};

/// Response metadata key naming the backend that answered.
pub const SERVED_BY_KEY: &str = "served_by";

/// The backend that produced `response`, if a chain stamped it.
pub fn served_by(response: &ProviderResponse) -> Option<&str> {
    response.metadata.get(SERVED_BY_KEY).and_then(|v| v.as_str())
}

/// Whether the next backend might accept what this one refused.
fn worth_passing_on(error: &ProviderError) -> bool {
    !matches!(
        error,
        ProviderError::ApiError {
            status_code: 400 | 413 | 422,
            ..
        }
    )
}

/// One tier's primary backend followed by its fallbacks.
pub struct BackendChain {
    name: String,
    backends: Vec<Arc<dyn Provider>>,
}

impl BackendChain {
    pub fn new(primary: Arc<dyn Provider>) -> Self {
        Self {
            name: format!("{}+fallback", primary.name()),
            backends: vec![primary],
        }
    }

    pub fn then(mut self, backend: Arc<dyn Provider>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Backend names in the order they are asked.
    pub fn order(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }
}

#[async_trait]
impl Provider for BackendChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let mut failures = Vec::new();

        for backend in &self.backends {
            match backend.complete(request.clone()).await {
                Ok(mut response) => {
                    if !failures.is_empty() {
                        debug!(
                            chain = %self.name,
                            backend = %backend.name(),
                            skipped = failures.len(),
                            "Answered by fallback backend"
                        );
                    }
                    response
                        .metadata
                        .insert(SERVED_BY_KEY.into(), backend.name().into());
                    return Ok(response);
                }
                Err(e) if !worth_passing_on(&e) => {
                    warn!(chain = %self.name, backend = %backend.name(), error = %e, "Request rejected");
                    return Err(e);
                }
                Err(e) => {
                    warn!(chain = %self.name, backend = %backend.name(), error = %e, "Backend failed");
                    failures.push(e);
                }
            }
        }

        // `new` guarantees at least one backend, so at least one failure.
        Err(failures
            .pop()
            .unwrap_or_else(|| ProviderError::NotConfigured(self.name.clone())))
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        for backend in &self.backends {
            if matches!(backend.health_check().await, Ok(true)) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
