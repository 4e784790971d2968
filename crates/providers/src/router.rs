//! Provider router: builds the named providers and the tiered gateway
//! from configuration.
//!
//! Every provider is wrapped in a [`RetryProvider`]; a tier that lists
//! `fallback_providers` gets a [`BackendChain`] over them.

use std::collections::HashMap;
use std::sync::Arc;

use loopwright_config::{AppConfig, TierModelConfig};
use loopwright_core::error::ProviderError;
use loopwright_core::provider::Provider;
use tracing::{debug, info};

use crate::embedding::ProviderEmbedder;
use crate::fallback::BackendChain;
use crate::gateway::{ModelGateway, ModelHandle, ModelTier};
use crate::openai_compat::OpenAiCompatProvider;
use crate::retry::RetryProvider;

/// Named providers, ready to be bound to tiers.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// The provider serving one tier: its primary, or a fallback chain.
    fn tier_provider(&self, tier: &TierModelConfig) -> Result<Arc<dyn Provider>, ProviderError> {
        let lookup = |name: &str| {
            self.get(name)
                .ok_or_else(|| ProviderError::NotConfigured(format!("provider '{name}'")))
        };

        let primary = lookup(&tier.provider)?;
        if tier.fallback_providers.is_empty() {
            return Ok(primary);
        }

        let mut chain = BackendChain::new(primary);
        for name in &tier.fallback_providers {
            chain = chain.then(lookup(name)?);
        }
        debug!(order = ?chain.order(), "Tier backend chain");
        Ok(Arc::new(chain))
    }
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn build_provider(config: &AppConfig, name: &str) -> Arc<dyn Provider> {
    let api_key = config.api_key_for(name).unwrap_or_default();
    let base_url = config
        .providers
        .get(name)
        .and_then(|p| p.api_url.clone())
        .unwrap_or_else(|| default_base_url(name));

    let inner: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::new(name, base_url, api_key));
    Arc::new(
        RetryProvider::new(inner)
            .with_max_attempts(config.retry.max_attempts)
            .with_base_delay_ms(config.retry.base_delay_ms),
    )
}

/// Build every provider the configuration names or references.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new();

    let referenced = [&config.tiers.fast, &config.tiers.smart, &config.tiers.cheap]
        .into_iter()
        .flatten()
        .flat_map(|t| std::iter::once(&t.provider).chain(t.fallback_providers.iter()))
        .chain(config.memory.embedding_provider.iter());

    for name in config.providers.keys().chain(referenced) {
        if router.get(name).is_none() {
            debug!(provider = %name, "Registering provider");
            router.register(name.clone(), build_provider(config, name));
        }
    }

    router
}

/// Bind the configured tiers to providers.
///
/// Fails when no tier is bound at all; an individual unbound tier is resolved
/// at call time through the fallback order.
pub fn build_gateway(
    config: &AppConfig,
    router: &ProviderRouter,
) -> Result<ModelGateway, ProviderError> {
    let tiers = [
        (ModelTier::Fast, &config.tiers.fast),
        (ModelTier::Smart, &config.tiers.smart),
        (ModelTier::Cheap, &config.tiers.cheap),
    ];

    let mut gateway = ModelGateway::new().with_fallback_order(
        config
            .tiers
            .fallback_order
            .iter()
            .filter_map(|name| ModelTier::parse(name))
            .collect(),
    );

    let mut bound = 0;
    for (tier, tier_config) in tiers {
        let Some(tier_config) = tier_config else {
            continue;
        };
        let provider = router.tier_provider(tier_config)?;
        info!(
            tier = %tier,
            provider = %tier_config.provider,
            model = %tier_config.model,
            "Tier bound"
        );
        gateway = gateway.with_handle(
            ModelHandle::new(tier, provider, tier_config.model.clone())
                .with_temperature(tier_config.temperature)
                .with_max_tokens(tier_config.max_tokens),
        );
        bound += 1;
    }

    if bound == 0 {
        return Err(ProviderError::NotConfigured("no model tier configured".into()));
    }
    Ok(gateway)
}

/// A provider-backed embedder when `memory.embedding_provider` is set.
pub fn build_embedder(config: &AppConfig, router: &ProviderRouter) -> Option<ProviderEmbedder> {
    let name = config.memory.embedding_provider.as_deref()?;
    let provider = router.get(name)?;
    Some(ProviderEmbedder::new(provider, config.memory.embedding_model.clone()))
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "fireworks" => "https://api.fireworks.ai/inference/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
