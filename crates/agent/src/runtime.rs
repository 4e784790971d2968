//! The collaborators shared by every session.
//!
//! An `AgentRuntime` is built once per host and handed to the
//! [`SessionManager`](crate::session::SessionManager) behind an `Arc`. It holds
//! no per-session state: the model gateway, tool invoker and LTM store are
//! safe for concurrent use.

use std::sync::Arc;

use loopwright_config::{AgentRunConfig, AppConfig, MemoryConfig};
use loopwright_core::event::EventBus;
use loopwright_core::memory::{Embedder, LtmStore};
use loopwright_core::profile::AgentProfile;
use loopwright_core::tool::{Summarizer, ToolRegistry};
use loopwright_core::{Error, Result};
use loopwright_memory::{HashEmbedder, InMemoryLtmStore, LtmLimits};
use loopwright_providers::{ModelGateway, build_embedder, build_from_config, build_gateway};
use loopwright_telemetry::TelemetryEngine;
use loopwright_tools::ToolInvoker;
use tracing::info;

pub struct AgentRuntime {
    pub(crate) gateway: Arc<ModelGateway>,
    pub(crate) invoker: Arc<ToolInvoker>,
    pub(crate) ltm: Arc<dyn LtmStore>,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) telemetry: Option<Arc<TelemetryEngine>>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) profile: AgentProfile,
    pub(crate) agent: AgentRunConfig,
    pub(crate) memory: MemoryConfig,
}

impl AgentRuntime {
    /// A runtime with an in-memory LTM store, the hashing embedder and
    /// default limits.
    pub fn new(gateway: Arc<ModelGateway>, invoker: Arc<ToolInvoker>) -> Self {
        let memory = MemoryConfig::default();
        Self {
            gateway,
            invoker,
            ltm: Arc::new(InMemoryLtmStore::with_limits(ltm_limits(&memory))),
            embedder: Arc::new(HashEmbedder::new(memory.embedding_dimensions)),
            telemetry: None,
            events: Arc::new(EventBus::default()),
            profile: AgentProfile::default(),
            agent: AgentRunConfig::default(),
            memory,
        }
    }

    /// Wire every collaborator from configuration.
    ///
    /// Fails on misconfiguration only: invalid values, or no model tier bound.
    pub fn from_config(config: &AppConfig, registry: Arc<ToolRegistry>) -> Result<Self> {
        config.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;

        let events = Arc::new(EventBus::default());
        let telemetry = (config.telemetry.enabled || config.telemetry.max_session_tokens > 0)
            .then(|| {
                Arc::new(TelemetryEngine::with_session_budget(
                    config.telemetry.max_session_tokens,
                ))
            });

        let router = build_from_config(config);
        let mut gateway = build_gateway(config, &router)?.with_events(events.clone());
        if let Some(telemetry) = &telemetry {
            gateway = gateway.with_telemetry(telemetry.clone());
        }
        let gateway = Arc::new(gateway);

        let summarizer: Arc<dyn Summarizer> = gateway.clone();
        let invoker = ToolInvoker::from_config(registry, &config.tools)
            .with_summarizer(summarizer)
            .with_events(events.clone());

        let embedder: Arc<dyn Embedder> = match build_embedder(config, &router) {
            Some(embedder) => Arc::new(embedder),
            None => Arc::new(HashEmbedder::new(config.memory.embedding_dimensions)),
        };

        info!(
            mode = %config.agent.mode,
            tiers = ?gateway.bound_tiers(),
            tools = invoker.registry().len(),
            "Agent runtime ready"
        );

        Ok(Self {
            gateway,
            invoker: Arc::new(invoker),
            ltm: Arc::new(InMemoryLtmStore::with_limits(ltm_limits(&config.memory))),
            embedder,
            telemetry,
            events,
            profile: config.profile.clone(),
            agent: config.agent.clone(),
            memory: config.memory.clone(),
        })
    }

    pub fn with_ltm(mut self, ltm: Arc<dyn LtmStore>) -> Self {
        self.ltm = ltm;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryEngine>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_profile(mut self, profile: AgentProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_agent_config(mut self, agent: AgentRunConfig) -> Self {
        self.agent = agent;
        self
    }

    /// Replace the memory settings. The LTM store keeps its own limits.
    pub fn with_memory_config(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    pub fn gateway(&self) -> &ModelGateway {
        &self.gateway
    }

    pub fn ltm(&self) -> &Arc<dyn LtmStore> {
        &self.ltm
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn telemetry(&self) -> Option<&Arc<TelemetryEngine>> {
        self.telemetry.as_ref()
    }

    pub fn agent_config(&self) -> &AgentRunConfig {
        &self.agent
    }

    pub fn memory_config(&self) -> &MemoryConfig {
        &self.memory
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }
}

fn ltm_limits(memory: &MemoryConfig) -> LtmLimits {
    LtmLimits {
        episodic_limit: memory.episodic_limit,
        semantic_limit: memory.semantic_limit,
        merge_threshold: memory.merge_threshold,
    }
}
