//! Model gateway: capability-tiered access to LLM backends.
//!
//! Callers never pick a provider. They ask for a tier (`fast`, `smart`,
//! `cheap`), directly or through a [`Criticality`], and get a [`ModelHandle`].
//! Every invocation returns a usage figure: the provider's own report when it
//! has one, an estimate otherwise.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use loopwright_core::error::ProviderError;
use loopwright_core::event::{DomainEvent, EventBus};
use loopwright_core::message::Message;
use loopwright_core::provider::{Provider, ProviderRequest, ToolDefinition, Usage};
use loopwright_core::tool::{Summarizer, Summary};
use loopwright_telemetry::{Span, SpanKind, TelemetryEngine};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::fallback::served_by;
use crate::usage::resolve_usage;

/// A capability/cost class of model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelTier {
    Fast,
    Smart,
    Cheap,
}

impl ModelTier {
    pub const ALL: [ModelTier; 3] = [ModelTier::Fast, ModelTier::Smart, ModelTier::Cheap];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Smart => "smart",
            Self::Cheap => "cheap",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "fast" => Some(Self::Fast),
            "smart" => Some(Self::Smart),
            "cheap" => Some(Self::Cheap),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much a call matters; mapped onto a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    /// Bookkeeping: planning decisions, summaries, memory extraction.
    Low,
    /// Regular planning and reasoning.
    Normal,
    /// Judgement calls such as validation.
    High,
}

impl Criticality {
    pub fn tier(&self) -> ModelTier {
        match self {
            Self::Low => ModelTier::Cheap,
            Self::Normal => ModelTier::Fast,
            Self::High => ModelTier::Smart,
        }
    }
}

/// A concrete model bound to a tier.
#[derive(Clone)]
pub struct ModelHandle {
    pub tier: ModelTier,
    provider: Arc<dyn Provider>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl ModelHandle {
    pub fn new(tier: ModelTier, provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            tier,
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("tier", &self.tier)
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish()
    }
}

/// The result of one gateway call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub message: Message,
    pub usage: Usage,
    /// `usage` is an estimate; the provider reported nothing.
    pub estimated: bool,
    pub tier: ModelTier,
    pub model: String,
}

/// A structured-output call: the parsed value plus the raw invocation.
#[derive(Debug, Clone)]
pub struct Structured<T> {
    pub value: T,
    pub invocation: Invocation,
}

/// Tier-routed access to LLM providers, shared by every session.
pub struct ModelGateway {
    bindings: HashMap<ModelTier, ModelHandle>,
    fallback_order: Vec<ModelTier>,
    telemetry: Option<Arc<TelemetryEngine>>,
    events: Option<Arc<EventBus>>,
}

impl ModelGateway {
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
            fallback_order: vec![ModelTier::Smart, ModelTier::Fast, ModelTier::Cheap],
            telemetry: None,
            events: None,
        }
    }

    /// Bind a provider and model to a tier.
    pub fn with_tier(
        self,
        tier: ModelTier,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
    ) -> Self {
        self.with_handle(ModelHandle::new(tier, provider, model))
    }

    pub fn with_handle(mut self, handle: ModelHandle) -> Self {
        self.bindings.insert(handle.tier, handle);
        self
    }

    pub fn with_fallback_order(mut self, order: Vec<ModelTier>) -> Self {
        self.fallback_order = order;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryEngine>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn is_bound(&self, tier: ModelTier) -> bool {
        self.bindings.contains_key(&tier)
    }

    /// Tiers with a concrete model, in `fast`, `smart`, `cheap` order.
    pub fn bound_tiers(&self) -> Vec<ModelTier> {
        ModelTier::ALL
            .into_iter()
            .filter(|t| self.is_bound(*t))
            .collect()
    }

    /// Resolve a criticality to a model handle.
    pub fn select_tier(&self, criticality: Criticality) -> Result<ModelHandle, ProviderError> {
        self.handle(criticality.tier())
    }

    /// Resolve a tier to a model handle, falling back along the configured
    /// order when it is unbound.
    pub fn handle(&self, tier: ModelTier) -> Result<ModelHandle, ProviderError> {
        if let Some(handle) = self.bindings.get(&tier) {
            return Ok(handle.clone());
        }

        let fallback = self
            .fallback_order
            .iter()
            .filter(|t| **t != tier)
            .find_map(|t| self.bindings.get(t));

        match fallback {
            Some(handle) => {
                warn!(
                    requested = %tier,
                    using = %handle.tier,
                    model = %handle.model,
                    "Tier not bound, falling back"
                );
                Ok(handle.clone())
            }
            None => Err(ProviderError::TierUnavailable(tier.to_string())),
        }
    }

    /// Invoke a model with the given tools.
    pub async fn invoke(
        &self,
        handle: &ModelHandle,
        messages: Vec<Message>,
        tools: &[ToolDefinition],
    ) -> Result<Invocation, ProviderError> {
        self.invoke_with_choice(handle, messages, tools, None).await
    }

    /// Invoke a model, optionally forcing a specific tool call.
    pub async fn invoke_with_choice(
        &self,
        handle: &ModelHandle,
        messages: Vec<Message>,
        tools: &[ToolDefinition],
        tool_choice: Option<&str>,
    ) -> Result<Invocation, ProviderError> {
        let mut request = ProviderRequest::new(handle.model.clone(), messages);
        request.temperature = handle.temperature;
        request.max_tokens = handle.max_tokens;
        request.tools = tools.to_vec();
        request.tool_choice = tool_choice.map(str::to_string);

        debug!(
            tier = %handle.tier,
            provider = %handle.provider_name(),
            model = %handle.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Invoking model"
        );

        let started = Instant::now();
        let mut span = Span::new(SpanKind::LlmCall, handle.model.clone())
            .with_route(handle.provider_name(), handle.tier.as_str());

        let result = handle.provider.complete(request.clone()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                span.end(false);
                if let Some(telemetry) = &self.telemetry {
                    telemetry.record_detached(&span);
                }
                return Err(e);
            }
        };

        let provider = served_by(&response)
            .unwrap_or(handle.provider_name())
            .to_string();
        span = span.with_route(provider.as_str(), handle.tier.as_str());
        let (usage, estimated) = resolve_usage(response.usage, &request.messages, &response.message);
        span.record_tokens(usage.prompt_tokens, usage.completion_tokens, estimated);
        span.end(true);

        if let Some(telemetry) = &self.telemetry {
            telemetry.record_detached(&span);
        }
        if let Some(events) = &self.events {
            events.publish(DomainEvent::ModelInvoked {
                provider,
                model: handle.model.clone(),
                tier: handle.tier.to_string(),
                tokens_used: usage.total_tokens,
                estimated,
                duration_ms,
                timestamp: Utc::now(),
            });
        }

        Ok(Invocation {
            message: response.message,
            usage,
            estimated,
            tier: handle.tier,
            model: handle.model.clone(),
        })
    }

    /// Invoke a model under a structured-output contract.
    ///
    /// The schema is offered as a single forced tool. The value is read from
    /// that tool call's arguments, or failing that from JSON in the reply
    /// text. Anything else is [`ProviderError::MalformedOutput`].
    pub async fn invoke_structured<T: DeserializeOwned>(
        &self,
        handle: &ModelHandle,
        messages: Vec<Message>,
        schema: &ToolDefinition,
    ) -> Result<Structured<T>, ProviderError> {
        let invocation = self
            .invoke_with_choice(
                handle,
                messages,
                std::slice::from_ref(schema),
                Some(&schema.name),
            )
            .await?;

        let value = parse_structured(&invocation.message, &schema.name)?;
        Ok(Structured { value, invocation })
    }
}

impl Default for ModelGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a structured reply: tool-call arguments first, then reply text.
pub fn parse_structured<T: DeserializeOwned>(
    message: &Message,
    tool_name: &str,
) -> Result<T, ProviderError> {
    let from_call = message
        .tool_calls
        .iter()
        .find(|tc| tc.name == tool_name)
        .or_else(|| message.tool_calls.first())
        .map(|tc| tc.arguments.as_str());

    if let Some(args) = from_call {
        match serde_json::from_str::<T>(args) {
            Ok(value) => return Ok(value),
            Err(e) => debug!(tool = tool_name, error = %e, "Structured tool arguments did not parse"),
        }
    }

    let json = extract_json(&message.content).ok_or_else(|| {
        ProviderError::MalformedOutput(format!("no structured output for '{tool_name}'"))
    })?;

    serde_json::from_str(json)
        .map_err(|e| ProviderError::MalformedOutput(format!("{tool_name}: {e}")))
}

/// Find a JSON object in free text: a ```json fenced block, or the span from
/// the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let block = rest.find("```").map(|end| &rest[..end]).unwrap_or(rest);
        let block = block.trim();
        return (!block.is_empty()).then_some(block);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

#[async_trait]
impl Summarizer for ModelGateway {
    async fn summarize(
        &self,
        tool_name: &str,
        content: &str,
        max_chars: usize,
    ) -> Result<Summary, ProviderError> {
        let handle = self.handle(ModelTier::Cheap)?;
        let messages = vec![
            Message::system(format!(
                "Summarize the output of the tool '{tool_name}'. Keep every fact needed to \
                 continue the task. Answer in at most {max_chars} characters, plain text."
            )),
            Message::user(content),
        ];

        let invocation = self.invoke(&handle, messages, &[]).await?;
        let text = invocation.message.content.trim();
        if text.is_empty() {
            return Err(ProviderError::MalformedOutput("empty summary".into()));
        }
        Ok(Summary {
            text: text.to_string(),
            usage: invocation.usage,
            estimated: invocation.estimated,
        })
    }
}
