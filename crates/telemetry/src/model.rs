//! Data model for execution traces, spans, token budgets and usage reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Span ──────────────────────────────────────────────────────────────────

/// The kind of work a span represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// A model gateway call.
    LlmCall,
    /// A tool execution.
    ToolExecution,
    /// An LTM upsert or retrieval.
    MemoryOp,
    /// One state-machine node run by the orchestrator.
    Node,
    /// A whole session run (start or resume until it yields).
    Session,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LlmCall => write!(f, "llm_call"),
            Self::ToolExecution => write!(f, "tool_execution"),
            Self::MemoryOp => write!(f, "memory_op"),
            Self::Node => write!(f, "node"),
            Self::Session => write!(f, "session"),
        }
    }
}

/// A single traced execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: String,
    /// Parent span id (None for root spans).
    pub parent_id: Option<String>,
    pub kind: SpanKind,
    /// Human-readable label (node name, tool name, model name).
    pub label: String,
    /// Provider that served an LLM call.
    #[serde(default)]
    pub provider: Option<String>,
    /// Tier (`fast`/`smart`/`cheap`) an LLM call was routed through.
    #[serde(default)]
    pub tier: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Duration in milliseconds (computed on end).
    pub duration_ms: Option<u64>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    /// Token counts were estimated rather than reported by the provider.
    #[serde(default)]
    pub estimated: bool,
    pub success: Option<bool>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Span {
    /// Create a new span with the given kind and label.
    pub fn new(kind: SpanKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            kind,
            label: label.into(),
            provider: None,
            tier: None,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            input_tokens: None,
            output_tokens: None,
            estimated: false,
            success: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Set the parent span.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Attribute an LLM call to a provider and tier.
    pub fn with_route(mut self, provider: impl Into<String>, tier: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.tier = Some(tier.into());
        self
    }

    /// Mark the span as ended with the given success status.
    pub fn end(&mut self, success: bool) {
        let now = Utc::now();
        self.ended_at = Some(now);
        self.duration_ms = Some(
            now.signed_duration_since(self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.success = Some(success);
    }

    /// Record token usage.
    pub fn record_tokens(&mut self, input: u32, output: u32, estimated: bool) {
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
        self.estimated = estimated;
    }

    /// Total tokens (input + output), or 0 if not recorded.
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens
            .unwrap_or(0)
            .saturating_add(self.output_tokens.unwrap_or(0))
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// The spans of one agent session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub session_id: String,
    pub spans: Vec<Span>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Trace {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            spans: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn add_span(&mut self, span: Span) {
        self.spans.push(span);
    }

    pub fn end(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Total tokens across all spans.
    pub fn total_tokens(&self) -> u64 {
        self.spans.iter().map(|s| s.total_tokens() as u64).sum()
    }

    /// Total duration in milliseconds.
    pub fn total_duration_ms(&self) -> u64 {
        self.spans.iter().filter_map(|s| s.duration_ms).sum()
    }

    fn count(&self, kind: SpanKind) -> usize {
        self.spans.iter().filter(|s| s.kind == kind).count()
    }

    /// Number of LLM calls in this trace.
    pub fn llm_call_count(&self) -> usize {
        self.count(SpanKind::LlmCall)
    }

    /// Number of tool executions in this trace.
    pub fn tool_execution_count(&self) -> usize {
        self.count(SpanKind::ToolExecution)
    }

    /// Number of state-machine nodes run in this trace.
    pub fn node_count(&self) -> usize {
        self.count(SpanKind::Node)
    }
}

// ── Aggregated views ──────────────────────────────────────────────────────

/// Token counters for one provider, one tier, or everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    /// Calls whose usage was estimated.
    pub estimated_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageTotals {
    pub fn add(&mut self, input: u32, output: u32, estimated: bool) {
        self.calls += 1;
        if estimated {
            self.estimated_calls += 1;
        }
        self.input_tokens += input as u64;
        self.output_tokens += output as u64;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Usage counters under a provider or tier name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyedUsage {
    pub key: String,
    pub usage: UsageTotals,
}

/// A point-in-time usage report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    pub total: UsageTotals,
    /// Sorted by provider name.
    pub by_provider: Vec<KeyedUsage>,
    /// Sorted by tier name.
    pub by_tier: Vec<KeyedUsage>,
    pub tool_executions: u64,
    pub trace_count: u64,
}
