//! Thread-safe telemetry engine: collects spans, keeps token totals per
//! provider and tier, and enforces the per-session token budget.

use crate::TelemetryError;
use crate::model::*;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Completed traces kept before the oldest are pruned.
const MAX_TRACES: usize = 5_000;

/// The core telemetry engine.
///
/// Shared across sessions behind an `Arc`. LLM spans may be recorded without
/// a trace (the model gateway does not know which session it serves); they
/// still feed the running totals.
pub struct TelemetryEngine {
    traces: RwLock<Vec<Trace>>,
    /// Tokens one session may consume; 0 means unlimited.
    session_budget: u64,
    totals: RwLock<RunningTotals>,
}

#[derive(Debug, Default)]
struct RunningTotals {
    total: UsageTotals,
    by_provider: HashMap<String, UsageTotals>,
    by_tier: HashMap<String, UsageTotals>,
    tool_execs: u64,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl TelemetryEngine {
    pub fn new() -> Self {
        Self::with_session_budget(0)
    }

    /// Create an engine with a per-session token budget (0 = unlimited).
    pub fn with_session_budget(max_tokens: u64) -> Self {
        Self {
            traces: RwLock::new(Vec::new()),
            session_budget: max_tokens,
            totals: RwLock::new(RunningTotals::default()),
        }
    }

    pub fn session_budget(&self) -> Option<u64> {
        (self.session_budget > 0).then_some(self.session_budget)
    }

    /// Check a session's consumed tokens against the budget.
    pub fn check_budget(&self, session_tokens: u64) -> Result<(), TelemetryError> {
        match self.session_budget() {
            Some(limit) if session_tokens >= limit => Err(TelemetryError::BudgetExceeded(format!(
                "session used {session_tokens} tokens, limit is {limit}"
            ))),
            _ => Ok(()),
        }
    }

    // ── Trace management ──────────────────────────────────────────────

    /// Start a new trace for a session.
    pub fn start_trace(&self, session_id: impl Into<String>) -> String {
        let trace = Trace::new(session_id);
        let id = trace.id.clone();
        let mut traces = write(&self.traces);

        if traces.len() >= MAX_TRACES {
            let drain_count = MAX_TRACES / 10;
            let mut removed = 0;
            traces.retain(|t| {
                if removed >= drain_count || t.ended_at.is_none() {
                    return true;
                }
                removed += 1;
                false
            });
        }

        traces.push(trace);
        id
    }

    pub fn end_trace(&self, trace_id: &str) {
        let mut traces = write(&self.traces);
        if let Some(trace) = traces.iter_mut().find(|t| t.id == trace_id) {
            trace.end();
        }
    }

    fn update_totals(&self, span: &Span) {
        let mut totals = write(&self.totals);
        match span.kind {
            SpanKind::LlmCall => {
                let input = span.input_tokens.unwrap_or(0);
                let output = span.output_tokens.unwrap_or(0);
                totals.total.add(input, output, span.estimated);
                if let Some(provider) = &span.provider {
                    totals
                        .by_provider
                        .entry(provider.clone())
                        .or_default()
                        .add(input, output, span.estimated);
                }
                if let Some(tier) = &span.tier {
                    totals
                        .by_tier
                        .entry(tier.clone())
                        .or_default()
                        .add(input, output, span.estimated);
                }
            }
            SpanKind::ToolExecution => totals.tool_execs += 1,
            _ => {}
        }
    }

    /// Record a completed span in a trace and update running totals.
    pub fn record_span(&self, trace_id: &str, span: Span) {
        self.update_totals(&span);

        let mut traces = write(&self.traces);
        if let Some(trace) = traces.iter_mut().find(|t| t.id == trace_id) {
            trace.add_span(span);
        }
    }

    /// Record a span that belongs to no trace. Only running totals change.
    pub fn record_detached(&self, span: &Span) {
        self.update_totals(span);
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        read(&self.traces)
            .iter()
            .find(|t| t.id == trace_id)
            .cloned()
    }

    pub fn trace_count(&self) -> usize {
        read(&self.traces).len()
    }

    /// Current usage totals, broken down by provider and tier.
    pub fn usage_report(&self) -> UsageReport {
        let totals = read(&self.totals);

        let keyed = |map: &HashMap<String, UsageTotals>| {
            let mut out: Vec<KeyedUsage> = map
                .iter()
                .map(|(key, usage)| KeyedUsage {
                    key: key.clone(),
                    usage: usage.clone(),
                })
                .collect();
            out.sort_by(|a, b| a.key.cmp(&b.key));
            out
        };

        UsageReport {
            total: totals.total.clone(),
            by_provider: keyed(&totals.by_provider),
            by_tier: keyed(&totals.by_tier),
            tool_executions: totals.tool_execs,
            trace_count: self.trace_count() as u64,
        }
    }
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new()
    }
}
