//! Tool invoker: runs the tool calls of one reasoning step.
//!
//! Each call is bounded by the per-call timeout and by the batch deadline.
//! Output longer than the summarization threshold is shortened through the
//! [`Summarizer`], or truncated when summarization is unavailable.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use loopwright_config::ToolConfig;
use loopwright_core::event::{DomainEvent, EventBus};
use loopwright_core::provider::Usage;
use loopwright_core::tool::{Summarizer, ToolCall, ToolRegistry};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

const TRUNCATION_MARK: &str = " …[truncated]";

/// What happened to one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutcome {
    pub call_id: String,
    pub name: String,
    /// Text written back to the step and STM.
    pub output: String,
    pub success: bool,
    /// `output` was shortened from the tool's raw output.
    pub summarized: bool,
    /// Model usage spent on the summary, if one was produced.
    pub summary_usage: Option<Usage>,
    pub summary_estimated: bool,
    pub timed_out: bool,
    pub duration_ms: u64,
}

/// Normalize raw model arguments into a JSON object.
///
/// Empty, `null` and unparsable arguments become `{}`; a non-object value is
/// wrapped as `{"input": value}`.
pub fn normalize_arguments(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Object(Default::default());
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(Value::Null) => Value::Object(Default::default()),
        Ok(other) => serde_json::json!({ "input": other }),
        Err(e) => {
            warn!(error = %e, "Unparsable tool arguments, using empty object");
            Value::Object(Default::default())
        }
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
///
/// Limits too small to hold the mark get a bare prefix instead.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mark_len = TRUNCATION_MARK.chars().count();
    if max_chars <= mark_len {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - mark_len).collect();
    out.push_str(TRUNCATION_MARK);
    out
}

/// Output after bounding, plus the cost of any summary.
struct Bounded {
    output: String,
    summarized: bool,
    usage: Option<Usage>,
    estimated: bool,
}

impl Bounded {
    fn untouched(output: String) -> Self {
        Self {
            output,
            summarized: false,
            usage: None,
            estimated: false,
        }
    }

    fn truncated(output: String) -> Self {
        Self {
            output,
            summarized: true,
            usage: None,
            estimated: false,
        }
    }
}

/// Executes tool calls against a shared registry.
///
/// Safe to share across sessions: it holds no per-session state.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    summarizer: Option<Arc<dyn Summarizer>>,
    events: Option<Arc<EventBus>>,
    call_timeout: Duration,
    batch_timeout: Duration,
    summarize_threshold: usize,
    summary_max_chars: usize,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::from_config(registry, &ToolConfig::default())
    }

    pub fn from_config(registry: Arc<ToolRegistry>, config: &ToolConfig) -> Self {
        Self {
            registry,
            summarizer: None,
            events: None,
            call_timeout: Duration::from_millis(config.call_timeout_ms),
            batch_timeout: Duration::from_millis(config.batch_timeout_ms),
            summarize_threshold: config.summarize_threshold_chars,
            summary_max_chars: config.summary_max_chars,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_summarization(mut self, threshold_chars: usize, max_chars: usize) -> Self {
        self.summarize_threshold = threshold_chars;
        self.summary_max_chars = max_chars;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one call with the per-call timeout.
    pub async fn invoke(&self, call: &ToolCall) -> InvocationOutcome {
        self.invoke_until(call, Instant::now() + self.call_timeout).await
    }

    /// Run a step's calls concurrently, all bounded by the batch deadline.
    ///
    /// Outcomes come back in call order.
    pub async fn invoke_batch(&self, calls: &[ToolCall]) -> Vec<InvocationOutcome> {
        let started = Instant::now();
        let batch_deadline = started + self.batch_timeout;
        let deadline = batch_deadline.min(started + self.call_timeout);

        debug!(count = calls.len(), "Invoking tool batch");
        join_all(calls.iter().map(|call| self.invoke_until(call, deadline))).await
    }

    async fn invoke_until(&self, call: &ToolCall, deadline: Instant) -> InvocationOutcome {
        let started = Instant::now();
        let mut call = call.clone();
        if !call.arguments.is_object() {
            call.arguments = Value::Object(Default::default());
        }

        let (output, success, timed_out) =
            match tokio::time::timeout_at(deadline, self.registry.execute(&call)).await {
                Ok(Ok(result)) => (result.output, result.success, false),
                Ok(Err(e)) => (format!("Error: {e}"), false, false),
                Err(_) => {
                    let budget_ms = deadline.saturating_duration_since(started).as_millis();
                    warn!(tool = %call.name, budget_ms = budget_ms as u64, "Tool call timed out");
                    (
                        format!("Error: tool '{}' timed out after {budget_ms}ms", call.name),
                        false,
                        true,
                    )
                }
            };

        let bounded = self.bound_output(&call.name, output).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        if let Some(events) = &self.events {
            events.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                success,
                summarized: bounded.summarized,
                duration_ms,
                timestamp: Utc::now(),
            });
        }

        InvocationOutcome {
            call_id: call.id,
            name: call.name,
            output: bounded.output,
            success,
            summarized: bounded.summarized,
            summary_usage: bounded.usage,
            summary_estimated: bounded.estimated,
            timed_out,
            duration_ms,
        }
    }

    /// Shorten oversized output; a failed summary falls back to truncation.
    ///
    /// The bound never exceeds the threshold, so bounded output is always
    /// shorter than the raw output it replaces.
    async fn bound_output(&self, tool_name: &str, output: String) -> Bounded {
        if output.chars().count() <= self.summarize_threshold {
            return Bounded::untouched(output);
        }
        let limit = self.summary_max_chars.min(self.summarize_threshold);

        if let Some(summarizer) = &self.summarizer {
            match summarizer.summarize(tool_name, &output, limit).await {
                Ok(summary) if !summary.text.trim().is_empty() => {
                    return Bounded {
                        output: truncate_chars(summary.text.trim(), limit),
                        summarized: true,
                        usage: Some(summary.usage),
                        estimated: summary.estimated,
                    };
                }
                Ok(summary) => {
                    warn!(tool = tool_name, "Empty summary, truncating instead");
                    return Bounded {
                        usage: Some(summary.usage),
                        estimated: summary.estimated,
                        ..Bounded::truncated(truncate_chars(&output, limit))
                    };
                }
                Err(e) => warn!(tool = tool_name, error = %e, "Summarization failed, truncating instead"),
            }
        }

        Bounded::truncated(truncate_chars(&output, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loopwright_core::error::{ProviderError, ToolError};
    use loopwright_core::tool::{Summary, Tool, ToolResult};
    use std::sync::Mutex;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the arguments"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
            Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: arguments.to_string(),
                data: None,
            })
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: "late".into(),
                data: None,
            })
        }
    }

    struct BigTool;

    #[async_trait]
    impl Tool for BigTool {
        fn name(&self) -> &str {
            "big"
        }
        fn description(&self) -> &str {
            "Returns a large document"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value) -> Result<ToolResult, ToolError> {
            Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: "row ".repeat(500),
                data: None,
            })
        }
    }

    struct RecordingSummarizer {
        reply: Result<String, ProviderError>,
        seen: Mutex<Vec<(String, usize, usize)>>,
    }

    impl RecordingSummarizer {
        fn replying(reply: Result<String, ProviderError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Summarizer for RecordingSummarizer {
        async fn summarize(
            &self,
            tool_name: &str,
            content: &str,
            max_chars: usize,
        ) -> Result<Summary, ProviderError> {
            self.seen
                .lock()
                .unwrap()
                .push((tool_name.to_string(), content.len(), max_chars));
            self.reply.clone().map(|text| Summary {
                text,
                usage: Usage::new(40, 8),
                estimated: false,
            })
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(SlowTool));
        registry.register(Box::new(BigTool));
        Arc::new(registry)
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    #[test]
    fn arguments_normalization() {
        assert_eq!(normalize_arguments(""), serde_json::json!({}));
        assert_eq!(normalize_arguments("  "), serde_json::json!({}));
        assert_eq!(normalize_arguments("null"), serde_json::json!({}));
        assert_eq!(normalize_arguments("{oops"), serde_json::json!({}));
        assert_eq!(normalize_arguments(r#"{"q":"x"}"#), serde_json::json!({"q": "x"}));
        assert_eq!(normalize_arguments("42"), serde_json::json!({"input": 42}));
    }

    #[test]
    fn truncation_respects_limit() {
        assert_eq!(truncate_chars("short", 10), "short");
        let cut = truncate_chars(&"é".repeat(100), 20);
        assert_eq!(cut.chars().count(), 20);
        assert!(cut.ends_with("[truncated]"));
    }

    #[test]
    fn tiny_limits_drop_the_mark() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        for limit in 0..=TRUNCATION_MARK.chars().count() + 1 {
            assert!(truncate_chars(text, limit).chars().count() <= limit);
        }
        assert_eq!(truncate_chars(text, 0), "");
        assert_eq!(truncate_chars(text, 3), "abc");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }

    #[tokio::test]
    async fn null_arguments_reach_tool_as_empty_object() {
        let invoker = ToolInvoker::new(registry());
        let outcome = invoker.invoke(&call("c1", "echo", Value::Null)).await;
        assert!(outcome.success);
        assert_eq!(outcome.output, "{}");
        assert_eq!(outcome.call_id, "c1");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failed_outcome() {
        let invoker = ToolInvoker::new(registry());
        let outcome = invoker.invoke(&call("c1", "missing", serde_json::json!({}))).await;
        assert!(!outcome.success);
        assert!(!outcome.timed_out);
        assert!(outcome.output.contains("missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out_without_blocking_batch() {
        let invoker = ToolInvoker::new(registry())
            .with_call_timeout(Duration::from_millis(50))
            .with_batch_timeout(Duration::from_secs(10));

        let outcomes = invoker
            .invoke_batch(&[
                call("a", "slow", serde_json::json!({})),
                call("b", "echo", serde_json::json!({"k": 1})),
            ])
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].timed_out);
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[1].call_id, "b");
        assert!(outcomes[1].success);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_deadline_caps_call_timeout() {
        let invoker = ToolInvoker::new(registry())
            .with_call_timeout(Duration::from_secs(30))
            .with_batch_timeout(Duration::from_millis(10));

        let outcomes = invoker
            .invoke_batch(&[call("a", "slow", serde_json::json!({}))])
            .await;
        assert!(outcomes[0].timed_out);
        assert!(outcomes[0].output.contains("10ms"));
    }

    #[tokio::test]
    async fn oversized_output_is_summarized() {
        let summarizer = RecordingSummarizer::replying(Ok("500 rows".into()));
        let invoker = ToolInvoker::new(registry())
            .with_summarization(100, 50)
            .with_summarizer(summarizer.clone());

        let outcome = invoker.invoke(&call("c", "big", serde_json::json!({}))).await;
        assert!(outcome.summarized);
        assert!(outcome.success);
        assert_eq!(outcome.output, "500 rows");
        assert_eq!(outcome.summary_usage, Some(Usage::new(40, 8)));
        assert!(!outcome.summary_estimated);
        assert_eq!(summarizer.seen.lock().unwrap()[0], ("big".to_string(), 2000, 50));
    }

    #[tokio::test]
    async fn failed_summary_falls_back_to_truncation() {
        let summarizer = RecordingSummarizer::replying(Err(ProviderError::Timeout("slow".into())));
        let invoker = ToolInvoker::new(registry())
            .with_summarization(100, 50)
            .with_summarizer(summarizer);

        let outcome = invoker.invoke(&call("c", "big", serde_json::json!({}))).await;
        assert!(outcome.summarized);
        assert_eq!(outcome.output.chars().count(), 50);
        assert!(outcome.summary_usage.is_none());
    }

    #[tokio::test]
    async fn bound_never_exceeds_threshold() {
        let summarizer = RecordingSummarizer::replying(Ok("x".repeat(300)));
        let invoker = ToolInvoker::new(registry())
            .with_summarization(10, 100)
            .with_summarizer(summarizer.clone());

        let outcome = invoker
            .invoke(&call("c", "echo", serde_json::json!({"text": "a".repeat(30)})))
            .await;
        assert!(outcome.summarized);
        assert!(outcome.output.chars().count() <= 10);
        assert_eq!(summarizer.seen.lock().unwrap()[0].2, 10);

        let plain = ToolInvoker::new(registry()).with_summarization(10, 100);
        let outcome = plain
            .invoke(&call("c", "echo", serde_json::json!({"text": "a".repeat(30)})))
            .await;
        assert!(outcome.output.chars().count() <= 10);
    }

    #[tokio::test]
    async fn small_output_is_untouched() {
        let invoker = ToolInvoker::new(registry()).with_summarization(100, 50);
        let outcome = invoker
            .invoke(&call("c", "echo", serde_json::json!({"a": 1})))
            .await;
        assert!(!outcome.summarized);
        assert_eq!(outcome.output, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn events_are_published() {
        let events = Arc::new(EventBus::default());
        let mut rx = events.subscribe();
        let invoker = ToolInvoker::new(registry()).with_events(events);
        invoker.invoke(&call("c", "echo", serde_json::json!({}))).await;

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event.as_ref(),
            DomainEvent::ToolExecuted { tool_name, success: true, .. } if tool_name == "echo"
        ));
    }
}
