//! Token usage normalization and estimation.
//!
//! Providers report usage in different shapes. [`normalize_usage`] accepts
//! any of them; when a provider reports nothing, [`estimate_usage`] counts
//! roughly 4 characters per token so every call still has a usage figure.

use loopwright_core::message::Message;
use loopwright_core::provider::Usage;

/// Rough token count of a text (~4 chars per token, rounded up).
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

fn message_tokens(message: &Message) -> u32 {
    message
        .tool_calls
        .iter()
        .fold(estimate_tokens(&message.content), |acc, tc| {
            acc.saturating_add(estimate_tokens(&tc.name))
                .saturating_add(estimate_tokens(&tc.arguments))
        })
}

/// Estimate usage of one call from its prompt messages and reply.
pub fn estimate_usage(prompt: &[Message], reply: &Message) -> Usage {
    let prompt_tokens = prompt
        .iter()
        .fold(0u32, |acc, m| acc.saturating_add(message_tokens(m)));
    Usage::new(prompt_tokens, message_tokens(reply))
}

fn field(value: &serde_json::Value, keys: &[&str]) -> Option<u32> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(|v| v.as_u64()))
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
}

/// Read a usage object in OpenAI, Anthropic or Gemini shape.
///
/// - OpenAI: `prompt_tokens` / `completion_tokens` / `total_tokens`
/// - Anthropic: `input_tokens` / `output_tokens`
/// - Gemini: `promptTokenCount` / `candidatesTokenCount` / `totalTokenCount`,
///   optionally nested under `usageMetadata`
///
/// Returns `None` when no recognizable counter is present.
pub fn normalize_usage(raw: &serde_json::Value) -> Option<Usage> {
    let raw = raw.get("usageMetadata").unwrap_or(raw);

    let prompt = field(raw, &["prompt_tokens", "input_tokens", "promptTokenCount"]);
    let completion = field(
        raw,
        &["completion_tokens", "output_tokens", "candidatesTokenCount"],
    );
    let total = field(raw, &["total_tokens", "totalTokenCount"]);

    if prompt.is_none() && completion.is_none() && total.is_none() {
        return None;
    }

    let prompt = prompt.unwrap_or(0);
    let completion = completion
        .or_else(|| total.map(|t| t.saturating_sub(prompt)))
        .unwrap_or(0);
    let mut usage = Usage::new(prompt, completion);
    if let Some(t) = total {
        usage.total_tokens = usage.total_tokens.max(t);
    }
    Some(usage)
}

/// Usage of a call: the reported figure, or an estimate flagged as such.
pub fn resolve_usage(reported: Option<Usage>, prompt: &[Message], reply: &Message) -> (Usage, bool) {
    match reported {
        Some(u) if u.total_tokens > 0 || u.prompt_tokens > 0 || u.completion_tokens > 0 => {
            (u, false)
        }
        _ => (estimate_usage(prompt, reply), true),
    }
}
