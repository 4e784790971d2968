//! Session streaming events.
//!
//! Every session owns one bounded channel. Nodes push events while they run
//! and the host drains them as a `ReceiverStream`, taken once per session.

use loopwright_core::state::UsageSnapshot;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Capacity of a session's event channel.
pub const STREAM_CAPACITY: usize = 128;

/// Events emitted by a session while it runs.
///
/// - `node`: a state-machine node finished
/// - `thought`: the model's reasoning for one step
/// - `tool_call`: an action tool is about to run
/// - `tool_result`: an action tool finished
/// - `human_input`: the session suspended for a human reply
/// - `task`: a Task was created or changed status
/// - `error`: a node recorded a graph error
/// - `done`: the session stopped for good
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    Node { node: String, graph_step: u32 },

    Thought { task_id: String, content: String },

    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
        summarized: bool,
    },

    HumanInput { prompt: String },

    Task {
        task_id: String,
        summary: String,
        status: String,
    },

    Error { kind: String, message: String },

    Done {
        session_id: String,
        outcome: String,
        usage: UsageSnapshot,
        graph_steps: u32,
    },
}

impl AgentStreamEvent {
    /// SSE-style event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Node { .. } => "node",
            Self::Thought { .. } => "thought",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::HumanInput { .. } => "human_input",
            Self::Task { .. } => "task",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }
}

/// Sending half of a session's event channel.
///
/// Never blocks the session: when the host is not draining and the channel
/// is full, events are dropped.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<AgentStreamEvent>>,
}

impl EventSink {
    /// A sink and the receiver the host drains.
    pub fn channel() -> (Self, mpsc::Receiver<AgentStreamEvent>) {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: AgentStreamEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!(event = event.event_type(), "Stream full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Drop the sender so the stream ends once drained.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_is_tagged() {
        let event = AgentStreamEvent::ToolCall {
            id: "call_1".into(),
            name: "lookup".into(),
            input: serde_json::json!({"id": 7}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""name":"lookup""#));

        let back: AgentStreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn done_carries_usage() {
        let event = AgentStreamEvent::Done {
            session_id: "s1".into(),
            outcome: "completed".into(),
            usage: UsageSnapshot {
                total_tokens: 30,
                calls: 2,
                ..Default::default()
            },
            graph_steps: 9,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["usage"]["total_tokens"], 30);
        assert_eq!(event.event_type(), "done");
    }

    #[test]
    fn event_type_names() {
        assert_eq!(
            AgentStreamEvent::HumanInput { prompt: "?".into() }.event_type(),
            "human_input"
        );
        assert_eq!(
            AgentStreamEvent::Node {
                node: "reasoning".into(),
                graph_step: 1
            }
            .event_type(),
            "node"
        );
        assert_eq!(
            AgentStreamEvent::Error {
                kind: "TIMEOUT_ERROR".into(),
                message: "slow".into()
            }
            .event_type(),
            "error"
        );
    }

    #[tokio::test]
    async fn sink_drops_when_full_and_never_blocks() {
        let (sink, mut rx) = EventSink::channel();
        for i in 0..(STREAM_CAPACITY + 10) {
            sink.emit(AgentStreamEvent::HumanInput {
                prompt: i.to_string(),
            });
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, STREAM_CAPACITY);
    }

    #[tokio::test]
    async fn closed_sink_ends_stream() {
        let (mut sink, mut rx) = EventSink::channel();
        sink.emit(AgentStreamEvent::HumanInput { prompt: "a".into() });
        sink.close();
        sink.emit(AgentStreamEvent::HumanInput { prompt: "b".into() });
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn disabled_sink_is_silent() {
        EventSink::disabled().emit(AgentStreamEvent::HumanInput { prompt: "x".into() });
    }
}
