//! What a node sees besides the state: the shared runtime, its session's id
//! and event stream, plus the bookkeeping every node repeats.

use chrono::Utc;
use loopwright_core::event::DomainEvent;
use loopwright_core::memory::{MemoryItem, MemorySource};
use loopwright_core::message::Message;
use loopwright_core::state::{ExecutionState, GraphErrorKind, NodeId};
use loopwright_core::task::Task;
use loopwright_memory::stm;
use loopwright_providers::Invocation;
use loopwright_tools::InvocationOutcome;
use tracing::{debug, warn};

use crate::runtime::AgentRuntime;
use crate::stream_event::{AgentStreamEvent, EventSink};

pub struct NodeContext<'a> {
    pub runtime: &'a AgentRuntime,
    pub session_id: &'a str,
    pub stream: &'a EventSink,
}

impl<'a> NodeContext<'a> {
    pub fn new(runtime: &'a AgentRuntime, session_id: &'a str, stream: &'a EventSink) -> Self {
        Self {
            runtime,
            session_id,
            stream,
        }
    }

    /// Record a graph error on the state and report it.
    pub fn fail(
        &self,
        state: &mut ExecutionState,
        kind: GraphErrorKind,
        message: impl Into<String>,
        node: NodeId,
    ) {
        let message = message.into();
        warn!(
            session_id = %self.session_id,
            node = %node,
            kind = %kind,
            retry = state.retry,
            "{message}"
        );
        self.runtime.events.publish(DomainEvent::ErrorOccurred {
            context: node.to_string(),
            error_message: format!("{kind}: {message}"),
            timestamp: Utc::now(),
        });
        self.stream.emit(AgentStreamEvent::Error {
            kind: kind.to_string(),
            message: message.clone(),
        });
        state.set_error(kind, message, node);
    }

    pub fn record_usage(&self, state: &mut ExecutionState, invocation: &Invocation) {
        state.usage.record(&invocation.usage, invocation.estimated);
        debug!(
            session_id = %self.session_id,
            tier = %invocation.tier,
            tokens = invocation.usage.total_tokens,
            session_tokens = state.usage.total_tokens,
            "Model usage recorded"
        );
    }

    /// Charge a tool-output summary to the session.
    pub fn record_summary_usage(&self, state: &mut ExecutionState, outcome: &InvocationOutcome) {
        let Some(usage) = &outcome.summary_usage else {
            return;
        };
        state.usage.record(usage, outcome.summary_estimated);
        debug!(
            session_id = %self.session_id,
            tool = %outcome.name,
            tokens = usage.total_tokens,
            session_tokens = state.usage.total_tokens,
            "Summary usage recorded"
        );
    }

    /// Append a Task and announce it.
    pub fn push_task(&self, state: &mut ExecutionState, task: Task) {
        self.runtime.events.publish(DomainEvent::TaskCreated {
            session_id: self.session_id.to_string(),
            task_id: task.id.clone(),
            summary: task.summary(),
            timestamp: Utc::now(),
        });
        self.announce_task(&task);
        state.push_task(task);
    }

    pub fn announce_task(&self, task: &Task) {
        self.stream.emit(AgentStreamEvent::Task {
            task_id: task.id.clone(),
            summary: task.summary(),
            status: task.status.to_string(),
        });
    }

    /// Write a new STM slot. A corrupt ring is logged and left untouched.
    pub fn remember(&self, state: &mut ExecutionState, items: Vec<MemoryItem>) {
        let owner = state.memories.id.clone();
        match stm::add(&state.memories.stm, items, &owner) {
            Ok(next) => state.memories.stm = next,
            Err(e) => self.stm_failed(state, e.to_string()),
        }
    }

    /// Rewrite the newest STM slot, falling back to a new slot.
    pub fn remember_update(&self, state: &mut ExecutionState, items: Vec<MemoryItem>) {
        match stm::update_last(&state.memories.stm, items.clone()) {
            Ok(next) => state.memories.stm = next,
            Err(e) => {
                debug!(session_id = %self.session_id, error = %e, "No STM slot to update, adding");
                self.remember(state, items);
            }
        }
    }

    fn stm_failed(&self, state: &mut ExecutionState, error: String) {
        warn!(session_id = %self.session_id, error = %error, "STM write failed, keeping previous context");
        state.memories.last_error = Some(error);
    }
}

/// An STM item mirroring a conversation message.
pub fn history_item(memories_id: &str, message: &Message) -> MemoryItem {
    let mut item = MemoryItem::new(
        memories_id,
        MemorySource::History {
            message_id: message.id.clone(),
        },
        message.role,
        &message.content,
    );
    item.timestamp = message.timestamp;
    item
}

/// An STM item mirroring a message produced by a Step.
pub fn step_item(memories_id: &str, task_id: &str, step_id: &str, message: &Message) -> MemoryItem {
    let mut item = MemoryItem::new(
        memories_id,
        MemorySource::Step {
            task_id: task_id.to_string(),
            step_id: step_id.to_string(),
        },
        message.role,
        &message.content,
    );
    item.metadata
        .insert("message_id".into(), serde_json::Value::String(message.id.clone()));
    item
}
