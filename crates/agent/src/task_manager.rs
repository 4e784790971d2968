//! Task Manager: one model decision that yields the next Task.
//!
//! The model is offered exactly `create_task`, `block_task` and `end_task`
//! and must call exactly one of them. A failed decision is recorded on the
//! state and the node is re-entered while the retry budget lasts.

use loopwright_core::Result;
use loopwright_core::message::{Message, MessageToolCall};
use loopwright_core::state::{ExecutionState, GraphErrorKind, NodeId};
use loopwright_core::task::Task;
use loopwright_providers::{Criticality, extract_json};
use loopwright_tools::intents::{
    self, BLOCK_TASK, BlockTaskArgs, CREATE_TASK, CreateTaskArgs, END_TASK, EndTaskArgs,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::context::NodeContext;
use crate::flow::{Termination, Transition};

/// The decision the model made.
#[derive(Debug, Clone)]
pub enum TaskDecision {
    Create(Task),
    Block(String),
    End(String),
}

/// Why a reply could not be turned into a decision.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionError {
    pub kind: GraphErrorKind,
    pub message: String,
}

impl DecisionError {
    fn new(kind: GraphErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Rebuild a tool call the model wrote as text instead of calling it.
///
/// Accepts `{"name": ..., "arguments": {...}}` and the `tool`/`args`
/// spellings, or a bare argument object for `create_task`.
fn recover_call(content: &str) -> Option<MessageToolCall> {
    let value: Value = serde_json::from_str(extract_json(content)?).ok()?;
    let object = value.as_object()?;

    let name = ["name", "tool", "function"]
        .iter()
        .find_map(|k| object.get(*k).and_then(Value::as_str));
    match name {
        Some(name) => {
            let args = ["arguments", "args", "parameters", "input"]
                .iter()
                .find_map(|k| object.get(*k))
                .cloned()
                .unwrap_or(Value::Object(Default::default()));
            let args = match args {
                Value::String(raw) => raw,
                other => other.to_string(),
            };
            Some(MessageToolCall::new("", name, args))
        }
        None if object.contains_key("directive") => {
            Some(MessageToolCall::new("", CREATE_TASK, value.to_string()))
        }
        None => None,
    }
}

/// Validate a Task Manager reply and turn it into a decision.
pub fn parse_decision(message: &Message) -> std::result::Result<TaskDecision, DecisionError> {
    let mut calls = message.tool_calls.clone();
    if calls.is_empty() {
        if let Some(call) = recover_call(&message.content) {
            debug!(tool = %call.name, "Recovered tool call from reply text");
            calls.push(call);
        }
    }

    let call = match calls.as_slice() {
        [call] => call,
        [] => {
            return Err(DecisionError::new(
                GraphErrorKind::WrongNumberOfTools,
                "expected one of create_task, block_task, end_task; got no tool call",
            ));
        }
        many => {
            let names: Vec<&str> = many.iter().map(|c| c.name.as_str()).collect();
            return Err(DecisionError::new(
                GraphErrorKind::WrongNumberOfTools,
                format!("expected exactly one decision, got {}: {}", many.len(), names.join(", ")),
            ));
        }
    };

    let args = loopwright_tools::normalize_arguments(&call.arguments);
    let invalid = |e: serde_json::Error| {
        DecisionError::new(
            GraphErrorKind::ExecutionError,
            format!("invalid {} arguments: {e}", call.name),
        )
    };

    match call.name.as_str() {
        CREATE_TASK => {
            let args: CreateTaskArgs = serde_json::from_value(args).map_err(invalid)?;
            if args.directive.trim().is_empty() {
                return Err(DecisionError::new(
                    GraphErrorKind::ExecutionError,
                    "create_task needs a non-empty directive",
                ));
            }
            Ok(TaskDecision::Create(Task::directive(args.directive, args.success_check)))
        }
        BLOCK_TASK => {
            let args: BlockTaskArgs = serde_json::from_value(args).map_err(invalid)?;
            Ok(TaskDecision::Block(args.reason))
        }
        END_TASK => {
            let args: EndTaskArgs = serde_json::from_value(args).map_err(invalid)?;
            Ok(TaskDecision::End(args.summary))
        }
        other => Err(DecisionError::new(
            GraphErrorKind::UnknownTool,
            format!("unknown task manager tool '{other}'"),
        )),
    }
}

pub async fn run(cx: &NodeContext<'_>, state: &mut ExecutionState) -> Result<Transition> {
    let runtime = cx.runtime;
    let handle = runtime.gateway.select_tier(Criticality::Normal)?;
    let messages = crate::prompts::task_manager(&runtime.profile, state);

    let result = runtime
        .gateway
        .invoke(&handle, messages, &intents::task_manager_tools())
        .await;

    let node = NodeId::TaskManager;
    let decision = match result {
        Ok(invocation) => {
            cx.record_usage(state, &invocation);
            parse_decision(&invocation.message)
        }
        Err(e) => Err(DecisionError::new(
            GraphErrorKind::ExecutionError,
            format!("task manager call failed: {e}"),
        )),
    };

    state.enter(node);
    match decision {
        Ok(TaskDecision::Create(task)) => {
            info!(
                session_id = %cx.session_id,
                task_id = %task.id,
                directive = %task.summary(),
                "Task created"
            );
            cx.push_task(state, task);
            state.mark_progress();
            Ok(Transition::Goto(NodeId::Reasoning))
        }
        Ok(TaskDecision::Block(reason)) => {
            cx.fail(state, GraphErrorKind::BlockedTask, reason.clone(), node);
            Ok(Transition::Finish(Termination::Blocked(reason)))
        }
        Ok(TaskDecision::End(summary)) => {
            info!(session_id = %cx.session_id, summary = %summary, "Objective ended by task manager");
            state.mark_progress();
            Ok(Transition::Finish(Termination::Completed))
        }
        Err(e) => {
            cx.fail(state, e.kind, e.message, node);
            if state.retry < runtime.agent.max_retries {
                state.retry += 1;
                Ok(Transition::Goto(NodeId::TaskManager))
            } else {
                Ok(Transition::Finish(Termination::RetriesExhausted))
            }
        }
    }
}
