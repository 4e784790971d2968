//! Executor: reasoning turns, tool execution and human-input resumption for
//! the active Task.
//!
//! Every completed reasoning turn appends exactly one Step. Tool results are
//! written back onto that Step's call records; nothing else on a Step changes
//! after it is appended.

use std::time::Duration;

use loopwright_core::Result;
use loopwright_core::message::{HUMAN_REPLY_KEY, Message};
use loopwright_core::state::{ExecutionState, GraphErrorKind, NodeId};
use loopwright_core::task::{Step, TaskStatus, ToolCallRecord};
use loopwright_core::tool::ToolCall;
use loopwright_memory::stm;
use loopwright_providers::Criticality;
use loopwright_tools::intents::{
    self, BLOCK_TASK, BlockTaskArgs, END_TASK, HumanInputArgs, REQUEST_HUMAN_INPUT, RESPOND,
    RespondArgs, ToolRole,
};
use loopwright_tools::{check_roles, normalize_arguments, role_of};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::{NodeContext, history_item, step_item};
use crate::flow::{Termination, Transition};
use crate::prompts;
use crate::stream_event::AgentStreamEvent;

const HUMAN_INPUT_REFUSED: &str = "Human input is not available in this mode; continue without it.";

/// Host-tool calls of the active Task's last Step that have not run yet.
pub fn pending_actions(state: &ExecutionState) -> Vec<ToolCall> {
    state
        .active_task()
        .and_then(|t| t.steps().last())
        .map(|step| {
            step.pending_calls()
                .filter(|c| role_of(&c.name) == ToolRole::Action)
                .map(|c| ToolCall {
                    id: c.tool_call_id.clone(),
                    name: c.name.clone(),
                    arguments: c.args.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// One reasoning turn against the active Task.
pub async fn reasoning(cx: &NodeContext<'_>, state: &mut ExecutionState) -> Result<Transition> {
    let runtime = cx.runtime;
    let node = NodeId::Reasoning;
    let config = &runtime.agent;

    let Some(task) = state.active_task() else {
        debug!(session_id = %cx.session_id, "No active task, ending executor cycle");
        state.enter(node);
        return Ok(Transition::Goto(NodeId::ExecutorEnd));
    };
    if state.iteration >= config.max_iterations {
        warn!(
            session_id = %cx.session_id,
            task_id = %task.id,
            iterations = state.iteration,
            "Iteration budget reached for task"
        );
        state.enter(node);
        return Ok(Transition::Goto(NodeId::ExecutorEnd));
    }

    let handle = runtime.gateway.select_tier(Criticality::Normal)?;
    let recent =
        stm::get_recent(&state.memories.stm, runtime.memory.retrieval_window).unwrap_or_default();
    let messages = prompts::reasoning(&runtime.profile, state, task, &recent, config.free_form);
    let mut tools = runtime.invoker.registry().definitions();
    tools.extend(intents::executor_control_tools(config.mode.allows_human_input()));

    let timeout = Duration::from_millis(config.execution_timeout_ms);
    let result = tokio::time::timeout(timeout, runtime.gateway.invoke(&handle, messages, &tools)).await;

    state.iteration += 1;
    let invocation = match result {
        Ok(Ok(invocation)) => invocation,
        Ok(Err(e)) => {
            state.retry += 1;
            cx.fail(state, GraphErrorKind::ExecutionError, format!("reasoning call failed: {e}"), node);
            state.enter(node);
            return Ok(after_reasoning(state, config.max_retries));
        }
        Err(_) => {
            state.retry += 1;
            cx.fail(
                state,
                GraphErrorKind::ExecutionError,
                format!("reasoning timed out after {}ms", config.execution_timeout_ms),
                node,
            );
            state.enter(node);
            return Ok(after_reasoning(state, config.max_retries));
        }
    };
    cx.record_usage(state, &invocation);

    let mut reply = invocation.message;
    for call in reply.tool_calls.iter_mut() {
        if call.id.is_empty() {
            call.id = format!("call_{}", Uuid::new_v4().simple());
        }
    }

    let free_form_answer = config.free_form && reply.tool_calls.is_empty();
    if !config.free_form {
        if let Err(reason) = check_roles(reply.tool_calls.iter().map(|c| c.name.as_str())) {
            state.retry += 1;
            cx.fail(state, GraphErrorKind::WrongNumberOfTools, reason, node);
            state.enter(node);
            return Ok(after_reasoning(state, config.max_retries));
        }
    }

    let thought = reply
        .tool_calls
        .iter()
        .find(|c| c.name == RESPOND)
        .and_then(|c| serde_json::from_value::<RespondArgs>(normalize_arguments(&c.arguments)).ok())
        .map(|args| args.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| reply.content.clone());

    let allow_human = config.mode.allows_human_input();
    let mut records = Vec::with_capacity(reply.tool_calls.len());
    let mut ended = free_form_answer;
    let mut blocked: Option<String> = None;
    let mut human_prompt: Option<String> = None;

    for call in &reply.tool_calls {
        let args = normalize_arguments(&call.arguments);
        let mut record = ToolCallRecord::new(&call.id, &call.name, args.clone());
        match call.name.as_str() {
            RESPOND => record.complete(thought.clone()),
            END_TASK => {
                ended = true;
                record.complete("Task submitted for validation.");
            }
            BLOCK_TASK => {
                let reason = serde_json::from_value::<BlockTaskArgs>(args)
                    .map(|a| a.reason)
                    .unwrap_or_default();
                record.complete(format!("Task blocked: {reason}"));
                blocked = Some(reason);
            }
            REQUEST_HUMAN_INPUT if allow_human => {
                let prompt = serde_json::from_value::<HumanInputArgs>(args)
                    .map(|a| a.prompt)
                    .unwrap_or_default();
                human_prompt = Some(prompt);
            }
            REQUEST_HUMAN_INPUT => record.complete(HUMAN_INPUT_REFUSED),
            _ if role_of(&call.name) == ToolRole::Control => {
                record.complete(format!("'{}' is not available while executing a task.", call.name));
            }
            _ => {}
        }
        records.push(record);
    }

    let step = Step::new(thought.clone(), records);
    let memories_id = state.memories.id.clone();
    let Some(task) = state.active_task_mut() else {
        state.enter(node);
        return Ok(Transition::Goto(NodeId::ExecutorEnd));
    };
    let task_id = task.id.clone();
    let step_id = step.id().to_string();
    let calls: Vec<(String, String, serde_json::Value)> = step
        .tool_calls()
        .iter()
        .map(|c| (c.tool_call_id.clone(), c.name.clone(), c.args.clone()))
        .collect();
    task.push_step(step);
    if ended && blocked.is_none() {
        task.status = TaskStatus::WaitingValidation;
    }
    let task_snapshot = ended.then(|| task.clone());

    debug!(
        session_id = %cx.session_id,
        task_id = %task_id,
        iteration = state.iteration,
        calls = calls.len(),
        "Reasoning step appended"
    );
    cx.stream.emit(AgentStreamEvent::Thought {
        task_id: task_id.clone(),
        content: thought.clone(),
    });
    for (id, name, input) in calls {
        cx.stream.emit(AgentStreamEvent::ToolCall { id, name, input });
    }
    if let Some(task) = &task_snapshot {
        cx.announce_task(task);
    }

    reply.content = thought;
    let item = step_item(&memories_id, &task_id, &step_id, &reply);
    state.messages.push(reply);
    cx.remember(state, vec![item]);

    state.mark_progress();
    if let Some(reason) = blocked {
        cx.fail(state, GraphErrorKind::BlockedTask, reason, node);
    }
    if let Some(prompt) = human_prompt {
        state.pending_human_prompt = Some(prompt);
    }

    state.enter(node);
    Ok(after_reasoning(state, config.max_retries))
}

/// Route after a reasoning turn.
pub fn after_reasoning(state: &ExecutionState, max_retries: u32) -> Transition {
    if state.retry > max_retries {
        return Transition::Finish(Termination::RetriesExhausted);
    }
    match state.error.as_ref().filter(|e| e.has_error) {
        Some(e) if e.kind == GraphErrorKind::BlockedTask => {
            return Transition::Finish(Termination::Blocked(e.message.clone()));
        }
        Some(e)
            if matches!(
                e.kind,
                GraphErrorKind::WrongNumberOfTools | GraphErrorKind::ExecutionError
            ) =>
        {
            return Transition::Goto(NodeId::Reasoning);
        }
        _ => {}
    }
    if !pending_actions(state).is_empty() {
        return Transition::Goto(NodeId::ToolExecution);
    }
    if state.pending_human_prompt.is_some() {
        return Transition::Goto(NodeId::HumanInput);
    }
    match state.active_task().map(|t| t.status) {
        Some(TaskStatus::Pending) => Transition::Goto(NodeId::Reasoning),
        _ => Transition::Goto(NodeId::ExecutorEnd),
    }
}

/// Run the last Step's pending host-tool calls as one batch.
pub async fn tool_execution(cx: &NodeContext<'_>, state: &mut ExecutionState) -> Result<Transition> {
    let runtime = cx.runtime;
    let node = NodeId::ToolExecution;
    let calls = pending_actions(state);

    let outcomes = if calls.is_empty() {
        Vec::new()
    } else {
        runtime.invoker.invoke_batch(&calls).await
    };

    let memories_id = state.memories.id.clone();
    let assistant = state
        .messages
        .iter()
        .rev()
        .find(|m| !m.tool_calls.is_empty())
        .cloned();
    let mut results = Vec::with_capacity(outcomes.len());
    let mut items = Vec::with_capacity(outcomes.len() + 1);
    let mut timed_out = Vec::new();

    if let Some(task) = state.active_task_mut() {
        let task_id = task.id.clone();
        if let Some(step) = task.last_step_mut() {
            let step_id = step.id().to_string();
            if let Some(assistant) = &assistant {
                items.push(step_item(&memories_id, &task_id, &step_id, assistant));
            }
            for outcome in &outcomes {
                if let Some(record) = step.call_mut(&outcome.call_id) {
                    record.complete(&outcome.output);
                }
                if outcome.timed_out {
                    timed_out.push(outcome.name.clone());
                }
                let message = Message::tool_result(&outcome.call_id, &outcome.output);
                items.push(step_item(&memories_id, &task_id, &step_id, &message));
                results.push(message);
            }
        }
    }

    for outcome in &outcomes {
        cx.record_summary_usage(state, outcome);
        cx.stream.emit(AgentStreamEvent::ToolResult {
            id: outcome.call_id.clone(),
            name: outcome.name.clone(),
            output: outcome.output.clone(),
            success: outcome.success,
            summarized: outcome.summarized,
        });
    }
    state.messages.extend(results);
    if !items.is_empty() {
        cx.remember_update(state, items);
    }

    if timed_out.is_empty() {
        state.mark_progress();
    } else {
        state.retry += 1;
        cx.fail(
            state,
            GraphErrorKind::TimeoutError,
            format!("tool calls timed out: {}", timed_out.join(", ")),
            node,
        );
    }

    state.enter(node);
    Ok(after_tools(cx, state))
}

fn after_tools(cx: &NodeContext<'_>, state: &ExecutionState) -> Transition {
    let config = &cx.runtime.agent;
    if state.retry > config.max_retries {
        return Transition::Finish(Termination::RetriesExhausted);
    }
    if state.pending_human_prompt.is_some() {
        return Transition::Goto(NodeId::HumanInput);
    }
    let Some(task) = state.active_task() else {
        return Transition::Goto(NodeId::ExecutorEnd);
    };
    if task.status != TaskStatus::Pending {
        return Transition::Goto(NodeId::ExecutorEnd);
    }
    if task.steps().len() >= config.max_steps as usize {
        warn!(
            session_id = %cx.session_id,
            task_id = %task.id,
            steps = task.steps().len(),
            "Step budget reached"
        );
        return Transition::Finish(Termination::StepBudget);
    }
    Transition::Goto(NodeId::Reasoning)
}

/// Apply a human reply to the suspended request and continue reasoning.
pub fn human_input(cx: &NodeContext<'_>, state: &mut ExecutionState, reply: &str) -> Transition {
    let message = Message::assistant(reply).with_metadata(HUMAN_REPLY_KEY, true);
    let item = history_item(&state.memories.id, &message);

    if let Some(step) = state.active_task_mut().and_then(|t| t.last_step_mut()) {
        let ids: Vec<String> = step
            .pending_calls()
            .filter(|c| c.name == REQUEST_HUMAN_INPUT)
            .map(|c| c.tool_call_id.clone())
            .collect();
        for id in ids {
            if let Some(record) = step.call_mut(&id) {
                record.complete(reply);
            }
        }
    }

    info!(session_id = %cx.session_id, chars = reply.chars().count(), "Human reply received");
    state.messages.push(message);
    cx.remember(state, vec![item]);
    state.pending_human_prompt = None;
    state.enter(NodeId::HumanInput);
    Transition::Goto(NodeId::Reasoning)
}

/// Close an executor cycle.
pub fn executor_end(cx: &NodeContext<'_>, state: &mut ExecutionState) -> Transition {
    state.enter(NodeId::ExecutorEnd);
    match state.active_task().map(|t| t.status) {
        Some(TaskStatus::WaitingValidation) => Transition::Goto(NodeId::Validator),
        status => {
            debug!(session_id = %cx.session_id, status = ?status, "Executor cycle ended");
            Transition::Route
        }
    }
}
