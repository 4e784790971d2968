//! Validator: judges a Task submitted with `end_task` against its success
//! check, using the smart tier.

use loopwright_core::Result;
use loopwright_core::message::{Message, VALIDATION_KEY};
use loopwright_core::state::{ExecutionState, NodeId};
use loopwright_core::task::TaskStatus;
use loopwright_providers::Criticality;
use tracing::{info, warn};

use crate::context::NodeContext;
use crate::flow::Transition;
use crate::prompts::{self, ValidationVerdict};

pub async fn run(cx: &NodeContext<'_>, state: &mut ExecutionState) -> Result<Transition> {
    let runtime = cx.runtime;
    let node = NodeId::Validator;

    let Some(task) = state
        .active_task()
        .filter(|t| t.status == TaskStatus::WaitingValidation)
    else {
        state.enter(node);
        return Ok(Transition::Route);
    };

    let handle = runtime.gateway.select_tier(Criticality::High)?;
    let messages = prompts::validation(&runtime.profile, task, runtime.memory.preview_chars);
    let result = runtime
        .gateway
        .invoke_structured::<ValidationVerdict>(&handle, messages, &prompts::validation_schema())
        .await;

    let verdict = match result {
        Ok(structured) => {
            cx.record_usage(state, &structured.invocation);
            structured.value
        }
        Err(e) => {
            warn!(session_id = %cx.session_id, error = %e, "Validation call failed, treating as not met");
            ValidationVerdict {
                success: false,
                reason: format!("validation unavailable: {e}"),
            }
        }
    };

    let Some(task) = state.active_task_mut() else {
        state.enter(node);
        return Ok(Transition::Route);
    };
    task.status = if verdict.success {
        TaskStatus::Completed
    } else {
        TaskStatus::Pending
    };
    let task = task.clone();
    info!(
        session_id = %cx.session_id,
        task_id = %task.id,
        success = verdict.success,
        reason = %verdict.reason,
        "Task validated"
    );
    cx.announce_task(&task);

    let content = if verdict.reason.is_empty() {
        if verdict.success {
            "Task met its success check.".to_string()
        } else {
            "Task did not meet its success check.".to_string()
        }
    } else {
        verdict.reason
    };
    state
        .messages
        .push(Message::assistant(content).with_metadata(VALIDATION_KEY, verdict.success));
    if verdict.success {
        state.mark_progress();
    }

    state.enter(node);
    if verdict.success && runtime.memory.consolidate {
        Ok(Transition::Goto(NodeId::ConsolidateMemory))
    } else {
        Ok(Transition::Route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopwright_config::MemoryConfig;
    use loopwright_core::state::ExecutionMode;
    use loopwright_core::task::Task;
    use serde_json::json;

    use crate::stream_event::EventSink;
    use crate::test_helpers::*;

    fn submitted() -> ExecutionState {
        let mut state = state_with(ExecutionMode::Reactive, 4);
        state.push_task(Task::directive("Fetch the report", "report text present"));
        state.active_task_mut().unwrap().status = TaskStatus::WaitingValidation;
        state
    }

    #[tokio::test]
    async fn success_completes_and_consolidates() {
        let (runtime, provider) = scripted(vec![make_structured(
            prompts::VALIDATION_VERDICT,
            json!({"success": true, "reason": "report fetched"}),
        )]);
        let sink = EventSink::disabled();
        let cx = NodeContext::new(&runtime, "s1", &sink);
        let mut state = submitted();

        let next = run(&cx, &mut state).await.unwrap();
        assert_eq!(next, Transition::Goto(NodeId::ConsolidateMemory));
        assert_eq!(state.active_task().unwrap().status, TaskStatus::Completed);
        assert_eq!(state.last_validation(), Some(true));
        assert_eq!(provider.requests()[0].model, "mock-smart");
    }

    #[tokio::test]
    async fn success_without_consolidation_routes() {
        let runtime = runtime_with(vec![make_structured(
            prompts::VALIDATION_VERDICT,
            json!({"success": true}),
        )])
        .with_memory_config(MemoryConfig {
            consolidate: false,
            ..Default::default()
        });
        let sink = EventSink::disabled();
        let cx = NodeContext::new(&runtime, "s1", &sink);
        let mut state = submitted();

        assert_eq!(run(&cx, &mut state).await.unwrap(), Transition::Route);
        assert_eq!(state.messages.last().unwrap().content, "Task met its success check.");
    }

    #[tokio::test]
    async fn failure_reopens_task() {
        let runtime = runtime_with(vec![make_structured(
            prompts::VALIDATION_VERDICT,
            json!({"success": false, "reason": "summary missing figures"}),
        )]);
        let sink = EventSink::disabled();
        let cx = NodeContext::new(&runtime, "s1", &sink);
        let mut state = submitted();

        assert_eq!(run(&cx, &mut state).await.unwrap(), Transition::Route);
        assert_eq!(state.active_task().unwrap().status, TaskStatus::Pending);
        assert_eq!(state.last_validation(), Some(false));
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn model_failure_is_a_failed_validation() {
        let runtime = runtime_with(vec![failure()]);
        let sink = EventSink::disabled();
        let cx = NodeContext::new(&runtime, "s1", &sink);
        let mut state = submitted();

        assert_eq!(run(&cx, &mut state).await.unwrap(), Transition::Route);
        assert_eq!(state.last_validation(), Some(false));
        assert_eq!(state.last_node, NodeId::Validator);
    }
}
