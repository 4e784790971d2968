//! End-to-end session runs through the public API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use loopwright_agent::prompts::{EXTRACT_MEMORIES, PLANNING_DECISION, VALIDATION_VERDICT};
use loopwright_agent::{AgentStreamEvent, RunOutcome, SessionManager, Termination};
use loopwright_config::MemoryConfig;
use loopwright_core::state::{ExecutionMode, GraphErrorKind};
use loopwright_core::task::TaskStatus;
use loopwright_memory::NoopLtmStore;
use loopwright_telemetry::TelemetryEngine;
use serde_json::json;
use tokio_stream::StreamExt;

fn validated() -> Scripted {
    structured(VALIDATION_VERDICT, json!({"success": true, "reason": "answer given"}))
}

fn nothing_to_keep() -> Scripted {
    structured(EXTRACT_MEMORIES, json!({"episodic": [], "semantic": []}))
}

fn manager(harness: &Harness) -> SessionManager {
    SessionManager::new(Arc::new(harness.runtime()))
}

#[tokio::test]
async fn stm_ring_keeps_only_newest_slots() {
    let mut harness = Harness::new(vec![
        create_task("Read the report"),
        reply(vec![respond("reading"), call("echo", json!({"text": "Revenue up"}))], ""),
        reply(vec![respond("revenue is up"), call("end_task", json!({}))], ""),
        validated(),
        nothing_to_keep(),
        end_objective(),
    ]);
    harness.memory = MemoryConfig {
        stm_max_size: 2,
        ..Default::default()
    };
    let manager = manager(&harness);

    let (id, outcome) = manager.start("Summarize the quarterly report").await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    let stm = manager.get(&id).await.unwrap().state.memories.stm;
    assert_eq!(stm.size, 2);
    assert_eq!(stm.items.iter().flatten().count(), 2);
    assert!(stm.total_inserted > 2);
}

#[tokio::test]
async fn replies_without_respond_exhaust_retries() {
    let bare = || reply(vec![call("echo", json!({"text": "x"}))], "");
    let harness = Harness::new(vec![create_task("Read the report"), bare(), bare(), bare(), bare()]);
    let manager = manager(&harness);

    let (id, outcome) = manager.start("Summarize the quarterly report").await.unwrap();
    assert_eq!(outcome, RunOutcome::Terminated(Termination::RetriesExhausted));

    let state = manager.get(&id).await.unwrap().state;
    assert_eq!(state.error_kind(), Some(GraphErrorKind::WrongNumberOfTools));
    assert!(state.tasks[0].steps().is_empty());
}

#[tokio::test]
async fn blocked_objective_terminates_with_reason() {
    let harness = Harness::new(vec![reply(
        vec![call("block_task", json!({"reason": "unsafe request"}))],
        "",
    )]);
    let manager = manager(&harness);

    let (id, outcome) = manager.start("Delete every backup").await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Terminated(Termination::Blocked("unsafe request".into()))
    );
    let state = manager.get(&id).await.unwrap().state;
    assert_eq!(state.error_kind(), Some(GraphErrorKind::BlockedTask));
    assert!(state.tasks.is_empty());
}

#[tokio::test]
async fn failed_planning_decision_falls_back_to_reactive() {
    let mut harness = Harness::new(vec![
        unavailable(),
        create_task("Read the report"),
        reply(vec![respond("done"), call("end_task", json!({}))], ""),
        validated(),
        nothing_to_keep(),
        end_objective(),
    ]);
    harness.agent.execution_mode = ExecutionMode::Automatic;
    let manager = manager(&harness);

    let (id, outcome) = manager.start("Summarize the quarterly report").await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(
        manager.get(&id).await.unwrap().state.execution_mode,
        ExecutionMode::Reactive
    );

    let requests = harness.provider.requests();
    assert_eq!(requests[0].model, "model-cheap");
    assert_eq!(requests[0].tool_choice.as_deref(), Some(PLANNING_DECISION));
}

#[tokio::test]
async fn oversized_tool_output_is_summarized() {
    let mut harness = Harness::new(vec![
        create_task("Fetch the report"),
        reply(vec![respond("fetching"), call("fetch_report", json!({}))], ""),
        text("Revenue grew twelve percent."),
        reply(vec![respond("revenue grew"), call("end_task", json!({}))], ""),
        validated(),
        nothing_to_keep(),
        end_objective(),
    ]);
    harness.summarize = Some((200, 80));
    let manager = manager(&harness);

    let id = manager.create("Summarize the quarterly report").await;
    let stream = manager.take_stream(&id).await.unwrap();
    assert_eq!(manager.run(&id).await.unwrap(), RunOutcome::Completed);

    let events: Vec<_> = stream.collect().await;
    let result = events
        .iter()
        .find_map(|e| match e {
            AgentStreamEvent::ToolResult { name, output, success, summarized, .. }
                if name == "fetch_report" =>
            {
                Some((output.clone(), *success, *summarized))
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(result, ("Revenue grew twelve percent.".to_string(), true, true));

    let state = manager.get(&id).await.unwrap().state;
    let requests = harness.provider.requests();
    assert_eq!(requests[2].model, "model-cheap");
    assert_eq!(state.usage.calls as usize, requests.len());
    let step = &state.tasks[0].steps()[0];
    assert!(step.tool_calls().iter().all(|c| c.is_completed()));
}

#[tokio::test]
async fn facts_from_one_session_are_retrieved_in_the_next() {
    let mut harness = Harness::new(vec![
        create_task("Read the report"),
        reply(vec![respond("done"), call("end_task", json!({}))], ""),
        validated(),
        structured(
            EXTRACT_MEMORIES,
            json!({"episodic": [], "semantic": ["Quarterly revenue grew twelve percent"]}),
        ),
        end_objective(),
        create_task("Recall the revenue growth"),
        reply(vec![respond("twelve percent"), call("end_task", json!({}))], ""),
        validated(),
        nothing_to_keep(),
        end_objective(),
    ]);
    harness.memory = MemoryConfig {
        similarity_threshold: 0.0,
        ..Default::default()
    };
    let manager = manager(&harness);

    let (first, outcome) = manager.start("Summarize the quarterly report").await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(manager.get(&first).await.unwrap().state.memories.ltm.semantic_size, 1);

    let (second, outcome) = manager.start("How much did quarterly revenue grow?").await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    let requests = harness.provider.requests();
    for request in &requests[5..7] {
        assert!(
            request.messages[0]
                .content
                .contains("Quarterly revenue grew twelve percent"),
            "first cycle prompt lacks the recalled fact"
        );
    }
    let ltm = manager.get(&second).await.unwrap().state.memories.ltm;
    assert!(
        ltm.items
            .iter()
            .any(|f| f.content == "Quarterly revenue grew twelve percent")
    );
    assert_eq!(harness.provider.remaining(), 0);
}

#[tokio::test]
async fn human_input_suspends_and_resumes() {
    let harness = Harness::new(vec![
        create_task("Summarize one quarter"),
        reply(
            vec![
                respond("need a quarter"),
                call("request_human_input", json!({"prompt": "Which quarter?"})),
            ],
            "",
        ),
        reply(vec![respond("Q3 revenue grew"), call("end_task", json!({}))], ""),
        validated(),
        nothing_to_keep(),
        end_objective(),
    ]);
    let manager = manager(&harness);

    let id = manager.create("Summarize the quarterly report").await;
    let stream = manager.take_stream(&id).await.unwrap();

    let outcome = manager.run(&id).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::WaitingForHuman {
            prompt: "Which quarter?".into()
        }
    );
    let snapshot = manager.get(&id).await.unwrap();
    assert!(snapshot.waiting_for_human);
    assert!(snapshot.outcome.is_none());

    assert_eq!(manager.resume(&id, "Q3").await.unwrap(), RunOutcome::Completed);
    let state = manager.get(&id).await.unwrap().state;
    assert_eq!(state.tasks[0].status, TaskStatus::Completed);
    assert!(state.messages.iter().any(|m| m.content == "Q3"));

    let events: Vec<_> = stream.collect().await;
    assert!(events.contains(&AgentStreamEvent::HumanInput {
        prompt: "Which quarter?".into()
    }));
    assert!(matches!(
        events.last(),
        Some(AgentStreamEvent::Done { outcome, .. }) if outcome == "completed"
    ));
}

#[tokio::test]
async fn cancel_stops_a_running_session() {
    let mut harness = Harness::new(vec![
        create_task("Wait for the report"),
        reply(vec![respond("waiting"), call("stall", json!({}))], ""),
    ]);
    harness.call_timeout = Duration::from_secs(3600);
    let manager = Arc::new(manager(&harness));

    let id = manager.create("Summarize the quarterly report").await;
    let mut stream = manager.take_stream(&id).await.unwrap();
    let run = tokio::spawn({
        let manager = manager.clone();
        let id = id.clone();
        async move { manager.run(&id).await }
    });

    while let Some(event) = stream.next().await {
        if matches!(&event, AgentStreamEvent::ToolCall { name, .. } if name == "stall") {
            break;
        }
    }
    manager.cancel(&id).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(
        manager.get(&id).await.unwrap().outcome,
        Some(RunOutcome::Cancelled)
    );
    let rest: Vec<_> = stream.collect().await;
    assert!(matches!(
        rest.last(),
        Some(AgentStreamEvent::Done { outcome, .. }) if outcome == "cancelled"
    ));
}

#[tokio::test]
async fn token_budget_terminates_the_session() {
    let harness = Harness::new(vec![create_task("Read the report")]);
    let runtime = harness
        .runtime()
        .with_telemetry(Arc::new(TelemetryEngine::with_session_budget(20)));
    let manager = SessionManager::new(Arc::new(runtime));

    let (_, outcome) = manager.start("Summarize the quarterly report").await.unwrap();
    match outcome {
        RunOutcome::Terminated(Termination::TokenBudget(detail)) => {
            assert!(detail.contains("limit is 20"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn sessions_run_without_long_term_memory() {
    let harness = Harness::new(vec![
        create_task("Read the report"),
        reply(vec![respond("done"), call("end_task", json!({}))], ""),
        validated(),
        structured(EXTRACT_MEMORIES, json!({"episodic": ["read it"], "semantic": ["Revenue is up"]})),
        end_objective(),
    ]);
    let runtime = harness.runtime().with_ltm(Arc::new(NoopLtmStore));
    let manager = SessionManager::new(Arc::new(runtime));

    let (id, outcome) = manager.start("Summarize the quarterly report").await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    let state = manager.get(&id).await.unwrap().state;
    assert!(state.tasks[0].consolidated);
    assert_eq!(state.memories.ltm.semantic_size, 0);
    assert!(state.memories.ltm.items.is_empty());
}
