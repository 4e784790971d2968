//! Planner: decides whether to plan, and produces or revises the plan.
//!
//! Planning is advisory. A failed plan call records EXECUTION_ERROR and the
//! cycle still moves on to the Task Manager.

use loopwright_core::Result;
use loopwright_core::memory::StmSlot;
use loopwright_core::state::{ExecutionMode, ExecutionState, GraphErrorKind, NodeId};
use loopwright_memory::stm;
use loopwright_providers::{Criticality, ModelTier};
use tracing::{info, warn};

use crate::context::NodeContext;
use crate::flow::Transition;
use crate::prompts::{self, PlanKind, PlanOutput, PlanningDecision};

/// Ask the cheap tier whether this objective needs a plan.
///
/// Any failure, including an unbound tier, resolves to REACTIVE. The graph
/// step advances either way.
pub async fn decide_planning(
    cx: &NodeContext<'_>,
    state: &mut ExecutionState,
) -> Result<Transition> {
    let runtime = cx.runtime;
    let messages = prompts::planning_decision(&runtime.profile, &state.objective);

    let decision = match runtime.gateway.handle(ModelTier::Cheap) {
        Ok(handle) => runtime
            .gateway
            .invoke_structured::<PlanningDecision>(
                &handle,
                messages,
                &prompts::planning_decision_schema(),
            )
            .await
            .map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    let mode = match decision {
        Ok(structured) => {
            cx.record_usage(state, &structured.invocation);
            let decision = structured.value;
            info!(
                session_id = %cx.session_id,
                planning_required = decision.planning_required,
                reason = %decision.reason,
                "Planning decision"
            );
            if decision.planning_required {
                ExecutionMode::Planning
            } else {
                ExecutionMode::Reactive
            }
        }
        Err(error) => {
            warn!(
                session_id = %cx.session_id,
                error = %error,
                "Planning decision failed, defaulting to reactive"
            );
            ExecutionMode::Reactive
        }
    };

    state.execution_mode = mode;
    state.enter(NodeId::DecidePlanning);
    Ok(Transition::Route)
}

pub async fn create_plan(cx: &NodeContext<'_>, state: &mut ExecutionState) -> Result<Transition> {
    run_planner(cx, state, PlanKind::Initial, NodeId::CreatePlan).await
}

pub async fn revise_plan(cx: &NodeContext<'_>, state: &mut ExecutionState) -> Result<Transition> {
    run_planner(cx, state, PlanKind::Revision, NodeId::RevisePlan).await
}

pub async fn evolve_plan(cx: &NodeContext<'_>, state: &mut ExecutionState) -> Result<Transition> {
    run_planner(cx, state, PlanKind::Evolution, NodeId::EvolvePlan).await
}

async fn run_planner(
    cx: &NodeContext<'_>,
    state: &mut ExecutionState,
    kind: PlanKind,
    node: NodeId,
) -> Result<Transition> {
    let runtime = cx.runtime;
    let handle = runtime.gateway.select_tier(Criticality::Normal)?;

    let recent: Vec<StmSlot> = match kind {
        PlanKind::Evolution => {
            stm::get_recent(&state.memories.stm, runtime.memory.retrieval_window)
                .unwrap_or_default()
        }
        _ => Vec::new(),
    };
    let tool_names: Vec<String> = runtime
        .invoker
        .registry()
        .definitions()
        .into_iter()
        .map(|d| d.name)
        .collect();
    let messages = prompts::plan(&runtime.profile, state, &tool_names, kind, &recent);

    let result = runtime
        .gateway
        .invoke_structured::<PlanOutput>(&handle, messages, &prompts::plan_schema())
        .await;

    match result {
        Ok(structured) => {
            cx.record_usage(state, &structured.invocation);
            let task = structured.value.into_task();
            info!(
                session_id = %cx.session_id,
                node = %node,
                plan = %task.summary(),
                "Plan produced"
            );
            cx.push_task(state, task);
            if kind == PlanKind::Initial {
                state.execution_mode = ExecutionMode::Planning;
            }
            state.mark_progress();
        }
        Err(e) => cx.fail(
            state,
            GraphErrorKind::ExecutionError,
            format!("planner call failed: {e}"),
            node,
        ),
    }

    state.enter(node);
    Ok(Transition::Goto(NodeId::TaskManager))
}
