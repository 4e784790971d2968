//! Orchestrator: drives one session's state machine node by node until it
//! finishes, suspends for a human, or is cancelled.
//!
//! Nodes apply their state changes after their last await, so dropping a node
//! future at a cancellation point never leaves a partial Step behind.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use loopwright_core::Result;
use loopwright_core::event::DomainEvent;
use loopwright_core::state::{ExecutionState, NodeId};
use loopwright_telemetry::{Span, SpanKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::consolidator;
use crate::context::NodeContext;
use crate::executor;
use crate::flow::{RunOutcome, Termination, Transition};
use crate::history;
use crate::planner;
use crate::router::{PlanningRoute, route_planning};
use crate::runtime::AgentRuntime;
use crate::session::Session;
use crate::stream_event::AgentStreamEvent;
use crate::task_manager;
use crate::validator;

async fn run_node(
    cx: &NodeContext<'_>,
    node: NodeId,
    state: &mut ExecutionState,
    reply: Option<String>,
) -> Result<Transition> {
    match node {
        NodeId::Start => consolidator::prime(cx, state).await,
        NodeId::DecidePlanning => planner::decide_planning(cx, state).await,
        NodeId::InitHistory => Ok(history::init_history(cx, state)),
        NodeId::CreatePlan => planner::create_plan(cx, state).await,
        NodeId::RevisePlan => planner::revise_plan(cx, state).await,
        NodeId::EvolvePlan => planner::evolve_plan(cx, state).await,
        NodeId::TaskManager => task_manager::run(cx, state).await,
        NodeId::Reasoning => executor::reasoning(cx, state).await,
        NodeId::ToolExecution => executor::tool_execution(cx, state).await,
        NodeId::HumanInput => match reply {
            Some(reply) => Ok(executor::human_input(cx, state, &reply)),
            None => Ok(Transition::Suspend {
                prompt: state.pending_human_prompt.clone().unwrap_or_default(),
            }),
        },
        NodeId::ExecutorEnd => Ok(executor::executor_end(cx, state)),
        NodeId::Validator => validator::run(cx, state).await,
        NodeId::ConsolidateMemory => consolidator::consolidate(cx, state).await,
        NodeId::RetrieveMemory => consolidator::retrieve(cx, state).await,
        NodeId::MemoryCleanup => Ok(consolidator::cleanup(cx, state)),
        NodeId::End => Ok(Transition::Finish(Termination::Completed)),
    }
}

/// Drives sessions against a shared runtime.
#[derive(Clone)]
pub struct Orchestrator {
    runtime: Arc<AgentRuntime>,
}

impl Orchestrator {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    /// Run `session` from where it stopped.
    ///
    /// `reply` answers an outstanding human-input request and is ignored
    /// otherwise. Returns `Err` only for misconfiguration, such as a tier no
    /// provider can serve.
    pub async fn drive(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
        reply: Option<String>,
    ) -> Result<RunOutcome> {
        if let Some(outcome) = &session.outcome {
            return Ok(outcome.clone());
        }
        let runtime = &*self.runtime;
        let config = &runtime.agent;

        if session.trace_id.is_none() {
            session.trace_id = runtime.telemetry.as_ref().map(|t| t.start_trace(&session.id));
            runtime.events.publish(DomainEvent::SessionStarted {
                session_id: session.id.clone(),
                objective_preview: session.state.objective.chars().take(100).collect(),
                timestamp: Utc::now(),
            });
            info!(
                session_id = %session.id,
                mode = %config.mode,
                execution_mode = ?session.state.execution_mode,
                "Session started"
            );
        }

        let mut next = std::mem::replace(&mut session.cursor, Transition::Route);
        let mut reply = reply;

        loop {
            let node = match next {
                Transition::Finish(termination) => {
                    return Ok(self.finish(session, RunOutcome::from_termination(termination)));
                }
                Transition::Suspend { prompt } => {
                    session.cursor = Transition::Goto(NodeId::HumanInput);
                    session.sink.emit(AgentStreamEvent::HumanInput {
                        prompt: prompt.clone(),
                    });
                    info!(session_id = %session.id, prompt = %prompt, "Waiting for human input");
                    return Ok(RunOutcome::WaitingForHuman { prompt });
                }
                Transition::Route => match route_planning(&session.state, config) {
                    PlanningRoute::End(termination) => {
                        next = Transition::Finish(termination);
                        continue;
                    }
                    route => {
                        if route == PlanningRoute::RevisePlan {
                            session.state.retry += 1;
                        }
                        debug!(session_id = %session.id, route = ?route, "Planning route");
                        match route.node() {
                            Some(node) => node,
                            None => {
                                next = Transition::Finish(Termination::Unroutable);
                                continue;
                            }
                        }
                    }
                },
                Transition::Goto(node) => node,
            };

            if session.state.current_graph_step >= config.max_graph_steps
                && node != NodeId::MemoryCleanup
            {
                warn!(
                    session_id = %session.id,
                    graph_step = session.state.current_graph_step,
                    node = %node,
                    "Graph step budget exhausted"
                );
                next = Transition::Finish(Termination::GraphBudget);
                continue;
            }

            let human_reply = if node == NodeId::HumanInput {
                reply.take()
            } else {
                None
            };
            let mut span = Span::new(SpanKind::Node, node.as_str());
            let started = Instant::now();

            let cx = NodeContext::new(runtime, &session.id, &session.sink);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = run_node(&cx, node, &mut session.state, human_reply) => Some(result),
            };

            let transition = match result {
                None => {
                    info!(session_id = %session.id, node = %node, "Session cancelled");
                    session.cursor = Transition::Goto(node);
                    return Ok(self.finish(session, RunOutcome::Cancelled));
                }
                Some(Err(e)) => {
                    error!(session_id = %session.id, node = %node, error = %e, "Node failed");
                    runtime.events.publish(DomainEvent::ErrorOccurred {
                        context: node.to_string(),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    session.cursor = Transition::Goto(node);
                    return Err(e);
                }
                Some(Ok(Transition::Suspend { prompt })) => {
                    next = Transition::Suspend { prompt };
                    continue;
                }
                Some(Ok(transition)) => transition,
            };

            let duration_ms = started.elapsed().as_millis() as u64;
            let state = &session.state;
            runtime.events.publish(DomainEvent::NodeCompleted {
                session_id: session.id.clone(),
                node: node.to_string(),
                graph_step: state.current_graph_step,
                duration_ms,
                timestamp: Utc::now(),
            });
            session.sink.emit(AgentStreamEvent::Node {
                node: node.to_string(),
                graph_step: state.current_graph_step,
            });
            debug!(
                session_id = %session.id,
                node = %node,
                graph_step = state.current_graph_step,
                retry = state.retry,
                duration_ms,
                "Node completed"
            );

            next = transition;
            if let Some(telemetry) = &runtime.telemetry {
                span.end(state.error.is_none());
                if let Some(trace_id) = &session.trace_id {
                    telemetry.record_span(trace_id, span);
                }
                if let Err(e) = telemetry.check_budget(state.usage.total_tokens) {
                    if !matches!(next, Transition::Finish(_)) {
                        warn!(session_id = %session.id, error = %e, "Stopping session");
                        next = Transition::Finish(Termination::TokenBudget(e.to_string()));
                    }
                }
            }
        }
    }

    /// Close a session for good.
    pub(crate) fn finish(&self, session: &mut Session, outcome: RunOutcome) -> RunOutcome {
        let runtime = &*self.runtime;
        session.state.last_node = NodeId::End;
        session.state.pending_human_prompt = None;

        let usage = session.state.usage;
        match &outcome {
            RunOutcome::Completed | RunOutcome::Cancelled => info!(
                session_id = %session.id,
                outcome = %outcome,
                graph_steps = session.state.current_graph_step,
                total_tokens = usage.total_tokens,
                "Session ended"
            ),
            _ => warn!(
                session_id = %session.id,
                outcome = %outcome,
                graph_steps = session.state.current_graph_step,
                total_tokens = usage.total_tokens,
                "Session ended"
            ),
        }
        runtime.events.publish(DomainEvent::SessionEnded {
            session_id: session.id.clone(),
            outcome: outcome.to_string(),
            total_tokens: usage.total_tokens,
            timestamp: Utc::now(),
        });
        session.sink.emit(AgentStreamEvent::Done {
            session_id: session.id.clone(),
            outcome: outcome.to_string(),
            usage,
            graph_steps: session.state.current_graph_step,
        });
        session.sink.close();
        if let (Some(telemetry), Some(trace_id)) = (&runtime.telemetry, &session.trace_id) {
            telemetry.end_trace(trace_id);
        }

        session.outcome = Some(outcome.clone());
        outcome
    }
}
