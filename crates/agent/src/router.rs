//! Planning router: picks the next cycle-level component.
//!
//! Pure: it reads `last_node`, `execution_mode`, `retry`, the graph step and
//! the last message's validation flag, and never mutates the state. Rule 6's
//! retry increment is applied by the driver when it follows `RevisePlan`.

use loopwright_config::AgentRunConfig;
use loopwright_core::state::{AgentMode, ExecutionMode, ExecutionState, NodeId};
use tracing::warn;

use crate::flow::Termination;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanningRoute {
    InitHistory,
    DecidePlanning,
    CreatePlan,
    RevisePlan,
    EvolvePlan,
    End(Termination),
}

impl PlanningRoute {
    /// The node this route runs, if it is not terminal.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::InitHistory => Some(NodeId::InitHistory),
            Self::DecidePlanning => Some(NodeId::DecidePlanning),
            Self::CreatePlan => Some(NodeId::CreatePlan),
            Self::RevisePlan => Some(NodeId::RevisePlan),
            Self::EvolvePlan => Some(NodeId::EvolvePlan),
            Self::End(_) => None,
        }
    }
}

/// Evaluate the routing rules in order; the first match wins.
pub fn route_planning(state: &ExecutionState, config: &AgentRunConfig) -> PlanningRoute {
    if state.current_graph_step >= config.max_graph_steps {
        warn!(
            graph_step = state.current_graph_step,
            max = config.max_graph_steps,
            "Graph step budget exhausted"
        );
        return PlanningRoute::End(Termination::GraphBudget);
    }

    let interactive = config.mode == AgentMode::Interactive;
    if interactive {
        match state.execution_mode {
            ExecutionMode::Reactive => return PlanningRoute::InitHistory,
            ExecutionMode::Automatic => return PlanningRoute::DecidePlanning,
            ExecutionMode::Planning => return PlanningRoute::CreatePlan,
        }
    }
    if state.last_node == NodeId::Start {
        return PlanningRoute::CreatePlan;
    }

    if state.last_node == NodeId::Validator {
        match state.last_validation() {
            Some(true) => return PlanningRoute::End(Termination::Completed),
            Some(false) if state.retry >= config.max_retries => {
                warn!(retry = state.retry, max = config.max_retries, "Plan revisions exhausted");
                return PlanningRoute::End(Termination::RetriesExhausted);
            }
            Some(false) => return PlanningRoute::RevisePlan,
            None => {}
        }
    }

    if matches!(config.mode, AgentMode::Autonomous | AgentMode::Hybrid)
        && (state.last_node.is_executor() || state.last_node.is_memory())
    {
        return PlanningRoute::EvolvePlan;
    }

    warn!(last_node = %state.last_node, mode = %config.mode, "No routing rule matched, ending");
    PlanningRoute::End(Termination::Unroutable)
}
