//! What a node asks the driver to do next, and why a session stopped.

use loopwright_core::state::NodeId;
use serde::{Deserialize, Serialize};

/// The result of running one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Run this node next.
    Goto(NodeId),
    /// Hand control back to the planning router.
    Route,
    /// Yield to the host until it supplies a human reply.
    Suspend { prompt: String },
    /// Stop the session.
    Finish(Termination),
}

/// Why a session reached its end node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Termination {
    /// The Task Manager ended the objective, or a validated Task closed it.
    Completed,
    /// The model declined the Task.
    Blocked(String),
    GraphBudget,
    RetriesExhausted,
    StepBudget,
    TokenBudget(String),
    /// The memory subgraph found a corrupt state and handed back control.
    InvalidMemoryState(String),
    /// No routing rule matched.
    Unroutable,
}

impl Termination {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Blocked(reason) => write!(f, "blocked: {reason}"),
            Self::GraphBudget => write!(f, "graph step budget exhausted"),
            Self::RetriesExhausted => write!(f, "retries exhausted"),
            Self::StepBudget => write!(f, "step budget exhausted"),
            Self::TokenBudget(detail) => write!(f, "token budget exhausted: {detail}"),
            Self::InvalidMemoryState(detail) => write!(f, "invalid memory state: {detail}"),
            Self::Unroutable => write!(f, "unroutable state"),
        }
    }
}

/// How a `start` or `resume` call returned control to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    WaitingForHuman { prompt: String },
    Cancelled,
    Terminated(Termination),
}

impl RunOutcome {
    pub fn from_termination(termination: Termination) -> Self {
        if termination.is_success() {
            Self::Completed
        } else {
            Self::Terminated(termination)
        }
    }

    /// Whether the session can still be resumed.
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::WaitingForHuman { .. })
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::WaitingForHuman { .. } => write!(f, "waiting_for_human"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Terminated(t) => write!(f, "terminated ({t})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_from_termination() {
        assert_eq!(RunOutcome::from_termination(Termination::Completed), RunOutcome::Completed);
        let outcome = RunOutcome::from_termination(Termination::Blocked("unsafe request".into()));
        assert_eq!(outcome.to_string(), "terminated (blocked: unsafe request)");
        assert!(!outcome.is_suspended());
    }

    #[test]
    fn termination_serializes_tagged() {
        let json = serde_json::to_value(Termination::TokenBudget("over".into())).unwrap();
        assert_eq!(json["reason"], "token_budget");
        assert_eq!(json["detail"], "over");
    }
}
