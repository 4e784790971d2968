//! The loopwright agent: a single agent driven through bounded
//! plan → act → remember cycles.
//!
//! Each session runs a state machine over [`ExecutionState`]:
//!
//! 1. The **planning router** picks the next cycle-level component
//! 2. The **planner** optionally produces or revises a plan
//! 3. The **task manager** turns the objective into the next Task
//! 4. The **executor** alternates model reasoning with tool calls until the
//!    Task is submitted, blocked, or out of budget
//! 5. The **validator** checks a submitted Task against its success check
//! 6. The **memory subgraph** consolidates finished work into long-term
//!    memory and refreshes what the next cycle sees
//!
//! Sessions can suspend for a human reply, be resumed or cancelled, and
//! stream their progress as [`AgentStreamEvent`]s.
//!
//! [`ExecutionState`]: loopwright_core::state::ExecutionState

pub mod consolidator;
pub mod context;
pub mod executor;
pub mod flow;
pub mod history;
pub mod orchestrator;
pub mod planner;
pub mod prompts;
pub mod router;
pub mod runtime;
pub mod session;
pub mod stream_event;
pub mod task_manager;
pub mod validator;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use flow::{RunOutcome, Termination, Transition};
pub use orchestrator::Orchestrator;
pub use router::{PlanningRoute, route_planning};
pub use runtime::AgentRuntime;
pub use session::{Session, SessionManager, SessionSnapshot};
pub use stream_event::{AgentStreamEvent, EventSink};
