//! Tool invocation for loopwright.
//!
//! Concrete tools come from the host and are registered in a
//! `loopwright_core::ToolRegistry`. This crate runs them with timeouts and
//! bounded output, and defines the control intents (`create_task`,
//! `block_task`, `end_task`, `respond`, `request_human_input`) the agent
//! answers to.

pub mod intents;
pub mod invoker;

pub use intents::{ToolRole, check_roles, role_of};
pub use invoker::{InvocationOutcome, ToolInvoker, normalize_arguments, truncate_chars};
