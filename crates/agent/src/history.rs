//! InitHistory: seed the conversation with the objective and fold messages
//! STM has not seen yet into a new slot.

use std::collections::HashSet;

use loopwright_core::memory::MemorySource;
use loopwright_core::message::{Message, Role};
use loopwright_core::state::{ExecutionState, NodeId};
use tracing::debug;

use crate::context::{NodeContext, history_item};
use crate::flow::Transition;

/// Ids of messages already mirrored into STM.
fn remembered_ids(state: &ExecutionState) -> HashSet<String> {
    state
        .memories
        .stm
        .items
        .iter()
        .flatten()
        .flat_map(|slot| slot.items.iter())
        .filter_map(|item| match &item.source {
            MemorySource::History { message_id } => Some(message_id.clone()),
            MemorySource::Step { .. } => item
                .metadata
                .get("message_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
        .collect()
}

pub fn init_history(cx: &NodeContext<'_>, state: &mut ExecutionState) -> Transition {
    let has_objective = state
        .messages
        .first()
        .is_some_and(|m| m.role == Role::User && m.content == state.objective);
    if !has_objective {
        state.messages.insert(0, Message::user(&state.objective));
    }

    let newest = state
        .memories
        .stm
        .items
        .iter()
        .flatten()
        .map(|slot| slot.inserted_at)
        .max();
    let seen = remembered_ids(state);
    let memories_id = state.memories.id.clone();
    let items: Vec<_> = state
        .messages
        .iter()
        .filter(|m| m.role != Role::System && !seen.contains(&m.id))
        .filter(|m| newest.is_none_or(|at| m.timestamp > at))
        .map(|m| history_item(&memories_id, m))
        .collect();

    debug!(session_id = %cx.session_id, folded = items.len(), "History initialized");
    if !items.is_empty() {
        cx.remember(state, items);
    }

    state.enter(NodeId::InitHistory);
    Transition::Goto(NodeId::TaskManager)
}
