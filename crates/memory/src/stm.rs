//! Short-term memory ring operations.
//!
//! Pure functions over [`StmContext`]: each takes the current context and
//! returns a new one, or a [`MemoryError`] if the context is corrupt. Callers
//! keep the previous context on failure so an in-flight Task is never
//! aborted by a bad STM write.

use chrono::Utc;
use loopwright_core::error::MemoryError;
use loopwright_core::memory::{MemoryItem, StmContext, StmSlot};

/// Check the ring invariants.
pub fn validate(ctx: &StmContext) -> Result<(), MemoryError> {
    if ctx.max_size == 0 {
        return Err(MemoryError::InvalidState("STM max_size is 0".into()));
    }
    if ctx.items.len() != ctx.max_size {
        return Err(MemoryError::InvalidState(format!(
            "STM has {} slots for max_size {}",
            ctx.items.len(),
            ctx.max_size
        )));
    }
    if ctx.head >= ctx.max_size {
        return Err(MemoryError::InvalidState(format!(
            "STM head {} out of range",
            ctx.head
        )));
    }
    let expected = ctx.total_inserted.min(ctx.max_size as u64) as usize;
    if ctx.size != expected {
        return Err(MemoryError::InvalidState(format!(
            "STM size {} does not match min(total_inserted, max_size) = {expected}",
            ctx.size
        )));
    }
    Ok(())
}

/// Write one batch at `head`, evicting the oldest slot when full.
pub fn add(
    ctx: &StmContext,
    items: Vec<MemoryItem>,
    owner_id: &str,
) -> Result<StmContext, MemoryError> {
    validate(ctx)?;
    if items.is_empty() {
        return Err(MemoryError::InvalidState("cannot add an empty STM batch".into()));
    }

    let mut next = ctx.clone();
    next.total_inserted += 1;
    next.items[ctx.head] = Some(StmSlot {
        items,
        owner_id: owner_id.to_string(),
        sequence: next.total_inserted,
        inserted_at: Utc::now(),
    });
    next.head = (ctx.head + 1) % ctx.max_size;
    next.size = (ctx.size + 1).min(ctx.max_size);
    Ok(next)
}

/// Replace the content of the most recently written slot.
pub fn update_last(ctx: &StmContext, items: Vec<MemoryItem>) -> Result<StmContext, MemoryError> {
    validate(ctx)?;
    let last = (ctx.head + ctx.max_size - 1) % ctx.max_size;

    let mut next = ctx.clone();
    match next.items[last].as_mut() {
        Some(slot) => {
            slot.items = items;
            Ok(next)
        }
        None => Err(MemoryError::InvalidState(
            "no STM slot has been written yet".into(),
        )),
    }
}

/// The last `n` occupied slots, oldest of the window first.
pub fn get_recent(ctx: &StmContext, n: usize) -> Result<Vec<StmSlot>, MemoryError> {
    validate(ctx)?;
    let take = n.min(ctx.size);
    let mut out: Vec<StmSlot> = (1..=take)
        .filter_map(|back| {
            let idx = (ctx.head + ctx.max_size - back) % ctx.max_size;
            ctx.items[idx].clone()
        })
        .collect();
    out.reverse();
    Ok(out)
}

/// Render slots as prompt context, one line per item.
pub fn format_context(slots: &[StmSlot]) -> String {
    slots
        .iter()
        .flat_map(|slot| slot.items.iter())
        .map(|item| format!("[{}] {}", item.role, item.content))
        .collect::<Vec<_>>()
        .join("\n")
}
