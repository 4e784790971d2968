//! Memory subgraph: consolidate finished Tasks into LTM, refresh the LTM
//! view for the next cycle, and clean up when the subgraph cannot go on.
//!
//! LTM writes are best-effort. A failed extraction, embedding or upsert is
//! logged and kept on `memories.last_error`; the session carries on.

use chrono::Utc;
use loopwright_config::AgentRunConfig;
use loopwright_core::Result;
use loopwright_core::event::DomainEvent;
use loopwright_core::memory::{FactKind, LtmQuery, MemoryFact, MemoryScope, StmSlot, UpsertReport};
use loopwright_core::state::{ExecutionState, GraphErrorKind, NodeId};
use loopwright_core::task::{Task, TaskStatus};
use loopwright_memory::stm;
use loopwright_providers::Criticality;
use tracing::{debug, info, warn};

use crate::context::NodeContext;
use crate::flow::{Termination, Transition};
use crate::prompts::{self, ExtractedMemories};

/// Where the memory subgraph goes next: `next`, unless the graph budget is
/// spent or memory is corrupt.
pub fn route_memory(state: &ExecutionState, config: &AgentRunConfig, next: Transition) -> Transition {
    if state.current_graph_step >= config.max_graph_steps
        || state.error_kind() == Some(GraphErrorKind::InvalidMemoryState)
    {
        return Transition::Goto(NodeId::MemoryCleanup);
    }
    next
}

fn pending_consolidation(state: &ExecutionState) -> Vec<Task> {
    state
        .tasks
        .iter()
        .filter(|t| t.is_directive() && t.status == TaskStatus::Completed && !t.consolidated)
        .cloned()
        .collect()
}

pub async fn consolidate(cx: &NodeContext<'_>, state: &mut ExecutionState) -> Result<Transition> {
    let runtime = cx.runtime;
    let node = NodeId::ConsolidateMemory;

    if let Err(e) = stm::validate(&state.memories.stm) {
        cx.fail(state, GraphErrorKind::InvalidMemoryState, e.to_string(), node);
        state.enter(node);
        return Ok(route_memory(state, &runtime.agent, Transition::Goto(NodeId::RetrieveMemory)));
    }

    let tasks = pending_consolidation(state);
    if tasks.is_empty() {
        debug!(session_id = %cx.session_id, "Nothing to consolidate");
        state.enter(node);
        return Ok(route_memory(state, &runtime.agent, Transition::Goto(NodeId::RetrieveMemory)));
    }

    let handle = runtime.gateway.select_tier(Criticality::Low)?;
    let scope = MemoryScope::new(&runtime.profile.user_id, Some(cx.session_id.to_string()));
    let mut errors = Vec::new();
    let mut extracted = Vec::new();
    let mut usages = Vec::new();

    for task in &tasks {
        let messages = prompts::consolidation(task, runtime.memory.preview_chars);
        match runtime
            .gateway
            .invoke_structured::<ExtractedMemories>(&handle, messages, &prompts::memories_schema())
            .await
        {
            Ok(structured) => {
                usages.push(structured.invocation);
                extracted.push((task.id.clone(), structured.value));
            }
            Err(e) => errors.push(format!("extraction for task {} failed: {e}", task.id)),
        }
    }

    let mut episodic = Vec::new();
    let mut semantic = Vec::new();
    for (_, memories) in &extracted {
        episodic.extend(
            memories
                .episodic
                .iter()
                .filter(|c| !c.trim().is_empty())
                .map(|c| MemoryFact::new(FactKind::Episodic, c.trim(), scope.clone())),
        );
        semantic.extend(
            memories
                .semantic
                .iter()
                .filter(|c| !c.trim().is_empty())
                .map(|c| MemoryFact::new(FactKind::Semantic, c.trim(), scope.clone())),
        );
    }

    let report = if episodic.is_empty() && semantic.is_empty() {
        UpsertReport {
            success: true,
            ..Default::default()
        }
    } else {
        match embed_facts(cx, episodic, semantic).await {
            Ok((episodic, semantic)) => runtime.ltm.upsert(episodic, semantic).await,
            Err(e) => UpsertReport::failed(e),
        }
    };
    if let Some(error) = &report.error {
        errors.push(format!("LTM upsert failed: {error}"));
    }

    let episodic_size = runtime.ltm.count(Some(FactKind::Episodic)).await.ok();
    let semantic_size = runtime.ltm.count(Some(FactKind::Semantic)).await.ok();

    for invocation in &usages {
        cx.record_usage(state, invocation);
    }
    if report.success {
        for (task_id, _) in &extracted {
            if let Some(task) = state.tasks.iter_mut().find(|t| &t.id == task_id) {
                task.consolidated = true;
            }
        }
    }
    let ltm = &mut state.memories.ltm;
    ltm.merge_size = report.merged;
    if let Some(size) = episodic_size {
        ltm.episodic_size = size;
    }
    if let Some(size) = semantic_size {
        ltm.semantic_size = size;
    }
    state.memories.last_error = if errors.is_empty() {
        None
    } else {
        let joined = errors.join("; ");
        warn!(session_id = %cx.session_id, error = %joined, "Memory consolidation incomplete");
        Some(joined)
    };

    runtime.events.publish(DomainEvent::MemoryUpserted {
        inserted: report.inserted,
        merged: report.merged,
        success: report.success,
        timestamp: Utc::now(),
    });
    info!(
        session_id = %cx.session_id,
        store = runtime.ltm.name(),
        tasks = tasks.len(),
        inserted = report.inserted,
        merged = report.merged,
        "Memory consolidated"
    );

    state.enter(node);
    Ok(route_memory(state, &runtime.agent, Transition::Goto(NodeId::RetrieveMemory)))
}

async fn embed_facts(
    cx: &NodeContext<'_>,
    episodic: Vec<MemoryFact>,
    semantic: Vec<MemoryFact>,
) -> std::result::Result<(Vec<MemoryFact>, Vec<MemoryFact>), String> {
    let texts: Vec<String> = episodic
        .iter()
        .chain(semantic.iter())
        .map(|f| f.content.clone())
        .collect();
    let vectors = cx
        .runtime
        .embedder
        .embed(&texts)
        .await
        .map_err(|e| e.to_string())?;
    if vectors.len() != texts.len() {
        return Err(format!(
            "embedder returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        ));
    }

    let split = episodic.len();
    let mut vectors = vectors.into_iter();
    let episodic = episodic
        .into_iter()
        .zip(vectors.by_ref().take(split))
        .map(|(f, v)| f.with_embedding(v))
        .collect();
    let semantic = semantic
        .into_iter()
        .zip(vectors)
        .map(|(f, v)| f.with_embedding(v))
        .collect();
    Ok((episodic, semantic))
}

/// Seed the LTM view from the objective before the first planning cycle.
///
/// Leaves the graph position untouched so routing still sees a fresh
/// session.
pub async fn prime(cx: &NodeContext<'_>, state: &mut ExecutionState) -> Result<Transition> {
    refresh_ltm(cx, state, Vec::new()).await;
    Ok(Transition::Route)
}

/// Load the LTM facts most similar to recent STM into `memories.ltm`.
///
/// Running it twice over an unchanged state yields the same view.
pub async fn retrieve(cx: &NodeContext<'_>, state: &mut ExecutionState) -> Result<Transition> {
    let runtime = cx.runtime;
    let node = NodeId::RetrieveMemory;

    match stm::get_recent(&state.memories.stm, runtime.memory.retrieval_window) {
        Ok(recent) => refresh_ltm(cx, state, recent).await,
        Err(e) => cx.fail(state, GraphErrorKind::InvalidMemoryState, e.to_string(), node),
    }

    state.enter(node);
    Ok(route_memory(state, &runtime.agent, Transition::Route))
}

/// Search LTM with `recent` STM as the query, or the objective when STM is
/// empty. A failed search keeps the previous view.
async fn refresh_ltm(cx: &NodeContext<'_>, state: &mut ExecutionState, recent: Vec<StmSlot>) {
    let runtime = cx.runtime;
    let config = &runtime.memory;
    let context = stm::format_context(&recent);
    let query_text = if context.trim().is_empty() {
        state.objective.clone()
    } else {
        context
    };

    let found = match runtime.embedder.embed(&[query_text]).await {
        Ok(mut vectors) => match vectors.pop() {
            Some(embedding) => runtime
                .ltm
                .search(LtmQuery {
                    embedding,
                    scope: MemoryScope::new(&runtime.profile.user_id, None),
                    top_k: config.ltm_top_k,
                    min_score: config.similarity_threshold,
                })
                .await
                .map_err(|e| e.to_string()),
            None => Err("embedder returned no vector".to_string()),
        },
        Err(e) => Err(e.to_string()),
    };

    match found {
        Ok(items) => {
            debug!(session_id = %cx.session_id, facts = items.len(), "LTM view refreshed");
            state.memories.ltm.items = items;
        }
        Err(error) => {
            warn!(session_id = %cx.session_id, error = %error, "LTM retrieval failed, keeping previous view");
            state.memories.last_error = Some(error);
        }
    }
}

/// Reset loop counters and hand the session to its end node.
pub fn cleanup(cx: &NodeContext<'_>, state: &mut ExecutionState) -> Transition {
    let termination = match state.error.as_ref() {
        Some(e) if e.has_error && e.kind == GraphErrorKind::InvalidMemoryState => {
            Termination::InvalidMemoryState(e.message.clone())
        }
        _ => Termination::GraphBudget,
    };
    warn!(session_id = %cx.session_id, reason = %termination, "Memory cleanup");
    state.current_task_index = 0;
    state.retry = 0;
    state.memories.is_processing = false;
    state.enter(NodeId::MemoryCleanup);
    Transition::Finish(termination)
}
