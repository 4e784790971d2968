//! Sessions and the manager that owns them.
//!
//! A session is one objective's ExecutionState plus where its state machine
//! stopped. The manager keeps sessions by id so a host can start one,
//! answer its human-input requests, cancel it, and inspect it later.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use loopwright_core::memory::{LtmContext, Memories, StmContext};
use loopwright_core::state::{ExecutionState, NodeId};
use loopwright_core::{Error, Result};
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::flow::{RunOutcome, Transition};
use crate::orchestrator::Orchestrator;
use crate::runtime::AgentRuntime;
use crate::stream_event::{AgentStreamEvent, EventSink};

/// One objective being worked on.
pub struct Session {
    pub id: String,
    pub state: ExecutionState,
    pub created_at: DateTime<Utc>,
    /// What the driver does next when the session runs again.
    pub(crate) cursor: Transition,
    /// Set once the session reached its end; it never runs again.
    pub(crate) outcome: Option<RunOutcome>,
    pub(crate) sink: EventSink,
    stream: Option<mpsc::Receiver<AgentStreamEvent>>,
    pub(crate) trace_id: Option<String>,
}

impl Session {
    pub fn new(runtime: &AgentRuntime, objective: impl Into<String>) -> Self {
        let memories = Memories::new(
            StmContext::new(runtime.memory.stm_max_size),
            LtmContext::default(),
        );
        let (sink, stream) = EventSink::channel();
        Self {
            id: Uuid::new_v4().to_string(),
            state: ExecutionState::new(objective, runtime.agent.execution_mode, memories),
            created_at: Utc::now(),
            cursor: Transition::Goto(NodeId::Start),
            outcome: None,
            sink,
            stream: Some(stream),
            trace_id: None,
        }
    }

    /// The session's event stream. Available once.
    pub fn take_stream(&mut self) -> Option<ReceiverStream<AgentStreamEvent>> {
        self.stream.take().map(ReceiverStream::new)
    }

    pub fn is_waiting(&self) -> bool {
        self.outcome.is_none() && self.cursor == Transition::Goto(NodeId::HumanInput)
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            state: self.state.clone(),
            created_at: self.created_at,
            waiting_for_human: self.is_waiting(),
            outcome: self.outcome.clone(),
        }
    }
}

/// A point-in-time copy of a session for inspection.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: String,
    pub state: ExecutionState,
    pub created_at: DateTime<Utc>,
    pub waiting_for_human: bool,
    pub outcome: Option<RunOutcome>,
}

struct SessionEntry {
    session: Arc<Mutex<Session>>,
    cancel: CancellationToken,
}

/// Thread-safe store of sessions, keyed by id.
pub struct SessionManager {
    orchestrator: Orchestrator,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionManager {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self {
            orchestrator: Orchestrator::new(runtime),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        self.orchestrator.runtime()
    }

    /// Register a session without running it, so the host can take its
    /// stream first.
    pub async fn create(&self, objective: impl Into<String>) -> String {
        let session = Session::new(self.orchestrator.runtime(), objective);
        let id = session.id.clone();
        debug!(session_id = %id, "Session created");
        self.sessions.lock().await.insert(
            id.clone(),
            SessionEntry {
                session: Arc::new(Mutex::new(session)),
                cancel: CancellationToken::new(),
            },
        );
        id
    }

    async fn entry(&self, id: &str) -> Result<(Arc<Mutex<Session>>, CancellationToken)> {
        let sessions = self.sessions.lock().await;
        let entry = sessions
            .get(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        Ok((entry.session.clone(), entry.cancel.clone()))
    }

    /// Run a created session until it finishes or suspends.
    pub async fn run(&self, id: &str) -> Result<RunOutcome> {
        let (session, cancel) = self.entry(id).await?;
        let mut session = session.lock().await;
        self.orchestrator.drive(&mut session, &cancel, None).await
    }

    /// Create a session and run it.
    pub async fn start(&self, objective: impl Into<String>) -> Result<(String, RunOutcome)> {
        let id = self.create(objective).await;
        let outcome = self.run(&id).await?;
        Ok((id, outcome))
    }

    /// Answer a session's human-input request and continue it.
    pub async fn resume(&self, id: &str, reply: impl Into<String>) -> Result<RunOutcome> {
        let (session, cancel) = self.entry(id).await?;
        let mut session = session.lock().await;
        if !session.is_waiting() {
            return Err(Error::NotSuspended {
                session_id: id.to_string(),
                node: session.state.last_node.to_string(),
            });
        }
        info!(session_id = %id, "Resuming session");
        self.orchestrator
            .drive(&mut session, &cancel, Some(reply.into()))
            .await
    }

    /// Abort a session. A running session stops at its next cancellation
    /// point; an idle or suspended one is closed right away.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let (session, cancel) = self.entry(id).await?;
        cancel.cancel();
        if let Ok(mut session) = session.try_lock() {
            if session.outcome.is_none() {
                self.orchestrator.finish(&mut session, RunOutcome::Cancelled);
            }
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<SessionSnapshot> {
        let (session, _) = self.entry(id).await.ok()?;
        let session = session.lock().await;
        Some(session.snapshot())
    }

    /// The session's event stream; `None` if unknown or already taken.
    pub async fn take_stream(&self, id: &str) -> Option<ReceiverStream<AgentStreamEvent>> {
        let (session, _) = self.entry(id).await.ok()?;
        let mut session = session.lock().await;
        session.take_stream()
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.lock().await.remove(id).is_some()
    }

    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopwright_config::AgentRunConfig;
    use loopwright_core::error::ProviderError;
    use loopwright_core::provider::ProviderResponse;
    use loopwright_core::state::{AgentMode, ExecutionMode};
    use serde_json::json;
    use tokio_stream::StreamExt;

    use crate::test_helpers::*;

    fn manager(responses: Vec<std::result::Result<ProviderResponse, ProviderError>>) -> SessionManager {
        let runtime = runtime_with(responses).with_agent_config(AgentRunConfig {
            mode: AgentMode::Interactive,
            execution_mode: ExecutionMode::Reactive,
            ..Default::default()
        });
        SessionManager::new(Arc::new(runtime))
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let manager = manager(vec![]);
        assert!(matches!(manager.run("nope").await, Err(Error::SessionNotFound(_))));
        assert!(manager.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn resume_requires_suspension() {
        let manager = manager(vec![make_tool_call_response(
            vec![make_tool_call("end_task", json!({}))],
            "",
        )]);
        let (id, outcome) = manager.start("Say hi").await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert!(matches!(
            manager.resume(&id, "hello").await,
            Err(Error::NotSuspended { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_idle_session_closes_stream() {
        let manager = manager(vec![]);
        let id = manager.create("Summarize the quarterly report").await;
        let mut stream = manager.take_stream(&id).await.unwrap();
        assert!(manager.take_stream(&id).await.is_none());

        manager.cancel(&id).await.unwrap();
        let events: Vec<_> = (&mut stream).collect().await;
        assert!(matches!(
            events.last(),
            Some(AgentStreamEvent::Done { outcome, .. }) if outcome == "cancelled"
        ));

        assert_eq!(manager.run(&id).await.unwrap(), RunOutcome::Cancelled);
        let snapshot = manager.get(&id).await.unwrap();
        assert_eq!(snapshot.outcome, Some(RunOutcome::Cancelled));
        assert!(!snapshot.waiting_for_human);
    }
}
