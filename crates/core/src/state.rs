//! The shared execution state of one agent session.
//!
//! `ExecutionState` is exclusively owned by a session's control loop and
//! handed by `&mut` to whichever node runs next. Nodes record failures as a
//! [`GraphError`] on the state instead of returning Rust errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::Memories;
use crate::message::Message;
use crate::provider::Usage;
use crate::task::Task;

/// Whether the session plans before acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// No planning; go straight to task creation.
    #[default]
    Reactive,
    /// Plan-driven execution.
    Planning,
    /// Ask the model whether to plan.
    Automatic,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reactive => write!(f, "REACTIVE"),
            Self::Planning => write!(f, "PLANNING"),
            Self::Automatic => write!(f, "AUTOMATIC"),
        }
    }
}

/// How much the agent is allowed to run on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    #[default]
    Interactive,
    Autonomous,
    Hybrid,
}

impl AgentMode {
    /// Whether the model may ask a human for input in this mode.
    pub fn allows_human_input(&self) -> bool {
        matches!(self, Self::Interactive | Self::Hybrid)
    }
}

impl std::str::FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interactive" => Ok(Self::Interactive),
            "autonomous" => Ok(Self::Autonomous),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown agent mode '{other}'")),
        }
    }
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interactive => write!(f, "interactive"),
            Self::Autonomous => write!(f, "autonomous"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Every node of the orchestration graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    #[default]
    Start,
    DecidePlanning,
    InitHistory,
    CreatePlan,
    RevisePlan,
    EvolvePlan,
    TaskManager,
    Reasoning,
    ToolExecution,
    HumanInput,
    ExecutorEnd,
    Validator,
    ConsolidateMemory,
    RetrieveMemory,
    MemoryCleanup,
    End,
}

impl NodeId {
    /// Nodes of the Executor subgraph.
    pub fn is_executor(&self) -> bool {
        matches!(
            self,
            Self::Reasoning | Self::ToolExecution | Self::HumanInput | Self::ExecutorEnd
        )
    }

    /// Nodes of the Memory subgraph.
    pub fn is_memory(&self) -> bool {
        matches!(
            self,
            Self::ConsolidateMemory | Self::RetrieveMemory | Self::MemoryCleanup
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::DecidePlanning => "decide_planning",
            Self::InitHistory => "init_history",
            Self::CreatePlan => "create_plan",
            Self::RevisePlan => "revise_plan",
            Self::EvolvePlan => "evolve_plan",
            Self::TaskManager => "task_manager",
            Self::Reasoning => "reasoning",
            Self::ToolExecution => "tool_execution",
            Self::HumanInput => "human_input",
            Self::ExecutorEnd => "executor_end",
            Self::Validator => "validator",
            Self::ConsolidateMemory => "consolidate_memory",
            Self::RetrieveMemory => "retrieve_memory",
            Self::MemoryCleanup => "memory_cleanup",
            Self::End => "end",
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of node-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphErrorKind {
    WrongNumberOfTools,
    BlockedTask,
    ExecutionError,
    TimeoutError,
    UnknownTool,
    InvalidMemoryState,
}

impl std::fmt::Display for GraphErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::WrongNumberOfTools => "WRONG_NUMBER_OF_TOOLS",
            Self::BlockedTask => "BLOCKED_TASK",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::UnknownTool => "UNKNOWN_TOOL",
            Self::InvalidMemoryState => "INVALID_MEMORY_STATE",
        };
        f.write_str(s)
    }
}

/// A failure recorded on the state by the node that hit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphError {
    pub kind: GraphErrorKind,
    pub message: String,
    pub has_error: bool,
    pub source: NodeId,
    pub timestamp: DateTime<Utc>,
}

impl GraphError {
    pub fn new(kind: GraphErrorKind, message: impl Into<String>, source: NodeId) -> Self {
        Self {
            kind,
            message: message.into(),
            has_error: true,
            source,
            timestamp: Utc::now(),
        }
    }
}

/// Token usage accumulated by one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub calls: u32,
    /// Calls whose usage was estimated because the provider reported none.
    pub estimated_calls: u32,
}

impl UsageSnapshot {
    pub fn record(&mut self, usage: &Usage, estimated: bool) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total_tokens);
        self.calls += 1;
        if estimated {
            self.estimated_calls += 1;
        }
    }
}

/// The single mutable record a session's nodes operate on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub objective: String,
    pub messages: Vec<Message>,
    pub tasks: Vec<Task>,
    pub memories: Memories,
    pub last_node: NodeId,
    /// Monotonic; bounded by the configured graph-step budget.
    pub current_graph_step: u32,
    pub current_task_index: usize,
    pub retry: u32,
    pub error: Option<GraphError>,
    pub execution_mode: ExecutionMode,
    /// Reasoning turns spent on the active Task.
    pub iteration: u32,
    /// Prompt of an outstanding human-input request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_human_prompt: Option<String>,
    #[serde(default)]
    pub usage: UsageSnapshot,
}

impl ExecutionState {
    pub fn new(objective: impl Into<String>, execution_mode: ExecutionMode, memories: Memories) -> Self {
        Self {
            objective: objective.into(),
            messages: Vec::new(),
            tasks: Vec::new(),
            memories,
            last_node: NodeId::Start,
            current_graph_step: 0,
            current_task_index: 0,
            retry: 0,
            error: None,
            execution_mode,
            iteration: 0,
            pending_human_prompt: None,
            usage: UsageSnapshot::default(),
        }
    }

    /// Record that `node` ran. Every node calls this exactly once per visit.
    pub fn enter(&mut self, node: NodeId) {
        self.last_node = node;
        self.current_graph_step = self.current_graph_step.saturating_add(1);
    }

    /// Append a Task; directive Tasks become the active Task.
    pub fn push_task(&mut self, task: Task) {
        let is_directive = task.is_directive();
        self.tasks.push(task);
        if is_directive {
            self.current_task_index = self.tasks.len() - 1;
            self.iteration = 0;
        }
    }

    pub fn active_task(&self) -> Option<&Task> {
        self.tasks
            .get(self.current_task_index)
            .filter(|t| t.is_directive())
    }

    pub fn active_task_mut(&mut self) -> Option<&mut Task> {
        self.tasks
            .get_mut(self.current_task_index)
            .filter(|t| t.is_directive())
    }

    /// Validation outcome carried by the last message, if any.
    pub fn last_validation(&self) -> Option<bool> {
        self.messages.last().and_then(|m| m.validation())
    }

    pub fn set_error(&mut self, kind: GraphErrorKind, message: impl Into<String>, source: NodeId) {
        self.error = Some(GraphError::new(kind, message, source));
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn error_kind(&self) -> Option<GraphErrorKind> {
        self.error.as_ref().filter(|e| e.has_error).map(|e| e.kind)
    }

    /// A state-advancing success. Recovering from a recorded error also
    /// resets the retry budget; a clean step leaves it alone.
    pub fn mark_progress(&mut self) {
        if self.error.take().is_some() {
            self.retry = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{LtmContext, StmContext};
    use crate::message::VALIDATION_KEY;

    fn state() -> ExecutionState {
        let memories = Memories::new(StmContext::new(4), LtmContext::default());
        ExecutionState::new("objective", ExecutionMode::Reactive, memories)
    }

    #[test]
    fn enter_advances_graph_step() {
        let mut s = state();
        assert_eq!(s.last_node, NodeId::Start);
        s.enter(NodeId::TaskManager);
        s.enter(NodeId::Reasoning);
        assert_eq!(s.current_graph_step, 2);
        assert_eq!(s.last_node, NodeId::Reasoning);
    }

    #[test]
    fn directive_task_becomes_active() {
        let mut s = state();
        s.push_task(Task::plan("p", "r", vec![], "", ""));
        assert!(s.active_task().is_none());
        s.push_task(Task::directive("d", "c"));
        assert_eq!(s.current_task_index, 1);
        assert_eq!(s.active_task().unwrap().summary(), "d");
    }

    #[test]
    fn progress_clears_error_and_retry() {
        let mut s = state();
        s.retry = 2;
        s.set_error(GraphErrorKind::ExecutionError, "boom", NodeId::Reasoning);
        assert_eq!(s.error_kind(), Some(GraphErrorKind::ExecutionError));
        s.mark_progress();
        assert!(s.error.is_none());
        assert_eq!(s.retry, 0);

        s.retry = 1;
        s.mark_progress();
        assert_eq!(s.retry, 1);
    }

    #[test]
    fn last_validation_reads_metadata() {
        let mut s = state();
        assert!(s.last_validation().is_none());
        s.messages
            .push(Message::assistant("nope").with_metadata(VALIDATION_KEY, false));
        assert_eq!(s.last_validation(), Some(false));
    }

    #[test]
    fn node_sets() {
        assert!(NodeId::ToolExecution.is_executor());
        assert!(NodeId::RetrieveMemory.is_memory());
        assert!(!NodeId::Validator.is_executor());
        assert!(!NodeId::Validator.is_memory());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("Hybrid".parse::<AgentMode>().unwrap(), AgentMode::Hybrid);
        assert!("sometimes".parse::<AgentMode>().is_err());
        assert!(!AgentMode::Autonomous.allows_human_input());
        assert_eq!(
            serde_json::to_value(ExecutionMode::Automatic).unwrap(),
            serde_json::json!("AUTOMATIC")
        );
    }

    #[test]
    fn usage_snapshot_counts_estimates() {
        let mut snap = UsageSnapshot::default();
        snap.record(&Usage::new(10, 5), false);
        snap.record(&Usage::new(1, 1), true);
        assert_eq!(snap.total_tokens, 17);
        assert_eq!(snap.calls, 2);
        assert_eq!(snap.estimated_calls, 1);
    }
}
