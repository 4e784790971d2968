//! Task, Step and tool-call records.
//!
//! A Task is created by the Task Manager or Planner and mutated only by the
//! Executor: Steps are appended, never removed, and only a tool call's
//! status/result may change after its Step was appended.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a Task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    WaitingValidation,
    Completed,
    Blocked,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::WaitingValidation => write!(f, "waiting_validation"),
            Self::Completed => write!(f, "completed"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// What a Task asks the agent to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskBody {
    /// A planning-style thought bundle produced by the Planner.
    Plan {
        text: String,
        reasoning: String,
        plan: Vec<String>,
        criticism: String,
        speak: String,
    },
    /// A concrete directive produced by the Task Manager.
    Directive {
        directive: String,
        success_check: String,
    },
}

/// A unit of agent work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub body: TaskBody,
    #[serde(default)]
    steps: Vec<Step>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Set once the Memory Consolidator has written this Task to LTM.
    #[serde(default)]
    pub consolidated: bool,
}

impl Task {
    pub fn directive(directive: impl Into<String>, success_check: impl Into<String>) -> Self {
        Self::with_body(TaskBody::Directive {
            directive: directive.into(),
            success_check: success_check.into(),
        })
    }

    pub fn plan(
        text: impl Into<String>,
        reasoning: impl Into<String>,
        plan: Vec<String>,
        criticism: impl Into<String>,
        speak: impl Into<String>,
    ) -> Self {
        Self::with_body(TaskBody::Plan {
            text: text.into(),
            reasoning: reasoning.into(),
            plan,
            criticism: criticism.into(),
            speak: speak.into(),
        })
    }

    fn with_body(body: TaskBody) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            body,
            steps: Vec::new(),
            status: TaskStatus::Pending,
            consolidated: false,
        }
    }

    /// Whether this Task carries an executable directive.
    pub fn is_directive(&self) -> bool {
        matches!(self.body, TaskBody::Directive { .. })
    }

    /// One-line description used in prompts and logs.
    pub fn summary(&self) -> String {
        match &self.body {
            TaskBody::Directive { directive, .. } => directive.clone(),
            TaskBody::Plan { text, .. } => text.clone(),
        }
    }

    /// The success criterion, if the Task has one.
    pub fn success_check(&self) -> Option<&str> {
        match &self.body {
            TaskBody::Directive { success_check, .. } => Some(success_check),
            TaskBody::Plan { .. } => None,
        }
    }

    /// Steps in append order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn push_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// The newest Step; only its tool calls can be completed through it.
    pub fn last_step_mut(&mut self) -> Option<&mut Step> {
        self.steps.last_mut()
    }
}

/// One reasoning turn plus the tool calls it requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    id: String,
    thought: String,
    #[serde(default)]
    tool_calls: Vec<ToolCallRecord>,
}

impl Step {
    pub fn new(thought: impl Into<String>, tool_calls: Vec<ToolCallRecord>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thought: thought.into(),
            tool_calls,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn thought(&self) -> &str {
        &self.thought
    }

    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        &self.tool_calls
    }

    /// Calls that still await execution.
    pub fn pending_calls(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.tool_calls
            .iter()
            .filter(|c| c.status == ToolCallStatus::Pending)
    }

    pub fn call_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolCallRecord> {
        self.tool_calls
            .iter_mut()
            .find(|c| c.tool_call_id == tool_call_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    #[default]
    Pending,
    Completed,
}

/// A tool call recorded on a Step.
///
/// `result` is only ever set together with `status = Completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_call_id: String,
    pub name: String,
    pub args: serde_json::Value,
    status: ToolCallStatus,
    result: Option<String>,
}

impl ToolCallRecord {
    pub fn new(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            args,
            status: ToolCallStatus::Pending,
            result: None,
        }
    }

    pub fn status(&self) -> ToolCallStatus {
        self.status
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    /// Mark the call completed with its (possibly summarized) output.
    pub fn complete(&mut self, result: impl Into<String>) {
        self.status = ToolCallStatus::Completed;
        self.result = Some(result.into());
    }

    pub fn is_completed(&self) -> bool {
        self.status == ToolCallStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_pending_with_unique_id() {
        let a = Task::directive("Fetch the report", "Report text is present");
        let b = Task::directive("Fetch the report", "Report text is present");
        assert_eq!(a.status, TaskStatus::Pending);
        assert_ne!(a.id, b.id);
        assert!(a.is_directive());
        assert_eq!(a.success_check(), Some("Report text is present"));
    }

    #[test]
    fn plan_task_has_no_success_check() {
        let t = Task::plan("Outline", "because", vec!["a".into(), "b".into()], "", "ok");
        assert!(!t.is_directive());
        assert!(t.success_check().is_none());
        assert_eq!(t.summary(), "Outline");
    }

    #[test]
    fn tool_call_result_only_when_completed() {
        let mut call = ToolCallRecord::new("call_1", "lookup", serde_json::json!({}));
        assert_eq!(call.status(), ToolCallStatus::Pending);
        assert!(call.result().is_none());

        call.complete("42");
        assert_eq!(call.status(), ToolCallStatus::Completed);
        assert_eq!(call.result(), Some("42"));
    }

    #[test]
    fn step_lookup_and_pending_filter() {
        let mut step = Step::new(
            "thinking",
            vec![
                ToolCallRecord::new("a", "respond", serde_json::json!({})),
                ToolCallRecord::new("b", "lookup", serde_json::json!({"id": 1})),
            ],
        );
        step.call_mut("a").unwrap().complete("done");
        let pending: Vec<_> = step.pending_calls().map(|c| c.tool_call_id.as_str()).collect();
        assert_eq!(pending, vec!["b"]);
    }

    #[test]
    fn steps_only_grow() {
        let mut task = Task::directive("Fetch the report", "report text present");
        task.push_step(Step::new(
            "first",
            vec![ToolCallRecord::new("a", "lookup", serde_json::json!({}))],
        ));
        let first_id = task.steps()[0].id().to_string();

        task.last_step_mut().unwrap().call_mut("a").unwrap().complete("found");
        task.push_step(Step::new("second", Vec::new()));

        assert_eq!(task.steps().len(), 2);
        assert_eq!(task.steps()[0].id(), first_id);
        assert_eq!(task.steps()[0].thought(), "first");
        assert_eq!(task.steps()[0].tool_calls()[0].result(), Some("found"));
        assert_eq!(task.last_step_mut().unwrap().thought(), "second");
    }

    #[test]
    fn task_body_serializes_tagged() {
        let t = Task::directive("do it", "it is done");
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["body"]["kind"], "directive");
        assert_eq!(json["status"], "pending");
    }
}
