//! Prompt assembly and structured-output contracts.
//!
//! Each builder picks the slice of state a prompt exposes and the shape of
//! the reply it asks for.

use loopwright_core::memory::{LtmContext, StmSlot};
use loopwright_core::message::{Message, MessageToolCall};
use loopwright_core::profile::AgentProfile;
use loopwright_core::provider::ToolDefinition;
use loopwright_core::state::ExecutionState;
use loopwright_core::task::{Task, TaskBody};
use loopwright_memory::stm;
use loopwright_tools::truncate_chars;
use serde::Deserialize;
use serde_json::json;

pub const PLANNING_DECISION: &str = "planning_decision";
pub const SUBMIT_PLAN: &str = "submit_plan";
pub const VALIDATION_VERDICT: &str = "validation_verdict";
pub const EXTRACT_MEMORIES: &str = "extract_memories";

// ── Structured replies ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct PlanningDecision {
    pub planning_required: bool,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanOutput {
    pub text: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub plan: Vec<String>,
    #[serde(default)]
    pub criticism: String,
    #[serde(default)]
    pub speak: String,
}

impl PlanOutput {
    pub fn into_task(self) -> Task {
        Task::plan(self.text, self.reasoning, self.plan, self.criticism, self.speak)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationVerdict {
    pub success: bool,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedMemories {
    #[serde(default)]
    pub episodic: Vec<String>,
    #[serde(default)]
    pub semantic: Vec<String>,
}

pub fn planning_decision_schema() -> ToolDefinition {
    ToolDefinition {
        name: PLANNING_DECISION.into(),
        description: "Decide whether the objective needs an explicit plan.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "planning_required": {"type": "boolean"},
                "reason": {"type": "string"}
            },
            "required": ["planning_required"]
        }),
    }
}

pub fn plan_schema() -> ToolDefinition {
    ToolDefinition {
        name: SUBMIT_PLAN.into(),
        description: "Submit the plan for the objective.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "The plan in one sentence"},
                "reasoning": {"type": "string"},
                "plan": {"type": "array", "items": {"type": "string"}},
                "criticism": {"type": "string"},
                "speak": {"type": "string", "description": "What to tell the user"}
            },
            "required": ["text", "plan"]
        }),
    }
}

pub fn validation_schema() -> ToolDefinition {
    ToolDefinition {
        name: VALIDATION_VERDICT.into(),
        description: "Judge whether the task met its success check.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "success": {"type": "boolean"},
                "reason": {"type": "string"}
            },
            "required": ["success", "reason"]
        }),
    }
}

pub fn memories_schema() -> ToolDefinition {
    ToolDefinition {
        name: EXTRACT_MEMORIES.into(),
        description: "Record what happened and what was learned.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "episodic": {"type": "array", "items": {"type": "string"}},
                "semantic": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["episodic", "semantic"]
        }),
    }
}

// ── Context sections ─────────────────────────────────────────────────────

pub fn format_ltm(ltm: &LtmContext) -> String {
    ltm.items
        .iter()
        .map(|fact| format!("- ({}) {}", fact.kind, fact.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Task history, one line per Task with its status.
pub fn format_tasks(tasks: &[Task]) -> String {
    tasks
        .iter()
        .map(|task| match &task.body {
            TaskBody::Directive { directive, .. } => {
                format!("- [{}] {directive}", task.status)
            }
            TaskBody::Plan { text, plan, .. } => {
                let mut line = format!("- [plan] {text}");
                for (i, item) in plan.iter().enumerate() {
                    line.push_str(&format!("\n    {}. {item}", i + 1));
                }
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A Task's steps as a bounded transcript.
pub fn format_steps(task: &Task, preview_chars: usize) -> String {
    let mut out = String::new();
    for (i, step) in task.steps().iter().enumerate() {
        out.push_str(&format!(
            "Step {}: {}\n",
            i + 1,
            truncate_chars(step.thought(), preview_chars)
        ));
        for call in step.tool_calls() {
            out.push_str(&format!(
                "  - {}({}) -> {}\n",
                call.name,
                truncate_chars(&call.args.to_string(), preview_chars),
                truncate_chars(call.result().unwrap_or("(pending)"), preview_chars)
            ));
        }
    }
    out
}

fn section(prompt: &mut String, title: &str, body: &str) {
    if body.trim().is_empty() {
        return;
    }
    prompt.push_str("\n\n## ");
    prompt.push_str(title);
    prompt.push('\n');
    prompt.push_str(body);
}

fn last_plan(tasks: &[Task]) -> Option<&Task> {
    tasks.iter().rev().find(|t| !t.is_directive())
}

// ── Prompts ──────────────────────────────────────────────────────────────

pub fn planning_decision(profile: &AgentProfile, objective: &str) -> Vec<Message> {
    vec![
        Message::system(format!(
            "{}\n\nDecide whether the objective below needs an explicit multi-step plan, \
             or can be handled directly one task at a time.",
            profile.system_prompt()
        )),
        Message::user(objective),
    ]
}

/// Which flavour of plan is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    Initial,
    Revision,
    Evolution,
}

pub fn plan(
    profile: &AgentProfile,
    state: &ExecutionState,
    tool_names: &[String],
    kind: PlanKind,
    recent: &[StmSlot],
) -> Vec<Message> {
    let mut system = profile.system_prompt();
    system.push_str("\n\nProduce a plan for the objective.");
    section(&mut system, "Available tools", &tool_names.join(", "));
    section(&mut system, "Relevant memories", &format_ltm(&state.memories.ltm));

    match kind {
        PlanKind::Initial => {}
        PlanKind::Revision => {
            let rejection = state
                .messages
                .iter()
                .rev()
                .find(|m| m.validation() == Some(false))
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            section(&mut system, "Tasks so far", &format_tasks(&state.tasks));
            if let Some(previous) = last_plan(&state.tasks) {
                section(&mut system, "Previous plan", &format_tasks(std::slice::from_ref(previous)));
            }
            section(&mut system, "Why the last attempt was rejected", rejection);
            system.push_str("\n\nRevise the plan so the rejected work succeeds.");
        }
        PlanKind::Evolution => {
            section(&mut system, "Tasks so far", &format_tasks(&state.tasks));
            section(&mut system, "Recent history", &stm::format_context(recent));
            system.push_str("\n\nUpdate the plan from what has happened so far.");
        }
    }

    vec![Message::system(system), Message::user(&state.objective)]
}

pub fn task_manager(profile: &AgentProfile, state: &ExecutionState) -> Vec<Message> {
    let mut system = profile.system_prompt();
    system.push_str(
        "\n\nDecide the next step toward the objective by calling exactly one tool: \
         `create_task` for the next concrete task, `block_task` if the objective must not or \
         cannot be pursued, or `end_task` once the objective is met.",
    );
    if let Some(plan) = last_plan(&state.tasks) {
        section(&mut system, "Current plan", &format_tasks(std::slice::from_ref(plan)));
    }
    let directives: Vec<Task> = state
        .tasks
        .iter()
        .filter(|t| t.is_directive())
        .cloned()
        .collect();
    section(&mut system, "Tasks so far", &format_tasks(&directives));
    section(&mut system, "Relevant memories", &format_ltm(&state.memories.ltm));

    vec![Message::system(system), Message::user(&state.objective)]
}

/// The reasoning prompt: identity, the active Task, memory context and the
/// Task's own transcript replayed as assistant/tool messages.
pub fn reasoning(
    profile: &AgentProfile,
    state: &ExecutionState,
    task: &Task,
    recent: &[StmSlot],
    free_form: bool,
) -> Vec<Message> {
    let mut system = profile.system_prompt();
    if free_form {
        system.push_str(
            "\n\nWork on the task below. Use tools when they help; answer in plain text \
             when the task is done.",
        );
    } else {
        system.push_str(
            "\n\nWork on the task below. Every reply must call `respond` with your reasoning \
             together with at least one other tool. Call `end_task` when the success check is \
             met, or `block_task` with a reason if the task must not be done.",
        );
    }
    section(&mut system, "Task", &task.summary());
    if let Some(check) = task.success_check().filter(|c| !c.is_empty()) {
        section(&mut system, "Success check", check);
    }
    section(&mut system, "Recent context", &stm::format_context(recent));
    section(&mut system, "Relevant memories", &format_ltm(&state.memories.ltm));

    let mut messages = vec![Message::system(system), Message::user(&state.objective)];
    for step in task.steps() {
        let mut turn = Message::assistant(step.thought());
        turn.tool_calls = step
            .tool_calls()
            .iter()
            .map(|c| MessageToolCall::new(&c.tool_call_id, &c.name, c.args.to_string()))
            .collect();
        messages.push(turn);
        for call in step.tool_calls() {
            if let Some(result) = call.result() {
                messages.push(Message::tool_result(&call.tool_call_id, result));
            }
        }
    }
    messages
}

pub fn validation(profile: &AgentProfile, task: &Task, preview_chars: usize) -> Vec<Message> {
    let mut system = profile.system_prompt();
    system.push_str(
        "\n\nYou review finished work. Decide whether the task below met its success check, \
         judging only from the transcript.",
    );
    section(&mut system, "Task", &task.summary());
    section(&mut system, "Success check", task.success_check().unwrap_or_default());
    vec![
        Message::system(system),
        Message::user(format_steps(task, preview_chars)),
    ]
}

pub fn consolidation(task: &Task, preview_chars: usize) -> Vec<Message> {
    vec![
        Message::system(
            "Extract long-term memories from the finished task below. `episodic` lists what \
             happened, one event per entry. `semantic` lists durable facts worth remembering. \
             Return empty lists when there is nothing worth keeping.",
        ),
        Message::user(format!(
            "Task: {}\n\n{}",
            task.summary(),
            format_steps(task, preview_chars)
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopwright_core::memory::{LtmContext, Memories, StmContext};
    use loopwright_core::state::ExecutionMode;
    use loopwright_core::task::{Step, ToolCallRecord};

    fn state() -> ExecutionState {
        ExecutionState::new(
            "Summarize the quarterly report",
            ExecutionMode::Reactive,
            Memories::new(StmContext::new(4), LtmContext::default()),
        )
    }

    fn worked_task() -> Task {
        let mut task = Task::directive("Fetch the report", "Report text is present");
        let mut call = ToolCallRecord::new("call_1", "fetch", json!({"id": "q3"}));
        call.complete("x".repeat(500));
        task.push_step(Step::new("I should fetch it", vec![call]));
        task
    }

    #[test]
    fn steps_are_previewed() {
        let text = format_steps(&worked_task(), 40);
        assert!(text.starts_with("Step 1: I should fetch it"));
        assert!(text.contains("fetch({\"id\":\"q3\"})"));
        assert!(text.contains("[truncated]"));
        assert!(text.len() < 200);
    }

    #[test]
    fn reasoning_replays_transcript() {
        let s = state();
        let task = worked_task();
        let messages = reasoning(&AgentProfile::default(), &s, &task, &[], false);
        assert_eq!(messages.len(), 4);
        assert!(messages[0].content.contains("Fetch the report"));
        assert!(messages[0].content.contains("Report text is present"));
        assert_eq!(messages[2].tool_calls[0].id, "call_1");
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn revision_prompt_carries_rejection() {
        let mut s = state();
        s.messages.push(
            Message::assistant("the summary omits revenue")
                .with_metadata(loopwright_core::message::VALIDATION_KEY, false),
        );
        let messages = plan(&AgentProfile::default(), &s, &[], PlanKind::Revision, &[]);
        assert!(messages[0].content.contains("the summary omits revenue"));
        assert_eq!(messages[1].content, "Summarize the quarterly report");
    }

    #[test]
    fn task_manager_lists_history() {
        let mut s = state();
        s.push_task(Task::plan("Two steps", "", vec!["fetch".into(), "summarize".into()], "", ""));
        s.push_task(Task::directive("Fetch the report", "present"));
        let system = &task_manager(&AgentProfile::default(), &s)[0].content;
        assert!(system.contains("1. fetch"));
        assert!(system.contains("- [pending] Fetch the report"));
    }

    #[test]
    fn structured_replies_tolerate_missing_fields() {
        let plan: PlanOutput = serde_json::from_value(json!({"text": "do it"})).unwrap();
        assert!(plan.plan.is_empty());
        let task = plan.into_task();
        assert!(!task.is_directive());

        let facts: ExtractedMemories = serde_json::from_value(json!({"semantic": ["a"]})).unwrap();
        assert!(facts.episodic.is_empty());
        assert!(serde_json::from_value::<ValidationVerdict>(json!({})).is_err());
    }
}
