//! Control intents: the tools the agent itself answers to.
//!
//! The task manager decides with exactly one of `create_task`, `block_task`
//! or `end_task`. A reasoning turn must call `respond` (its thought) plus at
//! least one action or control tool.

use loopwright_core::provider::ToolDefinition;
use serde::Deserialize;
use serde_json::json;

pub const CREATE_TASK: &str = "create_task";
pub const BLOCK_TASK: &str = "block_task";
pub const END_TASK: &str = "end_task";
pub const RESPOND: &str = "respond";
pub const REQUEST_HUMAN_INPUT: &str = "request_human_input";

/// What a tool call means to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolRole {
    /// The turn's thought or answer.
    Respond,
    /// Changes the task's lifecycle or suspends for a human.
    Control,
    /// A host tool that acts on the world.
    Action,
}

pub fn role_of(name: &str) -> ToolRole {
    match name {
        RESPOND => ToolRole::Respond,
        CREATE_TASK | BLOCK_TASK | END_TASK | REQUEST_HUMAN_INPUT => ToolRole::Control,
        _ => ToolRole::Action,
    }
}

/// Check a reasoning reply's tool calls against the required roles.
///
/// Exactly one `respond` plus at least one action or control call.
pub fn check_roles<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<(), String> {
    let mut responds = 0usize;
    let mut others = 0usize;
    for name in names {
        match role_of(name) {
            ToolRole::Respond => responds += 1,
            _ => others += 1,
        }
    }

    match (responds, others) {
        (1, n) if n > 0 => Ok(()),
        (0, 0) => Err("no tool calls; expected `respond` and an action".into()),
        (0, _) => Err("missing `respond` call".into()),
        (1, _) => Err("`respond` needs at least one action or control call".into()),
        (n, _) => Err(format!("expected one `respond` call, got {n}")),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskArgs {
    pub directive: String,
    #[serde(default)]
    pub success_check: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockTaskArgs {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndTaskArgs {
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RespondArgs {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HumanInputArgs {
    #[serde(default)]
    pub prompt: String,
}

pub fn create_task() -> ToolDefinition {
    ToolDefinition {
        name: CREATE_TASK.into(),
        description: "Create the next task toward the objective.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "directive": {"type": "string", "description": "What to do, stated as an instruction"},
                "success_check": {"type": "string", "description": "How to tell the task is done"}
            },
            "required": ["directive", "success_check"]
        }),
    }
}

pub fn block_task() -> ToolDefinition {
    ToolDefinition {
        name: BLOCK_TASK.into(),
        description: "Refuse or abandon the task, stating why.".into(),
        parameters: json!({
            "type": "object",
            "properties": {"reason": {"type": "string"}},
            "required": ["reason"]
        }),
    }
}

pub fn end_task() -> ToolDefinition {
    ToolDefinition {
        name: END_TASK.into(),
        description: "Declare the task finished.".into(),
        parameters: json!({
            "type": "object",
            "properties": {"summary": {"type": "string"}}
        }),
    }
}

pub fn respond() -> ToolDefinition {
    ToolDefinition {
        name: RESPOND.into(),
        description: "State your reasoning for this turn. Call it together with the tool that acts on it.".into(),
        parameters: json!({
            "type": "object",
            "properties": {"message": {"type": "string"}},
            "required": ["message"]
        }),
    }
}

pub fn request_human_input() -> ToolDefinition {
    ToolDefinition {
        name: REQUEST_HUMAN_INPUT.into(),
        description: "Ask the user a question and wait for the answer.".into(),
        parameters: json!({
            "type": "object",
            "properties": {"prompt": {"type": "string"}},
            "required": ["prompt"]
        }),
    }
}

/// The three decisions offered to the task manager.
pub fn task_manager_tools() -> Vec<ToolDefinition> {
    vec![create_task(), block_task(), end_task()]
}

/// Control tools offered next to the host's tools during reasoning.
pub fn executor_control_tools(allow_human_input: bool) -> Vec<ToolDefinition> {
    let mut tools = vec![respond(), block_task(), end_task()];
    if allow_human_input {
        tools.push(request_human_input());
    }
    tools
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles() {
        assert_eq!(role_of("respond"), ToolRole::Respond);
        assert_eq!(role_of("end_task"), ToolRole::Control);
        assert_eq!(role_of("request_human_input"), ToolRole::Control);
        assert_eq!(role_of("web_search"), ToolRole::Action);
    }

    #[test]
    fn role_check() {
        assert!(check_roles(["respond", "web_search"]).is_ok());
        assert!(check_roles(["web_search", "respond", "end_task"]).is_ok());
        assert!(check_roles([]).is_err());
        assert!(check_roles(["respond"]).is_err());
        assert!(check_roles(["web_search", "end_task"]).is_err());
        let err = check_roles(["respond", "respond", "lookup"]).unwrap_err();
        assert!(err.contains("got 2"));
    }

    #[test]
    fn human_input_is_optional() {
        let names = |tools: Vec<ToolDefinition>| -> Vec<String> {
            tools.into_iter().map(|t| t.name).collect()
        };
        assert!(!names(executor_control_tools(false)).contains(&REQUEST_HUMAN_INPUT.to_string()));
        assert!(names(executor_control_tools(true)).contains(&REQUEST_HUMAN_INPUT.to_string()));
        assert_eq!(names(task_manager_tools()), vec![CREATE_TASK, BLOCK_TASK, END_TASK]);
    }

    #[test]
    fn args_tolerate_missing_fields() {
        let args: BlockTaskArgs = serde_json::from_value(json!({})).unwrap();
        assert_eq!(args.reason, "");
        let args: CreateTaskArgs =
            serde_json::from_value(json!({"directive": "look it up"})).unwrap();
        assert_eq!(args.success_check, "");
        assert!(serde_json::from_value::<CreateTaskArgs>(json!({})).is_err());
    }
}
