//! Agent profile: who the agent is and what it is for.
//!
//! The profile feeds the planner and executor prompts (role, goal,
//! constraints) and scopes long-term memory to a user.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// The agent's name
    pub name: String,

    /// What the agent is (e.g., "research assistant")
    pub role: String,

    /// The standing goal the agent works toward
    pub goal: String,

    /// Rules the agent must respect
    #[serde(default)]
    pub constraints: Vec<String>,

    /// Owner of the long-term memories this agent writes
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

fn default_user_id() -> String {
    "default".into()
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            name: "loopwright".into(),
            role: "a careful, tool-using assistant".into(),
            goal: "Complete the user's objective accurately".into(),
            constraints: Vec::new(),
            user_id: default_user_id(),
        }
    }
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, role: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            goal: goal.into(),
            ..Self::default()
        }
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Render the identity section shared by every system prompt.
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are {}, {}.\nYour goal: {}",
            self.name, self.role, self.goal
        );
        if !self.constraints.is_empty() {
            prompt.push_str("\n\nConstraints:");
            for c in &self.constraints {
                prompt.push_str("\n- ");
                prompt.push_str(c);
            }
        }
        prompt
    }
}
