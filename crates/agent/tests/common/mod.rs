//! Scripted providers and tools shared by the session tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use loopwright_agent::AgentRuntime;
use loopwright_config::{AgentRunConfig, MemoryConfig};
use loopwright_core::error::{ProviderError, ToolError};
use loopwright_core::message::{Message, MessageToolCall};
use loopwright_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use loopwright_core::state::{AgentMode, ExecutionMode};
use loopwright_core::tool::{Tool, ToolRegistry, ToolResult};
use loopwright_providers::{ModelGateway, ModelTier};
use loopwright_tools::ToolInvoker;
use serde_json::{Value, json};

pub type Scripted = Result<ProviderResponse, ProviderError>;

/// Replies from a fixed script, then fails every further call with a 503.
pub struct ScriptedProvider {
    script: Mutex<Vec<Scripted>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(mut script: Vec<Scripted>) -> Self {
        script.reverse();
        Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.script.lock().unwrap().pop().unwrap_or(Err(ProviderError::ApiError {
            status_code: 503,
            message: "script exhausted".into(),
        }))
    }
}

pub fn reply(calls: Vec<MessageToolCall>, content: &str) -> Scripted {
    let mut message = Message::assistant(content);
    message.tool_calls = calls;
    Ok(ProviderResponse {
        message,
        usage: Some(Usage::new(40, 10)),
        model: "scripted".into(),
        metadata: serde_json::Map::new(),
    })
}

pub fn text(content: &str) -> Scripted {
    reply(vec![], content)
}

pub fn call(name: &str, args: Value) -> MessageToolCall {
    MessageToolCall::new(format!("call_{name}"), name, args.to_string())
}

pub fn respond(message: &str) -> MessageToolCall {
    call("respond", json!({"message": message}))
}

pub fn create_task(directive: &str) -> Scripted {
    reply(
        vec![call(
            "create_task",
            json!({"directive": directive, "success_check": "the answer is given"}),
        )],
        "",
    )
}

pub fn end_objective() -> Scripted {
    reply(vec![call("end_task", json!({"summary": "objective met"}))], "")
}

pub fn structured(name: &str, value: Value) -> Scripted {
    reply(vec![call(name, value)], "")
}

pub fn unavailable() -> Scripted {
    Err(ProviderError::Network("connection refused".into()))
}

/// Returns its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echo the text argument"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }
    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: arguments["text"].as_str().unwrap_or_default().to_string(),
            data: None,
        })
    }
}

/// Returns a long report body.
pub struct ReportTool;

#[async_trait]
impl Tool for ReportTool {
    fn name(&self) -> &str {
        "fetch_report"
    }
    fn description(&self) -> &str {
        "Fetch the full quarterly report"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _arguments: Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: "Revenue grew twelve percent. ".repeat(200),
            data: None,
        })
    }
}

/// Never finishes within a test.
pub struct StallTool;

#[async_trait]
impl Tool for StallTool {
    fn name(&self) -> &str {
        "stall"
    }
    fn description(&self) -> &str {
        "Wait forever"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _arguments: Value) -> Result<ToolResult, ToolError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: String::new(),
            data: None,
        })
    }
}

pub fn registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool));
    registry.register(Box::new(ReportTool));
    registry.register(Box::new(StallTool));
    Arc::new(registry)
}

/// Builds a runtime whose tiers all answer from one script.
pub struct Harness {
    pub provider: Arc<ScriptedProvider>,
    pub agent: AgentRunConfig,
    pub memory: MemoryConfig,
    pub call_timeout: Duration,
    pub summarize: Option<(usize, usize)>,
}

impl Harness {
    pub fn new(script: Vec<Scripted>) -> Self {
        loopwright_telemetry::init_logging(false);
        Self {
            provider: Arc::new(ScriptedProvider::new(script)),
            agent: AgentRunConfig {
                mode: AgentMode::Interactive,
                execution_mode: ExecutionMode::Reactive,
                ..Default::default()
            },
            memory: MemoryConfig::default(),
            call_timeout: Duration::from_secs(5),
            summarize: None,
        }
    }

    pub fn runtime(&self) -> AgentRuntime {
        let gateway = Arc::new(ModelTier::ALL.into_iter().fold(ModelGateway::new(), |gw, tier| {
            gw.with_tier(tier, self.provider.clone(), format!("model-{tier}"))
        }));
        let mut invoker = ToolInvoker::new(registry())
            .with_call_timeout(self.call_timeout)
            .with_batch_timeout(self.call_timeout)
            .with_summarizer(gateway.clone());
        if let Some((threshold, max_chars)) = self.summarize {
            invoker = invoker.with_summarization(threshold, max_chars);
        }
        AgentRuntime::new(gateway, Arc::new(invoker))
            .with_agent_config(self.agent.clone())
            .with_memory_config(self.memory.clone())
    }
}
