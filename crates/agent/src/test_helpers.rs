//! Shared test helpers for component tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use loopwright_core::error::{ProviderError, ToolError};
use loopwright_core::memory::{LtmContext, Memories, StmContext};
use loopwright_core::message::{Message, MessageToolCall};
use loopwright_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use loopwright_core::state::{ExecutionMode, ExecutionState};
use loopwright_core::tool::{Tool, ToolRegistry, ToolResult};
use loopwright_providers::{ModelGateway, ModelTier};
use loopwright_tools::ToolInvoker;

use crate::runtime::AgentRuntime;

/// A mock provider that returns a sequence of scripted results.
///
/// Each call to `complete` returns the next entry. Once the script is
/// exhausted every call fails with a 503.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    call_count: Mutex<usize>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let next = responses.get(*count).cloned();
        *count += 1;
        next.unwrap_or(Err(ProviderError::ApiError {
            status_code: 503,
            message: "no scripted response left".into(),
        }))
    }
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> Result<ProviderResponse, ProviderError> {
    make_tool_call_response(vec![], text)
}

/// Create a response with tool calls and optional thought content.
pub fn make_tool_call_response(
    tool_calls: Vec<MessageToolCall>,
    thought: &str,
) -> Result<ProviderResponse, ProviderError> {
    let mut msg = Message::assistant(thought);
    msg.tool_calls = tool_calls;
    Ok(ProviderResponse {
        message: msg,
        usage: Some(Usage::new(10, 5)),
        model: "mock-model".into(),
        metadata: serde_json::Map::new(),
    })
}

/// A structured reply delivered as the forced tool call.
pub fn make_structured(name: &str, value: serde_json::Value) -> Result<ProviderResponse, ProviderError> {
    make_tool_call_response(vec![make_tool_call(name, value)], "")
}

/// Helper to create a tool call.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall::new(format!("call_{name}"), name, args.to_string())
}

pub fn failure() -> Result<ProviderResponse, ProviderError> {
    Err(ProviderError::Network("connection reset".into()))
}

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes back the input"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: arguments["text"].as_str().unwrap_or("").to_string(),
            data: None,
        })
    }
}

/// Sleeps far longer than any test timeout.
pub struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "Never finishes in time"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: "late".into(),
            data: None,
        })
    }
}

pub fn registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool));
    registry.register(Box::new(SlowTool));
    Arc::new(registry)
}

/// A runtime whose three tiers all answer from one script.
pub fn scripted(
    responses: Vec<Result<ProviderResponse, ProviderError>>,
) -> (AgentRuntime, Arc<SequentialMockProvider>) {
    let provider = Arc::new(SequentialMockProvider::new(responses));
    let gateway = ModelTier::ALL
        .into_iter()
        .fold(ModelGateway::new(), |gw, tier| {
            gw.with_tier(tier, provider.clone(), format!("mock-{tier}"))
        });
    let invoker = ToolInvoker::new(registry()).with_call_timeout(Duration::from_millis(200));
    (
        AgentRuntime::new(Arc::new(gateway), Arc::new(invoker)),
        provider,
    )
}

pub fn runtime_with(responses: Vec<Result<ProviderResponse, ProviderError>>) -> AgentRuntime {
    scripted(responses).0
}

pub fn state_with(mode: ExecutionMode, stm_max: usize) -> ExecutionState {
    ExecutionState::new(
        "Summarize the quarterly report",
        mode,
        Memories::new(StmContext::new(stm_max), LtmContext::default()),
    )
}
