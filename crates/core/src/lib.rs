//! # loopwright core
//!
//! Domain types, traits, and error definitions for the loopwright agent
//! runtime. No HTTP client or provider SDK lives here; every other crate
//! builds on this domain model.
//!
//! Every collaborator of the plan → act → remember cycle is a trait here
//! (model provider, tool, long-term memory store, embedder, summarizer).
//! Implementations live in their respective crates and depend inward on
//! core.

pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod profile;
pub mod provider;
pub mod state;
pub mod task;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use memory::{
    Embedder, FactKind, LtmContext, LtmQuery, LtmStore, Memories, MemoryFact, MemoryItem,
    MemoryScope, MemorySource, StmContext, StmSlot, UpsertReport,
};
pub use message::{Message, MessageToolCall, Role};
pub use profile::AgentProfile;
pub use provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, ToolDefinition,
    Usage,
};
pub use state::{
    AgentMode, ExecutionMode, ExecutionState, GraphError, GraphErrorKind, NodeId, UsageSnapshot,
};
pub use task::{Step, Task, TaskBody, TaskStatus, ToolCallRecord, ToolCallStatus};
pub use tool::{Summarizer, Summary, Tool, ToolCall, ToolRegistry, ToolResult};
