//! Execution tracing, token accounting and budget enforcement for loopwright.
//!
//! Every model call is attributed to a provider and tier, every state-machine
//! node gets a span in its session's trace, and an optional per-session token
//! budget stops runaway sessions.

pub mod engine;
pub mod logging;
pub mod model;

pub use engine::TelemetryEngine;
pub use logging::{init_json_logging, init_logging};
pub use model::{KeyedUsage, Span, SpanKind, Trace, UsageReport, UsageTotals};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("token budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
