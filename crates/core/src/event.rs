//! Domain event system: decoupled communication between bounded contexts.
//!
//! Events are published when something interesting happens in a session.
//! Telemetry and host observers subscribe without the orchestrator knowing
//! about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A session started working on an objective
    SessionStarted {
        session_id: String,
        objective_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A graph node finished
    NodeCompleted {
        session_id: String,
        node: String,
        graph_step: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The Task Manager or Planner appended a Task
    TaskCreated {
        session_id: String,
        task_id: String,
        summary: String,
        timestamp: DateTime<Utc>,
    },

    /// A model was invoked through the gateway
    ModelInvoked {
        provider: String,
        model: String,
        tier: String,
        tokens_used: u32,
        estimated: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        summarized: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Facts were written to long-term memory
    MemoryUpserted {
        inserted: usize,
        merged: usize,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// A node recorded a graph error
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A session stopped (terminal, suspended or cancelled)
    SessionEnded {
        session_id: String,
        outcome: String,
        total_tokens: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::TaskCreated {
            session_id: "s1".into(),
            task_id: "t1".into(),
            summary: "Find the invoice".into(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::TaskCreated { task_id, summary, .. } => {
                assert_eq!(task_id, "t1");
                assert_eq!(summary, "Find the invoice");
            }
            _ => panic!("Expected TaskCreated event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::ErrorOccurred {
            context: "reasoning".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
