//! Message Bus for execution events
//!
//! The MessageBus provides a pub/sub pattern so observers (the CLI progress
//! output, tests) can follow agent executions, provider fallbacks, batch
//! progress and workflow stage changes without being wired into them.
//! It uses bounded channels, and publishing never waits: a full or closed
//! subscriber channel drops the event.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Event types that can be subscribed to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    AgentStarted,
    AgentCompleted,
    ProviderFallback,
    BatchProgress,
    StageChanged,
    ClarificationRequested,
    WorkflowFinished,
    /// Subscribe to all event types
    All,
}

/// Events published on the message bus
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An agent passed validation and started running
    AgentStarted {
        agent_id: String,
        request_id: String,
    },
    /// An agent finished, successfully or not
    AgentCompleted {
        agent_id: String,
        request_id: String,
        success: bool,
        execution_time_ms: u64,
    },
    /// Work moved from one provider to the next after a failure
    ProviderFallback {
        from: String,
        to: String,
        error: String,
    },
    /// One agent of a parallel batch settled
    BatchProgress {
        completed: usize,
        total: usize,
        agent_id: String,
    },
    /// The workflow entered a new stage
    StageChanged { from: String, to: String },
    /// The workflow paused for clarification
    ClarificationRequested { round: u32, questions: usize },
    /// The workflow reached a terminal stage
    WorkflowFinished { stage: String, success: bool },
}

impl Event {
    /// Get the event type for this event
    pub fn event_type(&self) -> EventType {
        match self {
            Event::AgentStarted { .. } => EventType::AgentStarted,
            Event::AgentCompleted { .. } => EventType::AgentCompleted,
            Event::ProviderFallback { .. } => EventType::ProviderFallback,
            Event::BatchProgress { .. } => EventType::BatchProgress,
            Event::StageChanged { .. } => EventType::StageChanged,
            Event::ClarificationRequested { .. } => EventType::ClarificationRequested,
            Event::WorkflowFinished { .. } => EventType::WorkflowFinished,
        }
    }
}

/// Message bus for pub/sub communication
pub struct MessageBus {
    /// Map of event types to lists of subscribers
    channels: Arc<Mutex<HashMap<EventType, Vec<mpsc::Sender<Event>>>>>,
}

impl MessageBus {
    /// Create a new MessageBus
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to a specific event type, or `EventType::All`
    ///
    /// The returned channel holds at most `CHANNEL_BUFFER_SIZE` undelivered
    /// events; anything beyond that is dropped for this subscriber.
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        channels.entry(event_type).or_default().push(tx);
        rx
    }

    /// Publish an event to the subscribers of its type and of `All`
    ///
    /// Closed subscribers are pruned.
    pub async fn publish(&self, event: Event) {
        let mut channels = self.channels.lock().await;
        let event_type = event.event_type();

        for key in [event_type, EventType::All] {
            if let Some(subscribers) = channels.get_mut(&key) {
                subscribers.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!("Dropping {:?} event for a full subscriber", key);
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
    }

    /// Number of live subscriptions for an event type
    pub async fn subscriber_count(&self, event_type: EventType) -> usize {
        let channels = self.channels.lock().await;
        channels
            .get(&event_type)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
