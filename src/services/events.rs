//! Event system for territory changes
//!
//! Every successful claim, release, administrative override and void
//! publishes exactly one [`TerritoryEvent`] after its transaction commits.
//! Downstream collaborators (UI push, webhooks) subscribe here; emission is
//! fire-and-forget and never fails or blocks the operation that caused it.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::db::models::{Actor, AssignmentAction};

/// A committed territory change
#[derive(Debug, Clone, Serialize)]
pub struct TerritoryEvent {
    pub event_id: Uuid,
    pub action: AssignmentAction,
    pub city_id: Option<String>,
    pub agent_id: Option<String>,
    pub actor: Actor,
    pub reason: String,
    /// Previous owner removed by an administrative override
    pub displaced_agent_id: Option<String>,
    pub occurred_at: String,
}

impl TerritoryEvent {
    pub fn new(
        action: AssignmentAction,
        city_id: Option<String>,
        agent_id: Option<String>,
        actor: Actor,
        reason: impl Into<String>,
        occurred_at: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            action,
            city_id,
            agent_id,
            actor,
            reason: reason.into(),
            displaced_agent_id: None,
            occurred_at: occurred_at.into(),
        }
    }
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &TerritoryEvent);
}

/// Event bus for broadcasting territory events
pub struct EventBus {
    sender: broadcast::Sender<TerritoryEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: TerritoryEvent) {
        trace!(event = ?event, "Emitting territory event");
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<TerritoryEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &TerritoryEvent) {
        match event.action {
            AssignmentAction::Voided => {
                info!(
                    agent_id = ?event.agent_id,
                    released_city_id = ?event.city_id,
                    actor = %event.actor,
                    "Agent voided"
                );
            }
            AssignmentAction::AdministrativeOverride => {
                info!(
                    city_id = ?event.city_id,
                    agent_id = ?event.agent_id,
                    displaced = ?event.displaced_agent_id,
                    actor = %event.actor,
                    reason = %event.reason,
                    "Administrative override"
                );
            }
            _ => {
                debug!(
                    action = %event.action,
                    city_id = ?event.city_id,
                    agent_id = ?event.agent_id,
                    actor = %event.actor,
                    "Territory event"
                );
            }
        }
    }
}

/// Spawn a background task that feeds every event to `listener`
pub fn spawn_listener<L>(event_bus: Arc<EventBus>, listener: L) -> tokio::task::JoinHandle<()>
where
    L: EventListener + 'static,
{
    let mut receiver = event_bus.subscribe();

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    spawn_listener(event_bus, LoggingEventListener)
}
