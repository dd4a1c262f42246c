//! Typed event bus for decoded EventSub traffic.
//!
//! Uses a tokio broadcast channel so any number of consumers (the CLI
//! printer, a chat log, tests) can follow events independently of the
//! subscription manager that produces them.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use st_eventsub::SessionPhase;

use crate::chat::ChatMessage;

/// Application-level events.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A `channel.chat.message` notification was decoded.
    ChatMessageReceived(ChatMessage),
    /// A notification of a type without a dedicated decoder.
    NotificationReceived {
        subscription_type: String,
        message_id: String,
        event: serde_json::Value,
    },
    /// The server stopped delivering a subscription.
    SubscriptionRevoked {
        subscription_type: String,
        reason: Option<String>,
    },
    /// The EventSub session moved to a new phase.
    SessionPhaseChanged(SessionPhase),
}

/// Fan-out event bus. Slow subscribers lag and miss events.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<AppEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: AppEvent) {
        let label = event_label(&event);
        match self.sender.send(event) {
            Ok(count) => debug!("event_bus: emitted {label} to {count} subscriber(s)"),
            Err(_) => debug!("event_bus: no subscribers for {label}"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn event_label(event: &AppEvent) -> &'static str {
    match event {
        AppEvent::ChatMessageReceived(_) => "ChatMessageReceived",
        AppEvent::NotificationReceived { .. } => "NotificationReceived",
        AppEvent::SubscriptionRevoked { .. } => "SubscriptionRevoked",
        AppEvent::SessionPhaseChanged(_) => "SessionPhaseChanged",
    }
}
